//! Archive access on an unpacked or mounted directory tree.

use super::{ArchiveReader, follow_symlinks};
use crate::error::{Error, Result};
use crate::wildcard;
use log::warn;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A plain directory treated as the archive root. Symlinks are resolved
/// inside the root, never against the host filesystem.
#[derive(Clone, Debug)]
pub struct PlainTree {
    root: PathBuf,
}

impl PlainTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, entry: &str) -> PathBuf {
        super::destination(&self.root, entry)
    }

    fn read_link(&self, entry: &str) -> Option<String> {
        let path = self.host_path(entry);
        let meta = fs::symlink_metadata(&path).ok()?;
        if !meta.file_type().is_symlink() {
            return None;
        }
        fs::read_link(&path)
            .ok()
            .map(|t| t.to_string_lossy().into_owned())
    }

    /// Wildcards, then symlinks. Dangling or escaping links are errors.
    fn lookup(&self, entry: &str) -> Result<String> {
        let resolved = self.resolve(entry)?;
        let followed = follow_symlinks(&resolved, false, |p| self.read_link(p))?;
        match fs::symlink_metadata(self.host_path(&followed)) {
            Ok(_) => Ok(followed),
            Err(_) if followed != resolved => Err(Error::CannotResolve(entry.to_string())),
            Err(_) => Err(Error::NotFound(entry.to_string())),
        }
    }

    fn copy_entry(&self, entry: &str, target: &Path, resolve_symlinks: bool) -> Result<()> {
        let host = self.host_path(entry);
        let meta = fs::symlink_metadata(&host)?;

        if meta.file_type().is_symlink() {
            if resolve_symlinks {
                match self.lookup(entry) {
                    Ok(real) if !self.is_dir_entry(&real) => {
                        fs::copy(self.host_path(&real), target)?;
                    }
                    Ok(_) => fs::create_dir_all(target)?,
                    Err(e) => warn!("Skipping {}: {}", entry, e),
                }
            } else {
                let link = fs::read_link(&host)?;
                super::remove_stale(target)?;
                std::os::unix::fs::symlink(link, target)?;
            }
        } else if meta.is_dir() {
            fs::create_dir_all(target)?;
        } else {
            fs::copy(&host, target)?;
        }
        Ok(())
    }

    fn is_dir_entry(&self, entry: &str) -> bool {
        fs::symlink_metadata(self.host_path(entry))
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

impl ArchiveReader for PlainTree {
    fn read_file(&self, entry: &str) -> Result<Box<dyn Read + '_>> {
        let resolved = self.lookup(entry)?;
        if self.is_dir_entry(&resolved) {
            return Err(Error::IsDirectory(resolved));
        }
        Ok(Box::new(File::open(self.host_path(&resolved))?))
    }

    fn is_directory(&self, entry: &str) -> bool {
        self.lookup(entry)
            .map(|p| self.is_dir_entry(&p))
            .unwrap_or(false)
    }

    fn list_directory(&self, entry: &str) -> Vec<String> {
        let Ok(resolved) = self.lookup(entry) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(self.host_path(&resolved)) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn extract(&self, entry: &str, dest: &Path, resolve_symlinks: bool) -> Result<()> {
        let requested = self.resolve(entry)?;
        let host = self.host_path(&requested);
        if fs::symlink_metadata(&host).is_err() {
            return Err(Error::NotFound(entry.to_string()));
        }

        let (parent, _) = wildcard::split(&requested);
        fs::create_dir_all(super::destination(dest, parent))?;

        // A symlinked directory is copied as its target when resolving.
        let walk_root = if resolve_symlinks {
            self.host_path(&self.lookup(&requested)?)
        } else {
            host
        };

        for item in WalkDir::new(&walk_root).follow_links(false) {
            let item = item.map_err(|e| Error::Io(e.into()))?;
            let relative = item
                .path()
                .strip_prefix(&walk_root)
                .unwrap_or(Path::new(""));
            let archive_entry = self.archive_path(&walk_root, relative);
            let target = if relative.as_os_str().is_empty() {
                super::destination(dest, &requested)
            } else {
                super::destination(dest, &requested).join(relative)
            };
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            self.copy_entry(&archive_entry, &target, resolve_symlinks)?;
        }
        Ok(())
    }
}

impl PlainTree {
    /// Map a path under `walk_root` back to an entry path in the archive.
    fn archive_path(&self, walk_root: &Path, relative: &Path) -> String {
        let base = walk_root
            .strip_prefix(&self.root)
            .unwrap_or(Path::new(""))
            .to_string_lossy()
            .into_owned();
        wildcard::normalize(&wildcard::join(&base, &relative.to_string_lossy()))
    }
}
