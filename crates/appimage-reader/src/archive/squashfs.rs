//! Direct squashfs access for type 2 AppImages.

use super::{ArchiveReader, EntryKind, ListingIndex, follow_symlinks, remove_stale};
use crate::error::{Error, Result};
use crate::wildcard;
use backhand::{FilesystemReader, InnerNode, SquashfsFileReader};
use log::debug;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

/// Reads the squashfs image at `offset` in process.
///
/// The image is parsed once in `open`, which is also the check that this
/// backend can serve the file at all.
pub struct SquashfsBackend {
    source: PathBuf,
    image: FilesystemReader<'static>,
    index: ListingIndex,
    files: HashMap<String, SquashfsFileReader>,
}

impl SquashfsBackend {
    pub fn open(source: &Path, offset: u64) -> Result<Self> {
        let reader = BufReader::new(File::open(source)?);
        let image = FilesystemReader::from_reader_with_offset(reader, offset)?;

        let mut index = ListingIndex::new();
        let mut files = HashMap::new();
        for node in image.files() {
            let path = wildcard::normalize(&node.fullpath.to_string_lossy());
            let kind = match &node.inner {
                InnerNode::Dir(_) => EntryKind::Dir,
                InnerNode::Symlink(link) => {
                    EntryKind::Symlink(link.link.to_string_lossy().into_owned())
                }
                InnerNode::File(file) => {
                    files.insert(path.clone(), file.clone());
                    EntryKind::File
                }
                _ => EntryKind::File,
            };
            index.insert(&path, kind);
        }

        debug!(
            "{}: squashfs at offset {} opened ({} files)",
            source.display(),
            offset,
            files.len()
        );

        Ok(Self {
            source: source.to_path_buf(),
            image,
            index,
            files,
        })
    }

    pub fn index(&self) -> &ListingIndex {
        &self.index
    }

    /// Wildcards, linked parent directories, then symlinks until a
    /// non-symlink. Absolute or dangling targets are unresolvable.
    fn lookup(&self, entry: &str) -> Result<String> {
        let resolved = self.index.resolve_parents(&self.index.resolve(entry)?)?;
        let followed = follow_symlinks(&resolved, false, |p| self.index.symlink_target(p))?;
        let followed = self.index.resolve_parents(&followed)?;
        match self.index.kind(&followed) {
            Some(_) => Ok(followed),
            None if followed != resolved => Err(Error::CannotResolve(entry.to_string())),
            None => Err(Error::NotFound(entry.to_string())),
        }
    }

    fn read_entry(&self, entry: &str) -> Result<Vec<u8>> {
        if self.index.is_dir(entry) {
            return Err(Error::IsDirectory(entry.to_string()));
        }
        let file = self
            .files
            .get(entry)
            .ok_or_else(|| Error::NotFound(entry.to_string()))?;

        let mut buf = Vec::new();
        self.image.file(&file.basic).reader().read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write_entry(&self, entry: &str, target: &Path, resolve_symlinks: bool) -> Result<()> {
        match self.index.kind(entry) {
            Some(EntryKind::Dir) => fs::create_dir_all(target)?,
            Some(EntryKind::File) => fs::write(target, self.read_entry(entry)?)?,
            Some(EntryKind::Symlink(link)) => {
                if resolve_symlinks {
                    let real = self.lookup(entry)?;
                    if self.index.is_dir(&real) {
                        fs::create_dir_all(target)?;
                    } else {
                        fs::write(target, self.read_entry(&real)?)?;
                    }
                } else {
                    remove_stale(target)?;
                    std::os::unix::fs::symlink(link, target)?;
                }
            }
            None => return Err(Error::NotFound(entry.to_string())),
        }
        Ok(())
    }
}

impl ArchiveReader for SquashfsBackend {
    fn read_file(&self, entry: &str) -> Result<Box<dyn Read + '_>> {
        let resolved = self.lookup(entry)?;
        Ok(Box::new(Cursor::new(self.read_entry(&resolved)?)))
    }

    fn is_directory(&self, entry: &str) -> bool {
        self.lookup(entry)
            .map(|p| self.index.is_dir(&p))
            .unwrap_or(false)
    }

    fn list_directory(&self, entry: &str) -> Vec<String> {
        match self.lookup(entry) {
            Ok(p) if self.index.is_dir(&p) => self.index.children(&p),
            _ => Vec::new(),
        }
    }

    fn extract(&self, entry: &str, dest: &Path, resolve_symlinks: bool) -> Result<()> {
        let requested = self.index.resolve(entry)?;
        let canonical = self.index.resolve_parents(&requested)?;
        if !self.index.contains(&canonical) {
            return Err(Error::NotFound(entry.to_string()));
        }

        let (parent, _) = wildcard::split(&requested);
        fs::create_dir_all(super::destination(dest, parent))?;

        // A symlinked directory is copied as its target when resolving.
        let base = if resolve_symlinks {
            self.lookup(&canonical)?
        } else {
            canonical.clone()
        };

        if !self.index.is_dir(&base) {
            return self.write_entry(
                &canonical,
                &super::destination(dest, &requested),
                resolve_symlinks,
            );
        }

        for item in self.index.subtree(&base) {
            let relative = item
                .strip_prefix(&base)
                .unwrap_or(&item)
                .trim_start_matches('/');
            let target = super::destination(dest, &wildcard::join(&requested, relative));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            self.write_entry(&item, &target, resolve_symlinks)?;
        }
        Ok(())
    }

    fn resolve(&self, entry: &str) -> Result<String> {
        self.index.resolve(entry)
    }
}

impl std::fmt::Debug for SquashfsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SquashfsBackend")
            .field("source", &self.source)
            .field("files", &self.files.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhand::{FilesystemWriter, NodeHeader};

    /// Runtime stub size in front of the filesystem image.
    const STUB: usize = 1320;
    const DESKTOP: &[u8] = b"[Desktop Entry]\nName=X\n";

    /// A squashfs image behind a `STUB`-byte prefix, laid out like a type 2 AppImage.
    fn write_appimage(path: &Path) {
        let mut writer = FilesystemWriter::default();
        writer.push_file(Cursor::new(DESKTOP.to_vec()), "app.desktop", NodeHeader::default())
            .unwrap();
        writer.push_dir("usr", NodeHeader::default()).unwrap();
        writer.push_dir("usr/share", NodeHeader::default()).unwrap();
        writer.push_file(
            Cursor::new(vec![7u8; 5000]),
            "usr/share/app.png",
            NodeHeader::default(),
        )
        .unwrap();
        writer.push_symlink("usr/share/app.png", ".DirIcon", NodeHeader::default())
            .unwrap();
        writer.push_symlink("share", "usr/data", NodeHeader::default())
            .unwrap();
        writer.push_symlink("/usr/bin/python3", "python", NodeHeader::default())
            .unwrap();
        writer.push_symlink("nowhere", "broken", NodeHeader::default())
            .unwrap();

        let mut image = Cursor::new(Vec::new());
        writer.write(&mut image).unwrap();
        let mut data = vec![0u8; STUB];
        data.extend_from_slice(image.get_ref());
        std::fs::write(path, data).unwrap();
    }

    fn open_fixture(dir: &Path) -> SquashfsBackend {
        let path = dir.join("App.AppImage");
        write_appimage(&path);
        SquashfsBackend::open(&path, STUB as u64).unwrap()
    }

    #[test]
    fn test_rejects_non_squashfs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.AppImage");
        fs::write(&path, vec![0u8; 8192]).unwrap();

        assert!(SquashfsBackend::open(&path, 1320).is_err());
    }

    #[test]
    fn test_reads_image_behind_runtime_stub() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open_fixture(dir.path());

        assert_eq!(backend.read_to_vec("*.desktop").unwrap(), DESKTOP);
        assert_eq!(backend.read_to_vec(".DirIcon").unwrap(), vec![7u8; 5000]);
        assert_eq!(backend.list_directory("usr"), vec!["data", "share"]);
        assert_eq!(backend.list_directory("usr/data"), vec!["app.png"]);
        assert_eq!(backend.read_to_vec("usr/data/app.png").unwrap().len(), 5000);
        assert!(matches!(backend.read_file("usr").err(), Some(Error::IsDirectory(_))));
    }

    #[test]
    fn test_symlink_rules() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open_fixture(dir.path());

        assert_eq!(backend.lookup(".DirIcon").unwrap(), "usr/share/app.png");
        assert!(backend.is_directory("usr/data"));
        assert!(matches!(backend.lookup("python"), Err(Error::CannotResolve(_))));
        assert!(matches!(backend.lookup("broken"), Err(Error::CannotResolve(_))));
        assert!(matches!(backend.lookup("absent"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_extract() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open_fixture(dir.path());

        let out = dir.path().join("out");
        backend.extract("usr/share", &out, true).unwrap();
        assert_eq!(fs::read(out.join("usr/share/app.png")).unwrap().len(), 5000);

        backend.extract(".DirIcon", &out, true).unwrap();
        let icon = out.join(".DirIcon");
        assert!(!fs::symlink_metadata(&icon).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&icon).unwrap().len(), 5000);

        // A linked directory is copied as its target.
        backend.extract("usr/data", &out, true).unwrap();
        assert!(out.join("usr/data/app.png").is_file());

        let raw = dir.path().join("raw");
        backend.extract(".DirIcon", &raw, false).unwrap();
        backend.extract(".DirIcon", &raw, false).unwrap();
        assert_eq!(
            fs::read_link(raw.join(".DirIcon")).unwrap(),
            PathBuf::from("usr/share/app.png")
        );
    }
}
