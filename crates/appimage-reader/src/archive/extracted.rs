//! Fallback backend: let the AppImage runtime unpack itself.

use super::{ArchiveReader, BackendOptions, PlainTree, wait_bounded, wait_ready};
use crate::error::{Error, Result};
use log::debug;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

const BACKEND: &str = "extracted";

/// Directory the runtime's `--appimage-extract` writes into.
const EXTRACT_ROOT: &str = "squashfs-root";

/// Serves reads from a private extraction of the whole image.
///
/// The temporary directory lives exactly as long as this value, so every
/// exit path (including a failed `open`) removes it.
#[derive(Debug)]
pub struct ExtractedBackend {
    tree: PlainTree,
    _workdir: TempDir,
}

impl ExtractedBackend {
    pub fn open(source: &Path, options: &BackendOptions) -> Result<Self> {
        let meta = std::fs::metadata(source)?;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(Error::unavailable(
                BACKEND,
                format!("{} is not executable", source.display()),
            ));
        }

        let workdir = tempfile::Builder::new()
            .prefix("appimaged-")
            .tempdir_in(&options.work_dir)?;
        debug!(
            "Extracting {} into {}",
            source.display(),
            workdir.path().display()
        );

        let child = Command::new(source)
            .arg("--appimage-extract")
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::unavailable(BACKEND, format!("{}: {}", source.display(), e)))?;
        wait_bounded(BACKEND, child, options.extract_timeout, options.poll_interval)?;

        let root = workdir.path().join(EXTRACT_ROOT);
        wait_ready(&root, options.ready_timeout, options.poll_interval)?;

        Ok(Self {
            tree: PlainTree::new(root),
            _workdir: workdir,
        })
    }
}

impl ArchiveReader for ExtractedBackend {
    fn read_file(&self, entry: &str) -> Result<Box<dyn Read + '_>> {
        self.tree.read_file(entry)
    }

    fn is_directory(&self, entry: &str) -> bool {
        self.tree.is_directory(entry)
    }

    fn list_directory(&self, entry: &str) -> Vec<String> {
        self.tree.list_directory(entry)
    }

    fn extract(&self, entry: &str, dest: &Path, resolve_symlinks: bool) -> Result<()> {
        self.tree.extract(entry, dest, resolve_symlinks)
    }
}
