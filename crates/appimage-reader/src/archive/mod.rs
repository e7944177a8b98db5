//! Read-only access to the filesystem embedded in an AppImage.
//!
//! Every backend implements the same [`ArchiveReader`] capability set:
//!
//! | Backend     | Used for                              | Mechanism                       |
//! |-------------|---------------------------------------|---------------------------------|
//! | `Listing`   | type 1 (ISO9660)                      | `bsdtar` listing + extraction   |
//! | `Squashfs`  | type 2, squashfs the reader can parse | direct read via `backhand`      |
//! | `Extracted` | type 2, anything else                 | the runtime's `--appimage-extract` |
//! | `Mounted`   | type 2 with a dwarfs payload          | FUSE mount, unmounted when idle |
//!
//! The backend is chosen once per handle by [`Backend::select`].

mod extracted;
mod listing;
mod mounted;
mod squashfs;
mod tree;

pub use extracted::ExtractedBackend;
pub use listing::{EntryKind, ListingBackend, ListingIndex};
pub use mounted::MountBackend;
pub use squashfs::SquashfsBackend;
pub use tree::PlainTree;

use crate::detect::{ContainerKind, Detection, PayloadFormat};
use crate::error::{Error, Result};
use crate::wildcard;
use log::debug;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output};
use std::time::{Duration, Instant};

/// Symlink chains longer than this are treated as unresolvable.
pub const MAX_SYMLINK_HOPS: usize = 16;

/// Common capability set of all backends. Entry paths may contain wildcards.
pub trait ArchiveReader {
    /// Open a file for reading.
    fn read_file(&self, entry: &str) -> Result<Box<dyn Read + '_>>;

    fn is_directory(&self, entry: &str) -> bool;

    /// Sorted child names, empty if `entry` is not a directory.
    fn list_directory(&self, entry: &str) -> Vec<String>;

    /// Extract `entry` (file or subtree) below `dest`, keeping its archive path.
    fn extract(&self, entry: &str, dest: &Path, resolve_symlinks: bool) -> Result<()>;

    /// Resolve wildcards in `entry` against this archive's structure.
    fn resolve(&self, entry: &str) -> Result<String> {
        wildcard::resolve(entry, |dir| self.list_directory(dir))
    }

    fn read_to_vec(&self, entry: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_file(entry)?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Tunables for the external-tool backends.
#[derive(Clone, Debug)]
pub struct BackendOptions {
    /// Archive lister used for type 1 images.
    pub listing_tool: PathBuf,
    /// FUSE daemon for dwarfs payloads, invoked as `<tool> <image> <mnt> -o offset=<n>`.
    pub mount_tool: PathBuf,
    /// Invoked as `<tool> -u <mnt>`.
    pub unmount_tool: PathBuf,
    pub idle_unmount: Duration,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub extract_timeout: Duration,
    /// Parent of private extraction directories and mountpoints.
    pub work_dir: PathBuf,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            listing_tool: PathBuf::from("bsdtar"),
            mount_tool: PathBuf::from("dwarfs"),
            unmount_tool: PathBuf::from("fusermount"),
            idle_unmount: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
            extract_timeout: Duration::from_secs(120),
            work_dir: std::env::temp_dir(),
        }
    }
}

/// The backend serving one container.
#[derive(Debug)]
pub enum Backend {
    Listing(ListingBackend),
    Squashfs(SquashfsBackend),
    Extracted(ExtractedBackend),
    Mounted(MountBackend),
}

impl Backend {
    /// Pick and construct the backend for a detected container.
    pub fn select(path: &Path, detection: &Detection, options: &BackendOptions) -> Result<Self> {
        match detection.kind {
            ContainerKind::NotAContainer => Err(Error::NotAContainer(path.to_path_buf())),
            ContainerKind::Legacy => ListingBackend::open(path, options).map(Backend::Listing),
            ContainerKind::Modern => match detection.payload_format {
                PayloadFormat::Dwarfs => {
                    MountBackend::new(path, detection.payload_offset, options).map(Backend::Mounted)
                }
                _ => match SquashfsBackend::open(path, detection.payload_offset) {
                    Ok(backend) => Ok(Backend::Squashfs(backend)),
                    Err(e) => {
                        debug!(
                            "{}: squashfs reader declined ({}), extracting instead",
                            path.display(),
                            e
                        );
                        ExtractedBackend::open(path, options).map(Backend::Extracted)
                    }
                },
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Listing(_) => "listing",
            Backend::Squashfs(_) => "squashfs",
            Backend::Extracted(_) => "extracted",
            Backend::Mounted(_) => "mounted",
        }
    }

    fn inner(&self) -> &dyn ArchiveReader {
        match self {
            Backend::Listing(b) => b,
            Backend::Squashfs(b) => b,
            Backend::Extracted(b) => b,
            Backend::Mounted(b) => b,
        }
    }
}

impl ArchiveReader for Backend {
    fn read_file(&self, entry: &str) -> Result<Box<dyn Read + '_>> {
        self.inner().read_file(entry)
    }

    fn is_directory(&self, entry: &str) -> bool {
        self.inner().is_directory(entry)
    }

    fn list_directory(&self, entry: &str) -> Vec<String> {
        self.inner().list_directory(entry)
    }

    fn extract(&self, entry: &str, dest: &Path, resolve_symlinks: bool) -> Result<()> {
        self.inner().extract(entry, dest, resolve_symlinks)
    }

    fn resolve(&self, entry: &str) -> Result<String> {
        self.inner().resolve(entry)
    }
}

/// Follow a chain of symlinks inside the archive.
///
/// `read_link` returns the raw target when `entry` is a symlink. Relative
/// targets resolve against the link's directory. An absolute target points
/// outside the archive: with `stop_at_absolute` the last in-archive path is
/// returned, otherwise it is an error. Cycles and overlong chains fail.
pub(crate) fn follow_symlinks<F>(entry: &str, stop_at_absolute: bool, mut read_link: F) -> Result<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut current = entry.to_string();
    let mut seen = HashSet::new();
    seen.insert(current.clone());

    for _ in 0..MAX_SYMLINK_HOPS {
        let Some(target) = read_link(&current) else {
            return Ok(current);
        };

        if target.starts_with('/') {
            return if stop_at_absolute {
                Ok(current)
            } else {
                Err(Error::CannotResolve(format!("{} -> {}", current, target)))
            };
        }

        let (parent, _) = wildcard::split(&current);
        let next = wildcard::normalize(&wildcard::join(parent, &target));
        if !seen.insert(next.clone()) {
            return Err(Error::CannotResolve(format!("symlink cycle at {}", entry)));
        }
        current = next;
    }

    Err(Error::CannotResolve(format!(
        "more than {} symlinks from {}",
        MAX_SYMLINK_HOPS, entry
    )))
}

/// Poll until `path` is a non-empty directory or `timeout` passes.
pub(crate) fn wait_ready(path: &Path, timeout: Duration, interval: Duration) -> Result<()> {
    let started = Instant::now();
    loop {
        let ready = std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if ready {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(Error::Timeout {
                what: path.display().to_string(),
                waited: started.elapsed(),
            });
        }
        std::thread::sleep(interval);
    }
}

/// Run an external tool to completion, mapping spawn and exit failures to
/// `BackendUnavailable`.
pub(crate) fn run_tool(backend: &'static str, command: &mut Command) -> Result<Output> {
    let output = command
        .output()
        .map_err(|e| Error::unavailable(backend, format!("{:?}: {}", command.get_program(), e)))?;

    if !output.status.success() {
        return Err(Error::unavailable(
            backend,
            format!(
                "{:?} exited with {}: {}",
                command.get_program(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(output)
}

/// Wait for a child with an upper bound, killing it on timeout.
pub(crate) fn wait_bounded(
    backend: &'static str,
    mut child: Child,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return if status.success() {
                Ok(())
            } else {
                Err(Error::unavailable(backend, format!("exited with {}", status)))
            };
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Timeout {
                what: format!("{} process", backend),
                waited: started.elapsed(),
            });
        }
        std::thread::sleep(interval);
    }
}

/// Destination path for an extracted entry.
pub(crate) fn destination(dest: &Path, entry: &str) -> PathBuf {
    if entry.is_empty() {
        dest.to_path_buf()
    } else {
        dest.join(entry)
    }
}

/// Remove a file about to be replaced. A missing file is not an error.
pub(crate) fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
