//! Mount backend for payloads served by an external FUSE daemon (dwarfs).
//!
//! The image is mounted on first use and unmounted after a period without
//! operations. A reaper thread waits on a channel of "touch" messages:
//! every operation sends one, restarting the idle countdown, and an
//! operation arriving after an unmount simply mounts again.

use super::{ArchiveReader, BackendOptions, PlainTree, run_tool, wait_ready};
use crate::error::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tempfile::TempDir;

const BACKEND: &str = "mounted";

struct Shared {
    source: PathBuf,
    offset: u64,
    options: BackendOptions,
    mountpoint: TempDir,
    mounted: Mutex<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.mounted.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mount(&self) -> Result<()> {
        debug!(
            "Mounting {} at {}",
            self.source.display(),
            self.mountpoint.path().display()
        );
        run_tool(
            BACKEND,
            Command::new(&self.options.mount_tool)
                .arg(&self.source)
                .arg(self.mountpoint.path())
                .arg("-o")
                .arg(format!("offset={}", self.offset)),
        )?;

        if let Err(e) = wait_ready(
            self.mountpoint.path(),
            self.options.ready_timeout,
            self.options.poll_interval,
        ) {
            self.unmount();
            return Err(e);
        }
        Ok(())
    }

    fn unmount(&self) -> bool {
        let result = run_tool(
            BACKEND,
            Command::new(&self.options.unmount_tool)
                .arg("-u")
                .arg(self.mountpoint.path()),
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to unmount {}: {}", self.mountpoint.path().display(), e);
                false
            }
        }
    }

    fn unmount_if_idle(&self) {
        let mut mounted = self.lock();
        if *mounted && self.unmount() {
            debug!("Unmounted idle {}", self.source.display());
            *mounted = false;
        }
    }
}

/// Mount-backed reader with idle unmounting.
pub struct MountBackend {
    shared: Arc<Shared>,
    tree: PlainTree,
    touch: Option<Sender<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl MountBackend {
    /// Prepare the mountpoint; nothing is mounted until the first operation.
    pub fn new(source: &Path, offset: u64, options: &BackendOptions) -> Result<Self> {
        let mountpoint = tempfile::Builder::new()
            .prefix("appimaged-mnt-")
            .tempdir_in(&options.work_dir)?;
        let tree = PlainTree::new(mountpoint.path());

        let shared = Arc::new(Shared {
            source: source.to_path_buf(),
            offset,
            options: options.clone(),
            mountpoint,
            mounted: Mutex::new(false),
        });

        let (tx, rx) = crossbeam_channel::unbounded();
        let reaper_shared = Arc::clone(&shared);
        let reaper = std::thread::Builder::new()
            .name("appimaged-unmount".into())
            .spawn(move || reaper_loop(reaper_shared, rx))?;

        Ok(Self {
            shared,
            tree,
            touch: Some(tx),
            reaper: Some(reaper),
        })
    }

    pub fn is_mounted(&self) -> bool {
        *self.shared.lock()
    }

    /// Run `op` against the live mount, mounting first if needed.
    fn with_mount<T>(&self, op: impl FnOnce(&PlainTree) -> Result<T>) -> Result<T> {
        let mut mounted = self.shared.lock();
        if !*mounted {
            self.shared.mount()?;
            *mounted = true;
        }
        if let Some(tx) = &self.touch {
            let _ = tx.send(());
        }
        op(&self.tree)
    }
}

fn reaper_loop(shared: Arc<Shared>, touches: Receiver<()>) {
    loop {
        match touches.recv_timeout(shared.options.idle_unmount) {
            Ok(()) => continue,
            Err(RecvTimeoutError::Timeout) => shared.unmount_if_idle(),
            Err(RecvTimeoutError::Disconnected) => {
                shared.unmount_if_idle();
                break;
            }
        }
    }
}

impl Drop for MountBackend {
    fn drop(&mut self) {
        // Closing the channel makes the reaper unmount and exit before the
        // mountpoint directory is removed.
        self.touch.take();
        if let Some(handle) = self.reaper.take() {
            let _ = handle.join();
        }
    }
}

impl ArchiveReader for MountBackend {
    fn read_file(&self, entry: &str) -> Result<Box<dyn Read + '_>> {
        self.with_mount(|tree| {
            let mut buf = Vec::new();
            tree.read_file(entry)?.read_to_end(&mut buf)?;
            Ok(Box::new(std::io::Cursor::new(buf)) as Box<dyn Read>)
        })
    }

    fn is_directory(&self, entry: &str) -> bool {
        self.with_mount(|tree| Ok(tree.is_directory(entry)))
            .unwrap_or(false)
    }

    fn list_directory(&self, entry: &str) -> Vec<String> {
        self.with_mount(|tree| Ok(tree.list_directory(entry)))
            .unwrap_or_default()
    }

    fn extract(&self, entry: &str, dest: &Path, resolve_symlinks: bool) -> Result<()> {
        self.with_mount(|tree| tree.extract(entry, dest, resolve_symlinks))
    }

    fn resolve(&self, entry: &str) -> Result<String> {
        self.with_mount(|tree| tree.resolve(entry))
    }
}

impl std::fmt::Debug for MountBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountBackend")
            .field("source", &self.shared.source)
            .field("mountpoint", &self.shared.mountpoint.path())
            .finish()
    }
}
