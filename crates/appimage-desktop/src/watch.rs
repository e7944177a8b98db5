//! Watch/debounce front end.
//!
//! Turns raw filesystem notifications into registry calls:
//!
//! - write/create of a matching file → settle timer → `sync_path`
//! - remove/rename of a matching file → immediate `remove`
//! - remove/rename of a watched directory → bulk resync of that directory
//! - every `resync` interval → watch directories that appeared, drop the
//!   ones that vanished, prune stale entries

use crate::debounce::{DEFAULT_SETTLE, Debouncer};
use crate::error::Result;
use crate::paths;
use crate::registry::Registry;
use log::{debug, info, warn};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the notification channel between notify and the front end.
pub const EVENT_CAPACITY: usize = 256;

pub const DEFAULT_RESYNC: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Write,
    Create,
    Remove,
    Rename,
}

/// One filesystem change, as consumed by the front end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl FsEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Convert a notify event. A rename carrying both ends becomes a
    /// `Rename` of the source and a `Create` of the destination.
    pub fn from_notify(event: &notify::Event) -> Vec<FsEvent> {
        let all = |kind: ChangeKind| -> Vec<FsEvent> {
            event
                .paths
                .iter()
                .map(|p| FsEvent::new(p.clone(), kind))
                .collect()
        };

        match &event.kind {
            EventKind::Create(_) => all(ChangeKind::Create),
            EventKind::Remove(_) => all(ChangeKind::Remove),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut events = Vec::new();
                if let Some(from) = event.paths.first() {
                    events.push(FsEvent::new(from.clone(), ChangeKind::Rename));
                }
                if let Some(to) = event.paths.get(1) {
                    events.push(FsEvent::new(to.clone(), ChangeKind::Create));
                }
                events
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Rename),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Create),
            // Unpaired rename: the path tells which end we saw.
            EventKind::Modify(ModifyKind::Name(_)) => event
                .paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Create
                    } else {
                        ChangeKind::Rename
                    };
                    FsEvent::new(p.clone(), kind)
                })
                .collect(),
            EventKind::Modify(_) => all(ChangeKind::Write),
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => all(ChangeKind::Write),
            _ => Vec::new(),
        }
    }
}

/// Non-recursive directory watching.
pub trait DirWatcher: Send {
    fn watch(&mut self, dir: &Path) -> Result<()>;
    fn unwatch(&mut self, dir: &Path) -> Result<()>;
}

impl DirWatcher for RecommendedWatcher {
    fn watch(&mut self, dir: &Path) -> Result<()> {
        Watcher::watch(self, dir, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    fn unwatch(&mut self, dir: &Path) -> Result<()> {
        Watcher::unwatch(self, dir)?;
        Ok(())
    }
}

/// A notify watcher forwarding converted events into `tx`.
pub fn notify_watcher(tx: mpsc::Sender<FsEvent>) -> Result<RecommendedWatcher> {
    let watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for change in FsEvent::from_notify(&event) {
                    if tx.blocking_send(change).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("File watcher error: {}", e),
        },
        Config::default(),
    )?;
    Ok(watcher)
}

#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Directories watched (non-recursively) whenever they exist.
    pub dirs: Vec<PathBuf>,
    /// Roots scanned for `<mount>/Applications` on removable media.
    pub media_roots: Vec<PathBuf>,
    pub settle: Duration,
    pub resync: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            dirs: paths::default_watch_dirs(),
            media_roots: paths::media_roots(),
            settle: DEFAULT_SETTLE,
            resync: DEFAULT_RESYNC,
        }
    }
}

/// Owns the settle timers, the directory watches and a handle on the registry.
pub struct Frontend {
    registry: Arc<Registry>,
    options: WatchOptions,
    watcher: Box<dyn DirWatcher>,
    watched: BTreeSet<PathBuf>,
    debouncer: Debouncer,
    settled: mpsc::UnboundedReceiver<PathBuf>,
}

impl Frontend {
    pub fn new(registry: Arc<Registry>, options: WatchOptions, watcher: Box<dyn DirWatcher>) -> Self {
        let (debouncer, settled) = Debouncer::new(options.settle);
        Self {
            registry,
            options,
            watcher,
            watched: BTreeSet::new(),
            debouncer,
            settled,
        }
    }

    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }

    /// Directories that should be watched right now.
    pub fn target_dirs(&self) -> BTreeSet<PathBuf> {
        let mut dirs: BTreeSet<PathBuf> = self
            .options
            .dirs
            .iter()
            .filter(|d| d.is_dir())
            .cloned()
            .collect();
        dirs.extend(paths::media_application_dirs(&self.options.media_roots));
        dirs
    }

    /// Route one change. Returns the registry task it started, if any.
    pub fn handle(&mut self, event: FsEvent) -> Option<JoinHandle<()>> {
        let FsEvent { path, kind } = event;
        let removal = matches!(kind, ChangeKind::Remove | ChangeKind::Rename);

        if removal && self.watched.contains(&path) {
            return Some(self.resync_dir(path));
        }
        if !self.registry.suffixes().matches(&path) {
            return None;
        }

        if removal {
            self.debouncer.cancel(&path);
            let registry = Arc::clone(&self.registry);
            Some(tokio::task::spawn_blocking(move || {
                registry.remove(&path);
            }))
        } else {
            self.debouncer.touch(path);
            None
        }
    }

    /// Next path whose settle window expired.
    pub async fn next_settled(&mut self) -> Option<PathBuf> {
        self.settled.recv().await
    }

    /// Bring the registry in line with the settled file at `path`.
    pub fn settle(&self, path: PathBuf) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = registry.sync_path(&path) {
                if e.is_detection_failure() {
                    debug!("{}: {}", path.display(), e);
                } else {
                    warn!("{}: {}", path.display(), e);
                }
            }
        })
    }

    /// A watched directory was removed or renamed.
    fn resync_dir(&mut self, dir: PathBuf) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        if dir.is_dir() {
            return tokio::task::spawn_blocking(move || {
                if let Err(e) = registry.add_dir(&dir) {
                    warn!("{}: {}", dir.display(), e);
                }
            });
        }

        info!("{} vanished", dir.display());
        self.watched.remove(&dir);
        let _ = self.watcher.unwatch(&dir);
        tokio::task::spawn_blocking(move || {
            registry.remove_prefix(&dir);
        })
    }

    /// Reconcile watches with the directories on disk and bulk-sync the
    /// ones that appeared.
    pub fn resync(&mut self) -> JoinHandle<()> {
        let targets = self.target_dirs();

        let vanished: Vec<PathBuf> = self.watched.difference(&targets).cloned().collect();
        for dir in &vanished {
            info!("No longer watching {}", dir.display());
            let _ = self.watcher.unwatch(dir);
            self.watched.remove(dir);
        }

        let mut appeared = Vec::new();
        for dir in targets.difference(&self.watched.clone()) {
            match self.watcher.watch(dir) {
                Ok(()) => {
                    info!("Watching {}", dir.display());
                    self.watched.insert(dir.clone());
                    appeared.push(dir.clone());
                }
                Err(e) => debug!("Cannot watch {}: {}", dir.display(), e),
            }
        }

        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || {
            for dir in &vanished {
                registry.remove_prefix(dir);
            }
            for dir in &appeared {
                match registry.add_dir(dir) {
                    Ok(report) if report.changed() => info!("{}: {:?}", dir.display(), report),
                    Ok(_) => {}
                    Err(e) => warn!("{}: {}", dir.display(), e),
                }
            }
            registry.prune();
        })
    }

    /// Process events until `events` closes or `shutdown` resolves.
    pub async fn run<F>(mut self, mut events: mpsc::Receiver<FsEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut resync = tokio::time::interval(self.options.resync);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Front end shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle(event);
                    }
                    None => break,
                },
                Some(path) = self.settled.recv() => {
                    self.settle(path);
                }
                _ = resync.tick() => {
                    self.resync();
                }
            }
        }
    }
}
