//! The integration registry: which containers are integrated right now.
//!
//! The path map is the only shared mutable state of the daemon. Every
//! mutating call holds its lock from first check to final insert, so
//! concurrent calls for the same path serialize and the artifacts on disk
//! always match the map once a call returns.

use crate::error::{Error, Result};
use crate::filter::SuffixFilter;
use crate::identity::{ArtifactIds, ArtifactLayout};
use crate::integrator::Integrator;
use appimage_reader::{Container, ContainerKind, ContainerOptions};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// Events emitted when the set of integrated containers changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    TopologyChanged,
}

/// What a single-path call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    /// The file changed on disk and was integrated again.
    Updated,
    Removed,
    Unchanged,
}

impl Change {
    pub fn is_change(self) -> bool {
        self != Change::Unchanged
    }
}

/// Counts of a bulk directory operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Matching names that turned out not to be containers.
    pub not_containers: usize,
    pub failed: usize,
}

impl BulkReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }

    fn record(&mut self, change: Change) {
        match change {
            Change::Added => self.added += 1,
            Change::Updated => self.updated += 1,
            Change::Removed => self.removed += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }
}

/// Summary of a registered container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub path: PathBuf,
    pub kind: ContainerKind,
    pub name: String,
    pub version: String,
    pub update_locator: String,
    pub artifacts: ArtifactIds,
}

#[derive(Clone, Debug, Default)]
pub struct RegistryOptions {
    pub container: ContainerOptions,
    /// Which names `add_dir` considers.
    pub suffixes: SuffixFilter,
}

/// What stays behind once a container is integrated. The container handle
/// itself, and with it any extraction or mount, is gone by then.
struct Entry {
    info: EntryInfo,
    modified: Option<SystemTime>,
}

/// Undoes a partial integration unless disarmed.
struct Rollback<'a> {
    integrator: &'a dyn Integrator,
    ids: &'a ArtifactIds,
    armed: bool,
}

impl Rollback<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Rolling back artifacts {}", self.ids.digest);
            if let Err(e) = self.integrator.unintegrate(self.ids) {
                warn!("Rollback incomplete: {}", e);
            }
        }
    }
}

/// Path to integrated container mapping.
pub struct Registry {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    integrator: Arc<dyn Integrator>,
    layout: ArtifactLayout,
    options: RegistryOptions,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new(
        integrator: Arc<dyn Integrator>,
        layout: ArtifactLayout,
        options: RegistryOptions,
    ) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            entries: Mutex::new(HashMap::new()),
            integrator,
            layout,
            options,
            event_tx: tx,
        }
    }

    /// Subscribe to topology changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    pub fn suffixes(&self) -> &SuffixFilter {
        &self.options.suffixes
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        // No subscribers is fine.
        let _ = self.event_tx.send(RegistryEvent::TopologyChanged);
    }

    /// Integrate the container at `path`.
    ///
    /// A registered path whose modification time is unchanged is left alone.
    /// Detection and artifact failures leave nothing registered.
    pub fn add(&self, path: &Path) -> Result<Change> {
        let path = std::path::absolute(path)?;
        let mut entries = self.lock();
        let mut removed_stale = false;
        let result = self.add_locked(&mut entries, &path, &mut removed_stale);
        drop(entries);

        if removed_stale || matches!(result, Ok(change) if change.is_change()) {
            self.notify();
        }
        result
    }

    fn add_locked(
        &self,
        entries: &mut HashMap<PathBuf, Entry>,
        path: &Path,
        removed_stale: &mut bool,
    ) -> Result<Change> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if let Some(entry) = entries.get(path) {
            if modified.is_some() && entry.modified == modified {
                return Ok(Change::Unchanged);
            }
            debug!("{} changed on disk", path.display());
            *removed_stale = self.remove_locked(entries, path);
        }

        let container = Container::open(path, &self.options.container)?;
        let ids = self.layout.ids_for(container.path());

        let rollback = Rollback {
            integrator: self.integrator.as_ref(),
            ids: &ids,
            armed: true,
        };
        let report = self.integrator.integrate(&container, &ids);
        if let Some(e) = report.failure(&ids) {
            return Err(e);
        }
        rollback.disarm();

        info!(
            "Integrated {} ({} {}, {})",
            path.display(),
            container.display_name(),
            container.version(),
            container.kind().as_str()
        );
        let info = EntryInfo {
            path: path.to_path_buf(),
            kind: container.kind(),
            name: container.name().to_string(),
            version: container.version().to_string(),
            update_locator: container.update_locator().to_string(),
            artifacts: ids,
        };
        drop(container);
        entries.insert(path.to_path_buf(), Entry { info, modified });

        Ok(if *removed_stale {
            Change::Updated
        } else {
            Change::Added
        })
    }

    /// Remove the artifacts and entry of `path`. Unknown paths are a no-op;
    /// returns whether an entry was removed.
    pub fn remove(&self, path: &Path) -> bool {
        let Ok(path) = std::path::absolute(path) else {
            return false;
        };
        let removed = self.remove_locked(&mut self.lock(), &path);
        if removed {
            self.notify();
        }
        removed
    }

    fn remove_locked(&self, entries: &mut HashMap<PathBuf, Entry>, path: &Path) -> bool {
        let Some(entry) = entries.remove(path) else {
            return false;
        };
        if let Err(e) = self.integrator.unintegrate(&entry.info.artifacts) {
            warn!("{}: {}", path.display(), e);
        }
        info!("Unintegrated {}", path.display());
        true
    }

    /// Add the container at `path` if it is one, otherwise make sure it is
    /// not registered.
    pub fn sync_path(&self, path: &Path) -> Result<Change> {
        let path = std::path::absolute(path)?;
        let mut entries = self.lock();
        let result = self.sync_locked(&mut entries, &path);
        drop(entries);

        if matches!(result, Ok(change) if change.is_change()) {
            self.notify();
        }
        result
    }

    fn sync_locked(&self, entries: &mut HashMap<PathBuf, Entry>, path: &Path) -> Result<Change> {
        let mut removed_stale = false;
        match self.add_locked(entries, path, &mut removed_stale) {
            Err(e) if e.is_detection_failure() => {
                if removed_stale || self.remove_locked(entries, path) {
                    Ok(Change::Removed)
                } else {
                    Ok(Change::Unchanged)
                }
            }
            Err(e) if removed_stale => {
                warn!("{}: {}", path.display(), e);
                Ok(Change::Removed)
            }
            other => other,
        }
    }

    /// Sync every matching file directly inside `dir` (not recursive).
    pub fn add_dir(&self, dir: &Path) -> Result<BulkReport> {
        let dir = std::path::absolute(dir)?;
        let files = self.matching_files(&dir)?;

        let mut report = BulkReport::default();
        {
            let mut entries = self.lock();
            for path in files {
                let known = entries.contains_key(&path);
                match self.sync_locked(&mut entries, &path) {
                    // An unknown path only stays unchanged when it failed detection.
                    Ok(Change::Unchanged) if !known => report.not_containers += 1,
                    Ok(change) => report.record(change),
                    Err(e) => {
                        warn!("{}: {}", path.display(), e);
                        report.failed += 1;
                    }
                }
            }
        }

        debug!("{}: {:?}", dir.display(), report);
        if report.changed() {
            self.notify();
        }
        Ok(report)
    }

    /// Remove every entry directly inside `dir` (not recursive).
    pub fn remove_dir(&self, dir: &Path) -> BulkReport {
        let Ok(dir) = std::path::absolute(dir) else {
            return BulkReport::default();
        };
        self.remove_where(|path| path.parent() == Some(dir.as_path()))
    }

    /// Remove every entry anywhere below `dir`.
    pub fn remove_prefix(&self, dir: &Path) -> BulkReport {
        let Ok(dir) = std::path::absolute(dir) else {
            return BulkReport::default();
        };
        self.remove_where(|path| path.starts_with(&dir) && path != dir.as_path())
    }

    /// Remove entries whose files no longer exist.
    pub fn prune(&self) -> BulkReport {
        self.remove_where(|path| !path.exists())
    }

    fn remove_where(&self, predicate: impl Fn(&Path) -> bool) -> BulkReport {
        let mut report = BulkReport::default();
        {
            let mut entries = self.lock();
            let doomed: Vec<PathBuf> = entries
                .keys()
                .filter(|path| predicate(path))
                .cloned()
                .collect();
            for path in doomed {
                if self.remove_locked(&mut entries, &path) {
                    report.removed += 1;
                }
            }
        }

        if report.changed() {
            self.notify();
        }
        report
    }

    fn matching_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            )));
        }

        let mut files = Vec::new();
        let walker = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && self.options.suffixes.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn artifacts(&self, path: &Path) -> Option<ArtifactIds> {
        self.lock().get(path).map(|entry| entry.info.artifacts.clone())
    }

    pub fn info(&self, path: &Path) -> Option<EntryInfo> {
        self.lock().get(path).map(|entry| entry.info.clone())
    }
}
