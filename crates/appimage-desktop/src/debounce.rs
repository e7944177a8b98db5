//! Per-path settle timers.
//!
//! A burst of writes to one file restarts its timer instead of queueing
//! work; only when a path has been quiet for the settle window is it
//! reported on the output channel.

use log::trace;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default settle window.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

type Timers = HashMap<PathBuf, (u64, JoinHandle<()>)>;

pub struct Debouncer {
    settle: Duration,
    timers: Arc<Mutex<Timers>>,
    generation: u64,
    settled_tx: mpsc::UnboundedSender<PathBuf>,
}

impl Debouncer {
    /// Returns the debouncer and the channel settled paths arrive on.
    pub fn new(settle: Duration) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            settle,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: 0,
            settled_tx: tx,
        };
        (debouncer, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Timers> {
        lock_timers(&self.timers)
    }

    /// Start or restart the timer for `path`. Must run inside a tokio runtime.
    pub fn touch(&mut self, path: PathBuf) {
        self.generation += 1;
        let generation = self.generation;

        let mut timers = self.lock();
        if let Some((_, previous)) = timers.remove(&path) {
            trace!("Restarting settle timer for {}", path.display());
            previous.abort();
        }

        let table = Arc::clone(&self.timers);
        let tx = self.settled_tx.clone();
        let settle = self.settle;
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            // A timer that lost a race with a restart must not fire.
            let current = {
                let mut timers = lock_timers(&table);
                match timers.get(&key) {
                    Some((g, _)) if *g == generation => {
                        timers.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                let _ = tx.send(key);
            }
        });
        timers.insert(path, (generation, handle));
    }

    /// Drop a pending timer. Returns whether one was pending.
    pub fn cancel(&self, path: &Path) -> bool {
        match self.lock().remove(path) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.lock().drain() {
            handle.abort();
        }
    }
}

fn lock_timers(timers: &Mutex<Timers>) -> MutexGuard<'_, Timers> {
    timers.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_burst_settles_once() {
        let (mut debouncer, mut rx) = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("/apps/A.AppImage");

        for _ in 0..5 {
            debouncer.touch(path.clone());
            sleep(Duration::from_millis(40)).await;
        }
        assert!(debouncer.is_pending(&path));

        let settled = timeout(Duration::from_millis(150), rx.recv()).await.unwrap();
        assert_eq!(settled, Some(path.clone()));
        assert_eq!(debouncer.pending(), 0);

        assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_are_independent() {
        let (mut debouncer, mut rx) = Debouncer::new(Duration::from_millis(100));
        debouncer.touch(PathBuf::from("/apps/A.AppImage"));
        sleep(Duration::from_millis(60)).await;
        debouncer.touch(PathBuf::from("/apps/B.AppImage"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, PathBuf::from("/apps/A.AppImage"));
        assert_eq!(second, PathBuf::from("/apps/B.AppImage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (mut debouncer, mut rx) = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("/apps/A.AppImage");
        debouncer.touch(path.clone());

        assert!(debouncer.cancel(&path));
        assert!(!debouncer.cancel(&path));
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    }
}
