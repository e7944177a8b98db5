//! Helpers for consuming broadcast channels.
//!
//! Services subscribe to `Registry::subscribe()` and react to bursts of
//! events as one unit: wait for the first, then drain whatever else queued.

use tokio::sync::broadcast::{Receiver, error::RecvError, error::TryRecvError};

/// Wait for the next event. `None` once the sender is gone.
/// A lagged receiver still counts as "something happened".
pub async fn next<T: Clone>(rx: &mut Receiver<T>) -> Option<()> {
    match rx.recv().await {
        Ok(_) | Err(RecvError::Lagged(_)) => Some(()),
        Err(RecvError::Closed) => None,
    }
}

/// Drain all pending events, returning how many were skipped.
/// Handles `Lagged` by continuing to drain.
pub fn drain_pending<T: Clone>(rx: &mut Receiver<T>) -> usize {
    let mut drained = 0;
    loop {
        match rx.try_recv() {
            Ok(_) => drained += 1,
            Err(TryRecvError::Lagged(n)) => drained += n as usize,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    drained
}
