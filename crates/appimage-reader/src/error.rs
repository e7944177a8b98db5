//! Error types for appimage-reader

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Container detection and archive access errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Detection
    #[error("not an AppImage: {}", .0.display())]
    NotAContainer(PathBuf),

    #[error("corrupt ELF header in {}: {reason}", .path.display())]
    CorruptHeader { path: PathBuf, reason: String },

    // Backends
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("squashfs error: {0}")]
    Squashfs(#[from] backhand::BackhandError),

    // Resolution
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("entry is a directory: {0}")]
    IsDirectory(String),

    #[error("cannot resolve symlink: {0}")]
    CannotResolve(String),
}

impl Error {
    /// True for errors that mean "this path is simply not something we integrate".
    pub fn is_detection_failure(&self) -> bool {
        matches!(self, Error::NotAContainer(_) | Error::CorruptHeader { .. })
    }

    /// Timeouts count as the backend being unavailable for that call.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. } | Error::Timeout { .. }
        )
    }

    pub(crate) fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }
}
