//! Error types for appimage-desktop

use crate::identity::ArtifactKind;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Integration errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Container(#[from] appimage_reader::Error),

    #[error("Failed to write {kind} for {path}: {reason}")]
    Artifact {
        kind: ArtifactKind,
        path: PathBuf,
        reason: String,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The file was not a container (or its header was unusable).
    pub fn is_detection_failure(&self) -> bool {
        matches!(self, Error::Container(e) if e.is_detection_failure())
    }
}
