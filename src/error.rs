//! Error types for batch ingestion

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the ingestion engine.
///
/// The first group is batch-fatal: the coordinator returns immediately with
/// `success: false`. Everything else is per-file and ends up as a line in the
/// batch's error list while the batch carries on.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Another operation is already in progress. Please wait.")]
    Busy,

    #[error("A destination folder is required in move mode.")]
    MissingDestination,

    #[error("Destination folder does not exist or is not accessible: {0}")]
    DestinationUnavailable(PathBuf),

    #[error("Destination path is not a directory: {0}")]
    DestinationNotDirectory(PathBuf),

    #[error("No valid media files (images or videos) found.")]
    NoMediaFiles,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy verification failed for {target}: expected {expected} bytes, found {actual}")]
    VerificationFailed {
        target: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("No free file name for {base} in {dir} after {attempts} attempts")]
    CollisionExhausted {
        dir: PathBuf,
        base: String,
        attempts: u32,
    },

    #[error("Failed to quarantine {path}: {reason}")]
    QuarantineFailed { path: PathBuf, reason: String },

    #[error("{path} has no parent directory")]
    NoParent { path: PathBuf },
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_message_is_user_facing() {
        assert_eq!(
            IngestError::Busy.to_string(),
            "Another operation is already in progress. Please wait."
        );
    }
}
