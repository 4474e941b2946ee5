pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod flatten;
pub mod index;
pub mod logging;
pub mod media;
pub mod metadata;
pub mod naming;
pub mod ordering;
pub mod progress;
pub mod quarantine;
pub mod transfer;
pub mod utils;

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub use config::EngineConfig;
pub use coordinator::{BatchCoordinator, BatchRequest, BatchResponse, FlattenRequest, FlattenResponse};
pub use error::IngestError;
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use flatten::{flatten_folder, FlattenResult};
pub use metadata::{Hsl, ImageMetadataOracle, MetadataOracle, NullMetadataOracle};
pub use naming::{Ed25519Generator, IdentifierGenerator, LocalIdentifierGenerator};
pub use progress::{ChannelSink, LogLevel, NullSink, ProgressEvent, ProgressSink};

/// How a batch names and orders its files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Order and name by capture date
    Date,
    /// Order by dominant hue, name by capture date
    Color,
    /// Order by capture date, name by a freshly minted identifier
    Identifier,
}

/// Where renamed files end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Rename next to the source (optionally inside a date subfolder)
    InPlace,
    /// Move into a separate destination folder
    Move(PathBuf),
}

/// One candidate file of a batch, loaded before any file is touched
#[derive(Debug, Clone)]
pub struct MediaRecord {
    pub source_path: PathBuf,
    pub size: u64,
    pub is_file: bool,
    pub modified: SystemTime,
    pub created: Option<SystemTime>,
    pub captured_at: Option<DateTime<Local>>,
    pub color: Option<Hsl>,
    pub sort_key: f64,
}

impl MediaRecord {
    /// Capture date if known, else birth time, else modification time
    pub fn effective_date(&self) -> DateTime<Local> {
        if let Some(captured) = self.captured_at {
            return captured;
        }
        DateTime::<Local>::from(self.created.unwrap_or(self.modified))
    }

    pub fn file_name(&self) -> String {
        utils::display_name(&self.source_path)
    }
}

/// Aggregate outcome of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub total_files: usize,
    pub files_renamed: usize,
    pub duplicates_quarantined: usize,
    pub quarantined_file_names: Vec<String>,
    pub skipped_files: usize,
    pub errors: Vec<String>,
}

impl TransferResult {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            ..Self::default()
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}
