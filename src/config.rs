use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Tunables for the ingestion engine
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Files above this size get a sampled digest instead of a full one
    pub hash_size_ceiling: u64,
    /// Bytes read from each of the head, middle and tail of a large file
    pub large_file_sample_size: u64,
    /// Upper bound on fingerprinting a single file, in seconds
    pub hash_timeout_secs: u64,
    /// Destination scan reports progress every this many files
    pub index_progress_interval: usize,
    pub quarantine_dir_name: String,
    pub recovery_log_name: String,
    /// Sort key given to files whose dominant color is unknown
    pub unknown_color_sort_key: f64,
    /// Numeric suffixes tried before giving up on a free file name
    pub max_name_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_size_ceiling: 100 * 1024 * 1024,
            large_file_sample_size: 1024 * 1024,
            hash_timeout_secs: 15,
            index_progress_interval: 5,
            quarantine_dir_name: "_FileRenamer_Quarantine".to_string(),
            recovery_log_name: "recovery_log.txt".to_string(),
            unknown_color_sort_key: 999.0,
            max_name_attempts: 10_000,
        }
    }
}

impl EngineConfig {
    /// Load a config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn hash_timeout(&self) -> Duration {
        Duration::from_secs(self.hash_timeout_secs)
    }
}
