use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::metadata::MetadataOracle;
use crate::progress::Reporter;
use crate::utils::display_name;
use crate::{MediaRecord, SortBy};

/// Stat a file and ask the oracle for its sort inputs
pub fn load_record(
    path: &Path,
    sort_by: SortBy,
    oracle: &dyn MetadataOracle,
    config: &EngineConfig,
) -> Result<MediaRecord> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to get metadata for {}", path.display()))?;

    let mut record = MediaRecord {
        source_path: path.to_path_buf(),
        size: metadata.len(),
        is_file: metadata.is_file(),
        modified: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
        created: metadata.created().ok(),
        captured_at: None,
        color: None,
        sort_key: 0.0,
    };

    if !record.is_file {
        return Ok(record);
    }

    // Names and date folders need the capture date in every mode.
    record.captured_at = oracle.capture_date(path);

    record.sort_key = match sort_by {
        SortBy::Color => {
            record.color = oracle.dominant_color(path);
            record
                .color
                .map(|hsl| hsl.hue)
                .unwrap_or(config.unknown_color_sort_key)
        }
        SortBy::Date | SortBy::Identifier => record.effective_date().timestamp_millis() as f64,
    };

    Ok(record)
}

/// Load every path and return the records in ascending sort-key order.
///
/// The sort is stable: equal keys keep their input order. Paths that cannot
/// be loaded are reported in the returned error list and left out.
pub fn order(
    paths: &[PathBuf],
    sort_by: SortBy,
    oracle: &dyn MetadataOracle,
    config: &EngineConfig,
    reporter: &Reporter<'_>,
) -> (Vec<MediaRecord>, Vec<String>) {
    if sort_by == SortBy::Color {
        reporter.phase("Analyzing image colors...");
    }

    let loaded: Vec<Result<MediaRecord>> = paths
        .par_iter()
        .map(|path| load_record(path, sort_by, oracle, config))
        .collect();

    let mut records = Vec::with_capacity(loaded.len());
    let mut errors = Vec::new();
    for (path, result) in paths.iter().zip(loaded) {
        match result {
            Ok(record) => {
                if let Some(color) = record.color {
                    reporter.info(format!("Analyzed {} - Color: {color}", record.file_name()));
                } else if sort_by == SortBy::Color && record.is_file {
                    reporter.info(format!("No dominant color for {}, sorting last", record.file_name()));
                }
                records.push(record);
            }
            Err(e) => {
                let message = format!("Failed to read {}: {e:#}", display_name(path));
                reporter.error(message.clone());
                errors.push(message);
            }
        }
    }

    records.sort_by(|a, b| a.sort_key.total_cmp(&b.sort_key));

    let criteria = match sort_by {
        SortBy::Color => "dominant color (hue)",
        SortBy::Date | SortBy::Identifier => "metadata/creation date",
    };
    reporter.log(format!("Sorted {} files by {criteria}", records.len()));

    (records, errors)
}
