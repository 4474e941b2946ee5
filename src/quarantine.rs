use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{IngestError, Result};
use crate::utils::{split_extension, unique_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineReason {
    /// Same content already present in the destination folder
    Duplicate,
    /// Same content as a file placed earlier in this batch
    BatchDuplicate,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::Duplicate => "duplicate",
            QuarantineReason::BatchDuplicate => "batch_duplicate",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the recovery log
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineRecord {
    pub timestamp: DateTime<Utc>,
    pub original_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub reason: QuarantineReason,
}

impl fmt::Display for QuarantineRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - Moved: {} -> {} (Reason: {})",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.original_path.display(),
            self.quarantine_path.display(),
            self.reason
        )
    }
}

/// Moves duplicates aside instead of deleting them
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir_name: String,
    log_name: String,
    max_name_attempts: u32,
}

impl Quarantine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dir_name: config.quarantine_dir_name.clone(),
            log_name: config.recovery_log_name.clone(),
            max_name_attempts: config.max_name_attempts,
        }
    }

    /// Quarantine folder that would hold `path`
    pub fn folder_for(&self, path: &Path) -> PathBuf {
        path.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.dir_name)
    }

    /// Move `path` into the quarantine folder next to it and log the move.
    ///
    /// The new name is `<stem>_<reason>_<timestamp><ext>`. The file is
    /// renamed, never copied or deleted.
    pub fn quarantine(&self, path: &Path, reason: QuarantineReason) -> Result<PathBuf> {
        let failed = |reason: String| IngestError::QuarantineFailed {
            path: path.to_path_buf(),
            reason,
        };

        let folder = self.folder_for(path);
        fs::create_dir_all(&folder)
            .map_err(|e| failed(format!("cannot create {}: {e}", folder.display())))?;

        let now = Utc::now();
        let stamp = now
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        let (stem, ext) = split_extension(path);
        let target = unique_path(
            &folder,
            &format!("{stem}_{reason}_{stamp}"),
            &ext,
            None,
            self.max_name_attempts,
        )
        .map_err(|e| failed(e.to_string()))?;

        fs::rename(path, &target).map_err(|e| failed(e.to_string()))?;
        info!("Moved to quarantine: {} -> {}", path.display(), target.display());

        let record = QuarantineRecord {
            timestamp: now,
            original_path: path.to_path_buf(),
            quarantine_path: target.clone(),
            reason,
        };
        // The file is already safe; a lost log line is not worth failing over.
        if let Err(e) = self.append_log(&folder, &record) {
            warn!("Could not update recovery log in {}: {e:#}", folder.display());
        }

        Ok(target)
    }

    fn append_log(&self, folder: &Path, record: &QuarantineRecord) -> anyhow::Result<()> {
        let log_path = folder.join(&self.log_name);
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open {}", log_path.display()))?;
        writeln!(log, "{record}").with_context(|| format!("Failed to write {}", log_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn quarantined_file_is_moved_not_deleted() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("IMG_1.jpg");
        fs::write(&original, b"dup").unwrap();

        let quarantine = Quarantine::new(&EngineConfig::default());
        let moved = quarantine
            .quarantine(&original, QuarantineReason::Duplicate)
            .unwrap();

        assert!(!original.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"dup");
        assert_eq!(moved.parent().unwrap(), dir.path().join("_FileRenamer_Quarantine"));
        let name = moved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("IMG_1_duplicate_"));
        assert!(name.ends_with(".jpg"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn recovery_log_is_appended() {
        let dir = tempdir().unwrap();
        let quarantine = Quarantine::new(&EngineConfig::default());
        for name in ["a.jpg", "b.jpg"] {
            let path = dir.path().join(name);
            fs::write(&path, name).unwrap();
            quarantine
                .quarantine(&path, QuarantineReason::BatchDuplicate)
                .unwrap();
        }

        let log = fs::read_to_string(
            dir.path()
                .join("_FileRenamer_Quarantine")
                .join("recovery_log.txt"),
        )
        .unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" - Moved: "));
        assert!(lines[0].ends_with("(Reason: batch_duplicate)"));
        assert!(lines[1].contains("b.jpg"));
    }

    #[test]
    fn missing_source_fails_cleanly() {
        let dir = tempdir().unwrap();
        let quarantine = Quarantine::new(&EngineConfig::default());
        let err = quarantine
            .quarantine(&dir.path().join("ghost.jpg"), QuarantineReason::Duplicate)
            .unwrap_err();
        assert!(matches!(err, IngestError::QuarantineFailed { .. }));
    }
}
