use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{IngestError, Result};
use crate::fingerprint::Fingerprinter;
use crate::flatten::flatten_folder;
use crate::index::DestinationIndex;
use crate::media::is_media_file;
use crate::metadata::{ImageMetadataOracle, MetadataOracle};
use crate::naming::{IdentifierGenerator, Namer};
use crate::ordering::order;
use crate::progress::{NullSink, ProgressSink, Reporter};
use crate::transfer::{PlacementOutcome, PlacementPlan, TransferEngine};
use crate::utils::{display_name, resolve_path};
use crate::{Mode, SortBy, TransferResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    InPlace,
    Move,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub file_paths: Vec<PathBuf>,
    #[serde(default)]
    pub destination_folder: Option<PathBuf>,
    pub mode: ModeKind,
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_into_folders: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<TransferResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenRequest {
    pub folder_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenSummary {
    pub total_files_extracted: usize,
    pub total_folders_deleted: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenResponse {
    pub success: bool,
    pub results: FlattenSummary,
}

/// Holds the busy flag for the lifetime of one batch
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IngestError::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs batches one at a time.
///
/// A second `process` call while one is running is turned away with a busy
/// error instead of waiting. Files inside a batch are handled strictly in
/// sort order, so the first file of a content group always wins.
pub struct BatchCoordinator {
    config: EngineConfig,
    fingerprinter: Fingerprinter,
    oracle: Arc<dyn MetadataOracle>,
    namer: Namer,
    sink: Arc<dyn ProgressSink>,
    busy: AtomicBool,
}

impl BatchCoordinator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            fingerprinter: Fingerprinter::new(&config),
            config,
            oracle: Arc::new(ImageMetadataOracle::default()),
            namer: Namer::default(),
            sink: Arc::new(NullSink),
            busy: AtomicBool::new(false),
        }
    }

    pub fn set_oracle(&mut self, oracle: Arc<dyn MetadataOracle>) {
        self.oracle = oracle;
    }

    pub fn set_generator(&mut self, generator: Box<dyn IdentifierGenerator>) {
        self.namer.set_generator(generator);
    }

    pub fn set_sink(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sink = sink;
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run a batch and fold every outcome into the response shape
    pub fn process(&self, request: BatchRequest) -> BatchResponse {
        match self.run_batch(request) {
            Ok(results) => BatchResponse {
                success: true,
                results: Some(results),
                error: None,
            },
            Err(e) => {
                Reporter::new(self.sink.as_ref()).error(e.to_string());
                BatchResponse {
                    success: false,
                    results: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn run_batch(&self, request: BatchRequest) -> Result<TransferResult> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let reporter = Reporter::new(self.sink.as_ref());

        let mode = resolve_mode(&request)?;
        // A path listed twice is still one file.
        let mut listed = HashSet::new();
        let media_files: Vec<PathBuf> = request
            .file_paths
            .into_iter()
            .filter(|path| is_media_file(path))
            .filter(|path| listed.insert(resolve_path(path)))
            .collect();
        if media_files.is_empty() {
            return Err(IngestError::NoMediaFiles);
        }

        let mut results = TransferResult::new(media_files.len());
        info!(files = media_files.len(), ?mode, sort_by = ?request.sort_by, "Starting batch");

        let index = match &mode {
            Mode::Move(destination) => {
                reporter.phase("Scanning destination folder...");
                DestinationIndex::build(
                    destination,
                    &self.fingerprinter,
                    self.config.index_progress_interval,
                    &reporter,
                )
            }
            Mode::InPlace => DestinationIndex::new(),
        };

        let (mut records, load_errors) = order(
            &media_files,
            request.sort_by,
            self.oracle.as_ref(),
            &self.config,
            &reporter,
        );
        results.errors.extend(load_errors);

        let mut engine = TransferEngine::new(
            PlacementPlan {
                mode,
                sort_by: request.sort_by,
                sort_into_folders: request.sort_into_folders,
            },
            index,
            &self.fingerprinter,
            &self.namer,
            &self.config,
            reporter,
        );

        let total = records.len();
        for (position, record) in records.iter().enumerate() {
            reporter.file_progress(position + 1, total);
            let name = record.file_name();

            if !record.is_file {
                results.skipped_files += 1;
                results.add_error(format!("Skipped non-file: {name}"));
                continue;
            }

            match engine.place(record) {
                PlacementOutcome::Placed { secret_error, .. } => {
                    results.files_renamed += 1;
                    if let Some(error) = secret_error {
                        results.add_error(error);
                    }
                }
                PlacementOutcome::Quarantined { .. } => {
                    results.duplicates_quarantined += 1;
                    results.quarantined_file_names.push(name);
                }
                PlacementOutcome::QuarantineFailed { error, .. } => {
                    results.add_error(format!("Failed to quarantine duplicate: {name} ({error})"));
                }
                PlacementOutcome::Failed(error) => {
                    reporter.error(format!("Error processing {}: {error}", record.source_path.display()));
                    results.add_error(format!("Failed to process {name}: {error}"));
                }
            }
        }

        reporter.success(format!(
            "Batch complete: {} renamed, {} duplicates quarantined, {} errors",
            results.files_renamed,
            results.duplicates_quarantined,
            results.error_count()
        ));
        Ok(results)
    }

    /// Flatten each dropped folder into its parent
    pub fn flatten(&self, request: FlattenRequest) -> FlattenResponse {
        let reporter = Reporter::new(self.sink.as_ref());
        let mut summary = FlattenSummary::default();

        for folder in &request.folder_paths {
            let result = flatten_folder(folder, &self.config, &reporter);
            summary.total_files_extracted += result.files_extracted;
            summary.total_folders_deleted += result.folders_deleted;
            summary.errors.extend(result.errors);
            info!(
                folder = %display_name(folder),
                extracted = result.files_extracted,
                deleted = result.folders_deleted,
                "Flattened folder"
            );
        }

        FlattenResponse {
            success: true,
            results: summary,
        }
    }
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn resolve_mode(request: &BatchRequest) -> Result<Mode> {
    match request.mode {
        ModeKind::InPlace => Ok(Mode::InPlace),
        ModeKind::Move => {
            let destination = request
                .destination_folder
                .clone()
                .ok_or(IngestError::MissingDestination)?;
            let metadata = fs::metadata(&destination)
                .map_err(|_| IngestError::DestinationUnavailable(destination.clone()))?;
            if !metadata.is_dir() {
                return Err(IngestError::DestinationNotDirectory(destination));
            }
            Ok(Mode::Move(destination))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn request(paths: Vec<PathBuf>) -> BatchRequest {
        BatchRequest {
            file_paths: paths,
            destination_folder: None,
            mode: ModeKind::InPlace,
            sort_by: SortBy::Date,
            sort_into_folders: false,
        }
    }

    #[test]
    fn request_wire_shape() {
        let json = r#"{
            "filePaths": ["/a/b.jpg"],
            "destinationFolder": null,
            "mode": "inplace",
            "sortBy": "identifier",
            "sortIntoFolders": true
        }"#;
        let request: BatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.mode, ModeKind::InPlace);
        assert_eq!(request.sort_by, SortBy::Identifier);
        assert!(request.sort_into_folders);
    }

    #[test]
    fn busy_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        {
            let _held = BusyGuard::acquire(&flag).unwrap();
            assert!(matches!(BusyGuard::acquire(&flag), Err(IngestError::Busy)));
        }
        assert!(!flag.load(Ordering::Acquire));
        assert!(BusyGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn busy_coordinator_rejects_without_touching_files() {
        let coordinator = Arc::new(BatchCoordinator::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"a").unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let holder = {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _guard = BusyGuard::acquire(&coordinator.busy).unwrap();
                barrier.wait();
                barrier.wait();
            })
        };

        barrier.wait();
        let response = coordinator.process(request(vec![path.clone()]));
        barrier.wait();
        holder.join().unwrap();

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(IngestError::Busy.to_string().as_str()));
        assert!(path.exists());
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn validation_failures_release_the_guard() {
        let coordinator = BatchCoordinator::default();

        let response = coordinator.process(request(vec![PathBuf::from("notes.txt")]));
        assert!(!response.success);
        assert!(response.results.is_none());
        assert!(!coordinator.is_busy());

        let mut moving = request(vec![PathBuf::from("a.jpg")]);
        moving.mode = ModeKind::Move;
        let response = coordinator.process(moving);
        assert_eq!(
            response.error.as_deref(),
            Some("A destination folder is required in move mode.")
        );
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn destination_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir.jpg");
        fs::write(&file, b"x").unwrap();

        let mut moving = request(vec![file.clone()]);
        moving.mode = ModeKind::Move;
        moving.destination_folder = Some(file.clone());
        assert!(matches!(resolve_mode(&moving), Err(IngestError::DestinationNotDirectory(_))));

        moving.destination_folder = Some(dir.path().join("missing"));
        assert!(matches!(resolve_mode(&moving), Err(IngestError::DestinationUnavailable(_))));
    }

    #[test]
    fn path_listed_twice_is_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"a").unwrap();

        let mut coordinator = BatchCoordinator::default();
        coordinator.set_oracle(Arc::new(crate::metadata::NullMetadataOracle));
        let response = coordinator.process(request(vec![path.clone(), path]));

        let results = response.results.unwrap();
        assert_eq!(results.total_files, 1);
        assert_eq!(results.files_renamed, 1);
        assert_eq!(results.duplicates_quarantined, 0);
        assert!(results.errors.is_empty());
    }

    #[test]
    fn response_wire_shape() {
        let response = BatchResponse {
            success: false,
            results: None,
            error: Some("boom".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"success":false,"error":"boom"}"#
        );
    }
}
