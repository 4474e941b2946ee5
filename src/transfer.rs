//! Placement of one file: duplicate checks, naming, and the move itself.
//!
//! Cross-folder moves never use a bare rename. The file is copied into a
//! freshly created target, both sizes are compared, and only then is the
//! source removed.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{IngestError, Result};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::index::{DestinationIndex, Seen, SeenSet};
use crate::naming::{date_folder_name, Namer, SecretArtifact};
use crate::progress::Reporter;
use crate::quarantine::{Quarantine, QuarantineReason};
use crate::utils::{display_name, is_occupied, resolve_path, same_path, split_extension, unique_path_for};
use crate::{MediaRecord, Mode, SortBy};

/// How a unique file reached its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    /// Already carried its target name, nothing moved
    Unchanged,
    Renamed,
    VerifiedCopy,
}

#[derive(Debug)]
pub enum PlacementOutcome {
    Placed {
        target: PathBuf,
        method: TransferMethod,
        /// Set when the secret artifact could not be written
        secret_error: Option<String>,
    },
    Quarantined {
        reason: QuarantineReason,
        quarantine_path: PathBuf,
    },
    QuarantineFailed {
        reason: QuarantineReason,
        error: IngestError,
    },
    Failed(IngestError),
}

/// Options fixed for the whole batch
#[derive(Debug, Clone)]
pub struct PlacementPlan {
    pub mode: Mode,
    pub sort_by: SortBy,
    pub sort_into_folders: bool,
}

/// Per-batch placement state: the destination index and the seen-set
pub struct TransferEngine<'a> {
    plan: PlacementPlan,
    index: DestinationIndex,
    seen: SeenSet,
    fingerprinter: &'a Fingerprinter,
    namer: &'a Namer,
    quarantine: Quarantine,
    reporter: Reporter<'a>,
    max_name_attempts: u32,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        plan: PlacementPlan,
        index: DestinationIndex,
        fingerprinter: &'a Fingerprinter,
        namer: &'a Namer,
        config: &EngineConfig,
        reporter: Reporter<'a>,
    ) -> Self {
        Self {
            plan,
            index,
            seen: SeenSet::new(),
            fingerprinter,
            namer,
            quarantine: Quarantine::new(config),
            reporter,
            max_name_attempts: config.max_name_attempts,
        }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Run one record through duplicate detection and placement
    pub fn place(&mut self, record: &MediaRecord) -> PlacementOutcome {
        let fingerprint = self.fingerprinter.fingerprint(&record.source_path);
        let name = record.file_name();
        let resolved_source = resolve_path(&record.source_path);
        self.reporter
            .log(format!("Processing: {name} (hash: {}...)", fingerprint.short()));

        if let Some(existing) = self.index.get(&fingerprint) {
            if resolve_path(&existing.path) != resolved_source {
                let reason = if existing.placed_in_batch {
                    QuarantineReason::BatchDuplicate
                } else {
                    QuarantineReason::Duplicate
                };
                self.reporter.log(format!(
                    "✗ DUPLICATE FOUND: {name} matches existing {}",
                    existing.name
                ));
                return self.quarantine(record, reason);
            }
            self.reporter
                .log(format!("✓ SAME FILE: {name} - will rename in place"));
        }

        if self.seen.classify(&fingerprint, &resolved_source) == Seen::Duplicate {
            self.reporter.log(format!(
                "✗ DUPLICATE IN BATCH: {name} has same hash as earlier file"
            ));
            return self.quarantine(record, QuarantineReason::BatchDuplicate);
        }

        match self.place_unique(record, &fingerprint) {
            Ok((target, method, secret)) => {
                let secret_error = secret.and_then(|secret| self.write_secret(&secret, &target));
                self.seen.insert(fingerprint, resolved_source);
                PlacementOutcome::Placed {
                    target,
                    method,
                    secret_error,
                }
            }
            Err(e) => PlacementOutcome::Failed(e),
        }
    }

    fn quarantine(&self, record: &MediaRecord, reason: QuarantineReason) -> PlacementOutcome {
        let name = record.file_name();
        match self.quarantine.quarantine(&record.source_path, reason) {
            Ok(quarantine_path) => {
                self.reporter.log(format!("  ✓ MOVED TO QUARANTINE: {name}"));
                PlacementOutcome::Quarantined {
                    reason,
                    quarantine_path,
                }
            }
            Err(error) => {
                self.reporter
                    .error(format!("  ✗ FAILED to quarantine {name}: {error}"));
                PlacementOutcome::QuarantineFailed { reason, error }
            }
        }
    }

    fn place_unique(
        &mut self,
        record: &MediaRecord,
        fingerprint: &Fingerprint,
    ) -> Result<(PathBuf, TransferMethod, Option<SecretArtifact>)> {
        let source = &record.source_path;
        let source_dir = source
            .parent()
            .ok_or_else(|| IngestError::NoParent {
                path: source.clone(),
            })?
            .to_path_buf();

        let derived = self.namer.derive(record, self.plan.sort_by);
        let (_, ext) = split_extension(source);

        let base_dir = match &self.plan.mode {
            Mode::InPlace => source_dir.clone(),
            Mode::Move(destination) => destination.clone(),
        };
        let folder_name = date_folder_name(&record.effective_date());
        let already_filed = self.plan.mode == Mode::InPlace
            && source_dir.file_name().is_some_and(|name| name == folder_name.as_str());
        let target_dir = if self.plan.sort_into_folders && already_filed {
            source_dir.clone()
        } else if self.plan.sort_into_folders {
            let dated = base_dir.join(folder_name);
            fs::create_dir_all(&dated).map_err(|e| IngestError::io(&dated, e))?;
            dated
        } else {
            base_dir
        };

        let target = unique_path_for(
            &target_dir,
            &derived.base_name,
            &ext,
            None,
            self.max_name_attempts,
            Some(source),
        )?;
        let file_name = display_name(&target);
        let same_folder = same_path(&source_dir, &target_dir);

        let method = if same_path(source, &target) {
            self.reporter
                .log(format!("✓ Already named: {file_name}"));
            TransferMethod::Unchanged
        } else if same_folder || self.plan.mode == Mode::InPlace {
            rename_no_clobber(source, &target)?;
            if self.plan.mode == Mode::InPlace {
                self.reporter.success(format!(
                    "✓ Renamed in-place: {} → {file_name}",
                    record.file_name()
                ));
            } else {
                self.index.evict_path(source);
                self.reporter
                    .success(format!("✓ Renamed: {} → {file_name}", record.file_name()));
            }
            TransferMethod::Renamed
        } else {
            safe_move(source, &target)?;
            self.reporter.success(format!(
                "✓ Safely moved: {} → {file_name} (verified copy)",
                record.file_name()
            ));
            TransferMethod::VerifiedCopy
        };

        if matches!(self.plan.mode, Mode::Move(_)) {
            self.index
                .record_placement(fingerprint.clone(), &target, record.size);
        }

        Ok((target, method, derived.secret))
    }

    fn write_secret(&self, secret: &SecretArtifact, target: &Path) -> Option<String> {
        match secret.write_beside(target) {
            Ok(path) => {
                self.reporter
                    .success(format!("✓ Created private key file: {}", display_name(&path)));
                None
            }
            Err(e) => {
                self.reporter
                    .error(format!("Failed to create private key file: {e:#}"));
                Some(format!(
                    "Failed to create private key file for {}",
                    display_name(target)
                ))
            }
        }
    }
}

/// Rename, refusing to replace whatever sits at `target`
pub fn rename_no_clobber(source: &Path, target: &Path) -> Result<()> {
    if is_occupied(target).map_err(|e| IngestError::io(target, e))? {
        return Err(IngestError::io(
            target,
            io::Error::new(io::ErrorKind::AlreadyExists, "target already exists"),
        ));
    }
    fs::rename(source, target).map_err(|e| IngestError::io(source, e))
}

/// Copy into a new file at `target`, then verify sizes, then delete `source`.
///
/// A size mismatch leaves the copy in place for inspection and the source
/// untouched. Any other failure after the copy exists removes the copy.
pub fn safe_move(source: &Path, target: &Path) -> Result<()> {
    safe_move_checked(source, target, verify_copy)
}

fn safe_move_checked(
    source: &Path,
    target: &Path,
    verify: impl Fn(&Path, &Path) -> Result<u64>,
) -> Result<()> {
    copy_new(source, target)?;

    match verify(source, target) {
        Ok(size) => debug!("Verified copy of {} ({size} bytes)", source.display()),
        Err(e @ IngestError::VerificationFailed { .. }) => {
            warn!("Keeping unverified copy {} for inspection", target.display());
            return Err(e);
        }
        Err(e) => {
            discard_copy(target);
            return Err(e);
        }
    }

    if let Err(e) = fs::remove_file(source) {
        discard_copy(target);
        return Err(IngestError::io(source, e));
    }

    Ok(())
}

/// Sizes of source and copy must agree; returns the verified size
pub fn verify_copy(source: &Path, target: &Path) -> Result<u64> {
    let expected = fs::metadata(source)
        .map_err(|e| IngestError::io(source, e))?
        .len();
    let actual = fs::metadata(target)
        .map_err(|e| IngestError::io(target, e))?
        .len();

    if expected != actual {
        return Err(IngestError::VerificationFailed {
            target: target.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

fn copy_new(source: &Path, target: &Path) -> Result<()> {
    let mut reader = File::open(source).map_err(|e| IngestError::io(source, e))?;
    let source_meta = reader.metadata().map_err(|e| IngestError::io(source, e))?;
    // create_new: never write into a file that is not ours
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|e| IngestError::io(target, e))?;

    let copied = io::copy(&mut reader, &mut writer).and_then(|_| {
        if let Ok(modified) = source_meta.modified() {
            if let Err(e) = writer.set_modified(modified) {
                debug!("Could not copy modification time to {}: {e}", target.display());
            }
        }
        writer.sync_all()
    });

    if let Err(e) = copied {
        drop(writer);
        discard_copy(target);
        return Err(IngestError::io(target, e));
    }

    if let Err(e) = fs::set_permissions(target, source_meta.permissions()) {
        debug!("Could not copy permissions to {}: {e}", target.display());
    }
    Ok(())
}

fn discard_copy(target: &Path) {
    if let Err(e) = fs::remove_file(target) {
        warn!("Could not remove partial copy {}: {e}", target.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NullMetadataOracle;
    use crate::ordering::load_record;
    use crate::progress::NullSink;
    use tempfile::tempdir;

    fn record(path: &Path) -> MediaRecord {
        load_record(path, SortBy::Date, &NullMetadataOracle, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn safe_move_verifies_then_deletes() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let source = src_dir.path().join("a.jpg");
        let target = dst_dir.path().join("b.jpg");
        fs::write(&source, b"payload").unwrap();

        safe_move(&source, &target).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn safe_move_never_overwrites() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        let target = dir.path().join("b.jpg");
        fs::write(&source, b"new").unwrap();
        fs::write(&target, b"old").unwrap();

        assert!(safe_move(&source, &target).is_err());
        assert_eq!(fs::read(&source).unwrap(), b"new");
        assert_eq!(fs::read(&target).unwrap(), b"old");
    }

    #[test]
    fn size_mismatch_is_a_verification_failure() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        let target = dir.path().join("b.jpg");
        fs::write(&source, b"four").unwrap();
        fs::write(&target, b"two").unwrap();

        let err = verify_copy(&source, &target).unwrap_err();
        assert!(matches!(
            err,
            IngestError::VerificationFailed {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn failed_verification_keeps_the_source() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let source = src_dir.path().join("a.jpg");
        let target = dst_dir.path().join("b.jpg");
        fs::write(&source, b"payload").unwrap();

        let short_copy = |_: &Path, target: &Path| -> Result<u64> {
            Err(IngestError::VerificationFailed {
                target: target.to_path_buf(),
                expected: 7,
                actual: 3,
            })
        };
        let err = safe_move_checked(&source, &target, short_copy).unwrap_err();

        assert!(matches!(err, IngestError::VerificationFailed { .. }));
        assert_eq!(fs::read(&source).unwrap(), b"payload");
        assert!(target.exists(), "unverified copy is kept for inspection");
    }

    #[test]
    fn failed_check_after_copy_discards_it() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let source = src_dir.path().join("a.jpg");
        let target = dst_dir.path().join("b.jpg");
        fs::write(&source, b"payload").unwrap();

        let unreadable = |source: &Path, _: &Path| -> Result<u64> {
            Err(IngestError::io(source, io::Error::new(io::ErrorKind::Other, "gone")))
        };
        assert!(safe_move_checked(&source, &target, unreadable).is_err());
        assert_eq!(fs::read(&source).unwrap(), b"payload");
        assert!(!target.exists());
    }

    #[test]
    fn rename_refuses_to_clobber() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        let target = dir.path().join("b.jpg");
        fs::write(&source, b"a").unwrap();
        fs::write(&target, b"b").unwrap();

        assert!(rename_no_clobber(&source, &target).is_err());
        assert_eq!(fs::read(&target).unwrap(), b"b");
    }

    #[test]
    fn correctly_named_file_is_left_alone() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("raw.jpg");
        fs::write(&source, b"content").unwrap();

        let config = EngineConfig::default();
        let fingerprinter = Fingerprinter::new(&config);
        let namer = Namer::default();
        let plan = PlacementPlan {
            mode: Mode::InPlace,
            sort_by: SortBy::Date,
            sort_into_folders: false,
        };

        let mut engine = TransferEngine::new(
            plan.clone(),
            DestinationIndex::new(),
            &fingerprinter,
            &namer,
            &config,
            Reporter::new(&NullSink),
        );
        let first = match engine.place(&record(&source)) {
            PlacementOutcome::Placed { target, method, .. } => {
                assert_eq!(method, TransferMethod::Renamed);
                target
            }
            other => panic!("unexpected outcome {other:?}"),
        };

        let mut again = TransferEngine::new(
            plan,
            DestinationIndex::new(),
            &fingerprinter,
            &namer,
            &config,
            Reporter::new(&NullSink),
        );
        match again.place(&record(&first)) {
            PlacementOutcome::Placed { target, method, .. } => {
                assert_eq!(method, TransferMethod::Unchanged);
                assert_eq!(target, first);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn same_file_listed_twice_is_not_a_duplicate() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"content").unwrap();

        let config = EngineConfig::default();
        let fingerprinter = Fingerprinter::new(&config);
        let namer = Namer::default();
        let mut engine = TransferEngine::new(
            PlacementPlan {
                mode: Mode::InPlace,
                sort_by: SortBy::Date,
                sort_into_folders: false,
            },
            DestinationIndex::new(),
            &fingerprinter,
            &namer,
            &config,
            Reporter::new(&NullSink),
        );

        let fingerprint = fingerprinter.fingerprint(&source);
        engine.seen.insert(fingerprint, resolve_path(&source));
        assert!(matches!(
            engine.place(&record(&source)),
            PlacementOutcome::Placed { .. }
        ));
        assert_eq!(engine.seen().len(), 1);
    }
}
