use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::media::is_media_file;
use crate::progress::Reporter;
use crate::utils::{display_name, resolve_path};

/// A file already sitting in the destination folder
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// Placed by the running batch rather than found by the initial scan
    pub placed_in_batch: bool,
}

/// Fingerprint → file map of one destination folder
#[derive(Debug, Default)]
pub struct DestinationIndex {
    entries: HashMap<Fingerprint, ExistingFile>,
}

impl DestinationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint every media file directly inside `folder`.
    ///
    /// Hashing fans out over the rayon pool; entries are inserted in
    /// directory-listing order afterwards so the result does not depend on
    /// thread scheduling.
    pub fn build(
        folder: &Path,
        fingerprinter: &Fingerprinter,
        progress_interval: usize,
        reporter: &Reporter<'_>,
    ) -> Self {
        let mut index = Self::new();

        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) => {
                reporter.error(format!(
                    "Error reading destination folder {}: {e}",
                    folder.display()
                ));
                return index;
            }
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {e}", folder.display());
                    continue;
                }
            };
            let path = entry.path();
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() && is_media_file(&path) => {
                    candidates.push((path, metadata.len()));
                }
                Ok(_) => {}
                Err(e) => reporter.error(format!(
                    "Error processing existing file: {}: {e}",
                    path.display()
                )),
            }
        }

        let processed = AtomicUsize::new(0);
        let interval = progress_interval.max(1);
        let fingerprints: Vec<Fingerprint> = candidates
            .par_iter()
            .map(|(path, _)| {
                let fingerprint = fingerprinter.fingerprint(path);
                let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if count % interval == 0 {
                    reporter.phase(format!("Scanning existing files... ({count} processed)"));
                }
                fingerprint
            })
            .collect();

        for ((path, size), fingerprint) in candidates.into_iter().zip(fingerprints) {
            let name = display_name(&path);
            index.entries.insert(
                fingerprint,
                ExistingFile {
                    path,
                    name,
                    size,
                    placed_in_batch: false,
                },
            );
        }

        debug!("Indexed {} existing files in {}", index.len(), folder.display());
        index
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&ExistingFile> {
        self.entries.get(fingerprint)
    }

    /// Drop the entry pointing at `path`, used once that file has been renamed
    pub fn evict_path(&mut self, path: &Path) -> Option<ExistingFile> {
        let resolved = resolve_path(path);
        let key = self
            .entries
            .iter()
            .find(|(_, existing)| resolve_path(&existing.path) == resolved)
            .map(|(fingerprint, _)| fingerprint.clone())?;
        self.entries.remove(&key)
    }

    /// Remember a file this batch just put into the destination
    pub fn record_placement(&mut self, fingerprint: Fingerprint, path: &Path, size: u64) {
        self.entries.insert(
            fingerprint,
            ExistingFile {
                name: display_name(path),
                path: path.to_path_buf(),
                size,
                placed_in_batch: true,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a fingerprint relates to what the batch has already placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    New,
    /// The same physical file was listed more than once
    SameFile,
    /// Different file, identical content
    Duplicate,
}

/// (fingerprint, resolved source path) pairs placed so far in this batch
#[derive(Debug, Default)]
pub struct SeenSet {
    entries: HashMap<Fingerprint, Vec<PathBuf>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, fingerprint: &Fingerprint, resolved_source: &Path) -> Seen {
        match self.entries.get(fingerprint) {
            None => Seen::New,
            Some(paths) if paths.iter().any(|p| p == resolved_source) => Seen::SameFile,
            Some(_) => Seen::Duplicate,
        }
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, resolved_source: PathBuf) {
        let paths = self.entries.entry(fingerprint).or_default();
        if !paths.contains(&resolved_source) {
            paths.push(resolved_source);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::progress::{ChannelSink, NullSink, ProgressEvent};
    use tempfile::tempdir;

    #[test]
    fn build_indexes_only_media_children() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"alpha").unwrap();
        fs::write(dir.path().join("b.PNG"), b"beta").unwrap();
        fs::write(dir.path().join("notes.txt"), b"alpha").unwrap();
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();
        fs::write(dir.path().join("nested.jpg").join("c.jpg"), b"gamma").unwrap();

        let fingerprinter = Fingerprinter::new(&EngineConfig::default());
        let index = DestinationIndex::build(dir.path(), &fingerprinter, 5, &Reporter::new(&NullSink));

        assert_eq!(index.len(), 2);
        let alpha = fingerprinter.fingerprint(&dir.path().join("a.jpg"));
        assert_eq!(index.get(&alpha).unwrap().name, "a.jpg");
    }

    #[test]
    fn build_reports_every_interval() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            fs::write(dir.path().join(format!("{i}.jpg")), format!("{i}")).unwrap();
        }

        let (sink, rx) = ChannelSink::new();
        let fingerprinter = Fingerprinter::new(&EngineConfig::default());
        DestinationIndex::build(dir.path(), &fingerprinter, 5, &Reporter::new(&sink));

        let updates = rx
            .try_iter()
            .filter(|event| matches!(event, ProgressEvent::Progress(_)))
            .count();
        assert_eq!(updates, 2);
    }

    #[test]
    fn missing_folder_gives_empty_index() {
        let dir = tempdir().unwrap();
        let fingerprinter = Fingerprinter::new(&EngineConfig::default());
        let index = DestinationIndex::build(
            &dir.path().join("nope"),
            &fingerprinter,
            5,
            &Reporter::new(&NullSink),
        );
        assert!(index.is_empty());
    }

    #[test]
    fn evict_and_record() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.jpg");
        fs::write(&old, b"x").unwrap();
        let fingerprinter = Fingerprinter::new(&EngineConfig::default());
        let mut index = DestinationIndex::build(dir.path(), &fingerprinter, 5, &Reporter::new(&NullSink));
        let fingerprint = fingerprinter.fingerprint(&old);

        assert!(index.evict_path(&old).is_some());
        assert!(index.get(&fingerprint).is_none());
        assert!(index.evict_path(&old).is_none());

        index.record_placement(fingerprint.clone(), &dir.path().join("new.jpg"), 1);
        let entry = index.get(&fingerprint).unwrap();
        assert!(entry.placed_in_batch);
        assert_eq!(entry.name, "new.jpg");
    }

    #[test]
    fn seen_set_distinguishes_same_file_from_duplicate() {
        let fingerprint = Fingerprint::Digest("abc".to_string());
        let mut seen = SeenSet::new();
        assert_eq!(seen.classify(&fingerprint, Path::new("/a/1.jpg")), Seen::New);

        seen.insert(fingerprint.clone(), PathBuf::from("/a/1.jpg"));
        seen.insert(fingerprint.clone(), PathBuf::from("/a/1.jpg"));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen.classify(&fingerprint, Path::new("/a/1.jpg")), Seen::SameFile);
        assert_eq!(seen.classify(&fingerprint, Path::new("/b/1.jpg")), Seen::Duplicate);
    }
}
