use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::progress::Reporter;
use crate::transfer::rename_no_clobber;
use crate::utils::{display_name, relative_display, split_extension, unique_path};

/// Outcome of flattening one folder
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenResult {
    pub files_extracted: usize,
    pub folders_deleted: usize,
    pub errors: Vec<String>,
    /// Directories left on disk because they were not empty
    #[serde(skip)]
    pub retained_folders: Vec<PathBuf>,
}

/// Move every file under `folder` into its parent, then prune empty folders.
///
/// Files are gathered depth-first before anything moves. Name clashes in the
/// parent get an `_extracted_N` suffix. Pruning walks bottom-up and removes
/// only directories that are empty at the moment they are checked; a
/// directory with leftovers is reported and kept. Errors never escape: each
/// is recorded and the remaining entries are still processed.
pub fn flatten_folder(folder: &Path, config: &EngineConfig, reporter: &Reporter<'_>) -> FlattenResult {
    let mut result = FlattenResult::default();
    let folder_name = display_name(folder);

    let parent = match folder.parent() {
        Some(parent) if fs::symlink_metadata(folder).is_ok_and(|m| m.is_dir()) => parent,
        _ => {
            let message = format!("Failed to process folder: {} is not a folder", folder.display());
            reporter.error(message.clone());
            result.errors.push(message);
            return result;
        }
    };

    reporter.log(format!("Extracting contents from folder: {folder_name}"));

    let mut files = Vec::new();
    for entry in WalkDir::new(folder).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(entry) if !entry.file_type().is_dir() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                let message = format!("Failed to read {}: {e}", folder_name);
                reporter.error(message.clone());
                result.errors.push(message);
            }
        }
    }

    if files.is_empty() {
        reporter.log(format!("Folder {folder_name} contains no files"));
    } else {
        reporter.log(format!("Found {} files to extract from {folder_name}", files.len()));
    }

    for file in &files {
        match extract_one(file, parent, config) {
            Ok(destination) => {
                reporter.log(format!(
                    "Extracted: {} → {}",
                    relative_display(folder, file),
                    display_name(&destination)
                ));
                result.files_extracted += 1;
            }
            Err(e) => {
                let message = format!("Failed to extract {}: {e}", display_name(file));
                reporter.error(message.clone());
                result.errors.push(message);
            }
        }
    }

    prune_empty_dirs(folder, reporter, &mut result);
    result
}

fn extract_one(file: &Path, parent: &Path, config: &EngineConfig) -> crate::error::Result<PathBuf> {
    let (stem, ext) = split_extension(file);
    let stem = if stem.is_empty() { display_name(file) } else { stem };
    let destination = unique_path(parent, &stem, &ext, Some("extracted"), config.max_name_attempts)?;
    rename_no_clobber(file, &destination)?;
    Ok(destination)
}

fn prune_empty_dirs(folder: &Path, reporter: &Reporter<'_>, result: &mut FlattenResult) {
    // contents_first yields every directory after everything beneath it.
    let dirs: Vec<PathBuf> = WalkDir::new(folder)
        .follow_links(false)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();

    for dir in dirs {
        let remaining = match fs::read_dir(&dir) {
            Ok(entries) => entries.count(),
            Err(e) => {
                let message = format!("Failed to inspect folder {}: {e}", display_name(&dir));
                reporter.error(message.clone());
                result.errors.push(message);
                result.retained_folders.push(dir);
                continue;
            }
        };

        if remaining > 0 {
            reporter.log(format!(
                "Folder {} still contains {remaining} items - not deleting",
                display_name(&dir)
            ));
            result.retained_folders.push(dir);
            continue;
        }

        match fs::remove_dir(&dir) {
            Ok(()) => {
                reporter.log(format!("Deleting empty folder: {}", display_name(&dir)));
                result.folders_deleted += 1;
            }
            Err(e) => {
                let message = format!("Failed to delete folder {}: {e}", display_name(&dir));
                reporter.error(message.clone());
                result.errors.push(message);
                result.retained_folders.push(dir);
            }
        }
    }
}
