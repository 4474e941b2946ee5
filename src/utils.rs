use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use humansize::{format_size, DECIMAL};

use crate::error::{IngestError, Result};

/// Format file size in human-readable format
pub fn format_file_size(size: u64) -> String {
    format_size(size, DECIMAL)
}

/// File name for messages, falling back to the whole path
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Dotfile convention
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Split a file name into its stem and its extension (dot included, case kept)
pub fn split_extension(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// Whether anything (including a dangling symlink) already sits at `path`
pub fn is_occupied(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Find a path in `dir` that nothing occupies.
///
/// Tries `stem + ext` first, then `stem_N + ext` (or `stem_marker_N + ext`)
/// for N = 1, 2, ... up to `max_attempts`.
pub fn unique_path(
    dir: &Path,
    stem: &str,
    ext: &str,
    marker: Option<&str>,
    max_attempts: u32,
) -> Result<PathBuf> {
    unique_path_for(dir, stem, ext, marker, max_attempts, None)
}

/// Like [`unique_path`], but a candidate that is `own` itself counts as free,
/// so a file that already carries the wanted name keeps it.
pub fn unique_path_for(
    dir: &Path,
    stem: &str,
    ext: &str,
    marker: Option<&str>,
    max_attempts: u32,
    own: Option<&Path>,
) -> Result<PathBuf> {
    let own = own.map(resolve_path);
    let is_free = |candidate: &Path| -> Result<bool> {
        if own.as_deref().is_some_and(|own| resolve_path(candidate) == own) {
            return Ok(true);
        }
        let occupied = is_occupied(candidate).map_err(|e| IngestError::io(candidate, e))?;
        Ok(!occupied)
    };

    let first = dir.join(format!("{stem}{ext}"));
    if is_free(&first)? {
        return Ok(first);
    }

    for counter in 1..=max_attempts {
        let name = match marker {
            Some(marker) => format!("{stem}_{marker}_{counter}{ext}"),
            None => format!("{stem}_{counter}{ext}"),
        };
        let candidate = dir.join(name);
        if is_free(&candidate)? {
            return Ok(candidate);
        }
    }

    Err(IngestError::CollisionExhausted {
        dir: dir.to_path_buf(),
        base: format!("{stem}{ext}"),
        attempts: max_attempts,
    })
}

/// Absolute form of a path, following symlinks when the path still exists
pub fn resolve_path(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Check if two paths point to the same location
pub fn same_path(path1: &Path, path2: &Path) -> bool {
    resolve_path(path1) == resolve_path(path2)
}

/// Path of `path` relative to `base`, for log lines
pub fn relative_display(base: &Path, path: &Path) -> String {
    pathdiff::diff_paths(path, base)
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_split_extension() {
        assert_eq!(
            split_extension(Path::new("test.JPG")),
            ("test".to_string(), ".JPG".to_string())
        );
        assert_eq!(split_extension(Path::new("test")), ("test".to_string(), String::new()));
        assert_eq!(
            split_extension(Path::new("test.tar.gz")),
            ("test.tar".to_string(), ".gz".to_string())
        );
    }

    #[test]
    fn test_unique_path() {
        let dir = tempdir().unwrap();
        let dir_path = dir.path();

        let first = unique_path(dir_path, "2024-03-05_10-11-12", ".jpg", None, 10).unwrap();
        assert_eq!(first.file_name().unwrap(), "2024-03-05_10-11-12.jpg");
        File::create(&first).unwrap();

        let second = unique_path(dir_path, "2024-03-05_10-11-12", ".jpg", None, 10).unwrap();
        assert_eq!(second.file_name().unwrap(), "2024-03-05_10-11-12_1.jpg");
        File::create(&second).unwrap();

        let third = unique_path(dir_path, "2024-03-05_10-11-12", ".jpg", None, 10).unwrap();
        assert_eq!(third.file_name().unwrap(), "2024-03-05_10-11-12_2.jpg");
    }

    #[test]
    fn test_unique_path_with_marker() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a.png")).unwrap();

        let path = unique_path(dir.path(), "a", ".png", Some("extracted"), 10).unwrap();
        assert_eq!(path.file_name().unwrap(), "a_extracted_1.png");
    }

    #[test]
    fn test_unique_path_exhaustion() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a.png")).unwrap();
        File::create(dir.path().join("a_1.png")).unwrap();

        let err = unique_path(dir.path(), "a", ".png", None, 1).unwrap_err();
        assert!(matches!(err, IngestError::CollisionExhausted { attempts: 1, .. }));
    }

    #[test]
    fn test_own_name_is_kept() {
        let dir = tempdir().unwrap();
        let other = dir.path().join("a.jpg");
        let own = dir.path().join("a_1.jpg");
        File::create(&other).unwrap();
        File::create(&own).unwrap();

        let path = unique_path_for(dir.path(), "a", ".jpg", None, 10, Some(&own)).unwrap();
        assert_eq!(path, own);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_counts_as_occupied() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("gone.jpg");
        std::os::unix::fs::symlink(dir.path().join("missing"), &link).unwrap();

        assert!(is_occupied(&link).unwrap());
        let path = unique_path(dir.path(), "gone", ".jpg", None, 10).unwrap();
        assert_eq!(path.file_name().unwrap(), "gone_1.jpg");
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new("/photos/.cover.jpg")));
        assert!(!is_hidden(Path::new("/photos/cover.jpg")));
    }

    #[test]
    fn test_same_path_through_dot_segments() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        File::create(&file).unwrap();
        let indirect = dir.path().join(".").join("a.jpg");
        assert!(same_path(&file, &indirect));
        assert!(!same_path(&file, &dir.path().join("b.jpg")));
    }
}
