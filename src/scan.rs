//! Source tree discovery.
//!
//! Both offline pipelines start from the same question: which images live
//! under this root? [`find_images`] answers it with sorted relative paths, so
//! runs are deterministic and the output reads in directory order.
//!
//! ## Rules
//!
//! - Only files with a supported extension are returned (`.jpg`, `.jpeg`,
//!   `.png`, any case). See [`is_supported_image`].
//! - Hidden entries (leading `.`) are skipped, directories included. This
//!   also hides temp files left behind by an interrupted atomic write.
//! - Symlinks are not followed.
//! - An unreadable subdirectory is logged and skipped; only a missing or
//!   unreadable root is an error.

use crate::imaging::supported_input_extensions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Source directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("Cannot read source directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Whether `path` has an extension the imaging backend can round-trip.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            supported_input_extensions().contains(&ext.as_str())
        })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// All supported images under `root`, relative to it, sorted.
pub fn find_images(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::RootNotFound(root.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(ScanError::Walk {
                    path: root.to_path_buf(),
                    source: err,
                });
            }
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_supported_image(entry.path()) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            images.push(rel.to_path_buf());
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn supported_image_extensions_any_case() {
        assert!(is_supported_image(Path::new("a.jpg")));
        assert!(is_supported_image(Path::new("a.JPEG")));
        assert!(is_supported_image(Path::new("dir/a.Png")));
        assert!(!is_supported_image(Path::new("a.gif")));
        assert!(!is_supported_image(Path::new("a.txt")));
        assert!(!is_supported_image(Path::new("jpg")));
    }

    #[test]
    fn finds_nested_images_sorted() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "wildlife/owl.jpg");
        touch(tmp.path(), "landscape/b.png");
        touch(tmp.path(), "landscape/a.JPG");
        touch(tmp.path(), "cover.jpeg");

        let images = find_images(tmp.path()).unwrap();
        assert_eq!(
            images,
            vec![
                PathBuf::from("cover.jpeg"),
                PathBuf::from("landscape/a.JPG"),
                PathBuf::from("landscape/b.png"),
                PathBuf::from("wildlife/owl.jpg"),
            ]
        );
    }

    #[test]
    fn skips_non_images_and_hidden_entries() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "notes.md");
        touch(tmp.path(), ".tmpA1b2C3");
        touch(tmp.path(), ".hidden/secret.jpg");
        touch(tmp.path(), "ok.jpg");

        assert_eq!(find_images(tmp.path()).unwrap(), vec![PathBuf::from("ok.jpg")]);
    }

    #[test]
    fn empty_root_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(find_images(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = find_images(&tmp.path().join("nope"));
        assert!(matches!(result, Err(ScanError::RootNotFound(_))));
    }
}
