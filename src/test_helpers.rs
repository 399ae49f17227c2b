//! Shared test utilities for the darkroom test suite.
//!
//! Synthetic image writers, dimension readers, mtime manipulation, and a tree
//! listing helper for asserting on cache and mirror layouts.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! create_test_jpeg(&tmp.path().join("photos/sunset.jpg"), 3000, 2000);
//! set_mtime(&tmp.path().join("photos/sunset.jpg"), seconds_ago(60));
//! assert_eq!(file_tree(tmp.path()), vec!["photos/sunset.jpg"]);
//! ```

use image::{ImageEncoder, RgbImage, RgbaImage};
use std::path::Path;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

// =========================================================================
// Synthetic images
// =========================================================================

/// Write a gradient JPEG of the given size, creating parent directories.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Write a semi-transparent RGBA PNG of the given size, creating parent directories.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 64, 200])
    });
    img.save(path).unwrap();
}

/// Read `(width, height)` of an image file from its header.
pub fn image_size(path: &Path) -> (u32, u32) {
    image::image_dimensions(path)
        .unwrap_or_else(|e| panic!("cannot read dimensions of {}: {e}", path.display()))
}

// =========================================================================
// Modification times
// =========================================================================

/// A timestamp `secs` seconds in the past.
pub fn seconds_ago(secs: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(secs)
}

/// Set a file's modification time.
pub fn set_mtime(path: &Path, time: SystemTime) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(time))
        .unwrap_or_else(|e| panic!("cannot set mtime of {}: {e}", path.display()));
}

/// Read a file's modification time.
pub fn mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}

// =========================================================================
// Tree listing
// =========================================================================

/// All files under `root` as sorted, `/`-separated relative paths.
pub fn file_tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect();
    files.sort();
    files
}
