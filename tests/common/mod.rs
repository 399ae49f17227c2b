//! Helpers shared by the integration tests.

#![allow(dead_code)]

use image::{ImageEncoder, RgbImage, RgbaImage};
use std::path::Path;

/// Write a gradient JPEG of the given size, creating parent directories.
pub fn create_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 96])
    });
    let file = std::fs::File::create(path).unwrap();
    image::codecs::jpeg::JpegEncoder::new(std::io::BufWriter::new(file))
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Write an RGBA PNG of the given size, creating parent directories.
pub fn create_png(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, 32, (y % 256) as u8, 255])
    })
    .save(path)
    .unwrap();
}

/// `(width, height)` of an image file.
pub fn file_dims(path: &Path) -> (u32, u32) {
    image::image_dimensions(path).unwrap()
}

/// `(width, height)` of encoded image bytes.
pub fn bytes_dims(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

/// Every file under `root` as a sorted `/`-joined relative path.
pub fn file_tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
