//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG) | `image::ImageReader` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` at the configured quality |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//! | Atomic write | `tempfile::NamedTempFile` in the target dir, then `persist` |
//!
//! The output format always follows the source extension, so a `.png` source
//! produces `.png` derivatives and alpha survives.

use super::backend::{BackendError, Dimensions, ImageBackend, TargetResult};
use super::calculations::{calculate_target_dimensions, needs_resize};
use super::params::{Quality, ResizeParams};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::LazyLock;
use tempfile::NamedTempFile;

/// Extensions this backend can both decode and re-encode.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled() && fmt.writing_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the lowercase image extensions with working decoders and encoders.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Encode format for a path, routed on the lowercased extension.
pub fn format_for_path(path: &Path) -> Result<ImageFormat, BackendError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    PHOTO_CANDIDATES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, fmt)| *fmt)
        .ok_or_else(|| BackendError::UnsupportedFormat(path.display().to_string()))
}

/// Pure Rust backend using the `image` crate.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Encode `img` into `path` via a sibling temp file and an atomic rename.
///
/// A failed encode drops the temp file; the destination is never truncated.
fn save_image(
    img: &DynamicImage,
    path: &Path,
    format: ImageFormat,
    quality: Quality,
) -> Result<(), BackendError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut writer, quality.value() as u8);
                rgb.write_with_encoder(encoder).map_err(|e| {
                    BackendError::ProcessingFailed(format!("JPEG encode failed: {e}"))
                })?;
            }
            ImageFormat::Png => {
                let encoder = PngEncoder::new(&mut writer);
                img.write_with_encoder(encoder).map_err(|e| {
                    BackendError::ProcessingFailed(format!("PNG encode failed: {e}"))
                })?;
            }
            other => {
                return Err(BackendError::UnsupportedFormat(format!("{other:?}")));
            }
        }
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| BackendError::Io(e.error))?;
    Ok(())
}

impl ImageBackend for RustBackend {
    fn resize(&self, params: &ResizeParams) -> Result<Vec<TargetResult>, BackendError> {
        let format = format_for_path(&params.source)?;
        let img = load_image(&params.source)?;
        let original = (img.width(), img.height());

        Ok(params
            .targets
            .iter()
            .map(|target| {
                if target.max_width == 0 {
                    return Err(BackendError::ProcessingFailed(
                        "target width must be positive".into(),
                    ));
                }
                let (width, height) = calculate_target_dimensions(original, target.max_width);
                if needs_resize(original, target.max_width) {
                    let resized = img.resize_exact(width, height, FilterType::Lanczos3);
                    save_image(&resized, &target.output, format, params.quality)?;
                } else {
                    save_image(&img, &target.output, format, params.quality)?;
                }
                Ok(Dimensions { width, height })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ResizeTarget;
    use crate::test_helpers::{create_test_jpeg, create_test_png, image_size};

    #[test]
    fn supported_extensions_match_decodable_formats() {
        let exts = supported_input_extensions();
        for expected in &["jpg", "jpeg", "png"] {
            assert!(
                exts.contains(expected),
                "expected {expected} in supported extensions"
            );
        }
    }

    #[test]
    fn format_routing_is_case_insensitive() {
        assert_eq!(
            format_for_path(Path::new("a/IMG.JPG")).unwrap(),
            ImageFormat::Jpeg
        );
        assert_eq!(format_for_path(Path::new("b.Png")).unwrap(), ImageFormat::Png);
        assert!(format_for_path(Path::new("c.gif")).is_err());
        assert!(format_for_path(Path::new("noext")).is_err());
    }

    #[test]
    fn resize_jpeg_to_smaller_width() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 400, 300);

        let output = tmp.path().join("source_w200.jpg");
        let results = RustBackend::new()
            .resize(&ResizeParams::single(
                &source,
                &output,
                200,
                Quality::new(85),
            ))
            .unwrap();

        assert_eq!(
            results[0].as_ref().unwrap(),
            &Dimensions {
                width: 200,
                height: 150
            }
        );
        assert_eq!(image_size(&output), (200, 150));
    }

    #[test]
    fn resize_never_upscales() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("small.jpg");
        create_test_jpeg(&source, 120, 80);

        let output = tmp.path().join("small_w600.jpg");
        RustBackend::new()
            .resize(&ResizeParams::single(
                &source,
                &output,
                600,
                Quality::default(),
            ))
            .unwrap();

        assert_eq!(image_size(&output), (120, 80));
    }

    #[test]
    fn resize_png_stays_png() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("graphic.png");
        create_test_png(&source, 300, 100);

        let output = tmp.path().join("graphic_w150.png");
        RustBackend::new()
            .resize(&ResizeParams::single(
                &source,
                &output,
                150,
                Quality::default(),
            ))
            .unwrap();

        assert_eq!(
            image::ImageFormat::from_path(&output).unwrap(),
            ImageFormat::Png
        );
        let decoded = image::open(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (150, 50));
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn resize_writes_all_targets_from_one_decode() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("wide.jpg");
        create_test_jpeg(&source, 1000, 500);

        let params = ResizeParams {
            source,
            targets: vec![
                ResizeTarget {
                    output: tmp.path().join("out/wide.jpg"),
                    max_width: 2500,
                },
                ResizeTarget {
                    output: tmp.path().join("out/wide_w600.jpg"),
                    max_width: 600,
                },
            ],
            quality: Quality::default(),
        };
        std::fs::create_dir_all(tmp.path().join("out")).unwrap();

        let results = RustBackend::new().resize(&params).unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(image_size(&tmp.path().join("out/wide.jpg")), (1000, 500));
        assert_eq!(image_size(&tmp.path().join("out/wide_w600.jpg")), (600, 300));
    }

    #[test]
    fn resize_reports_per_target_write_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("a.jpg");
        create_test_jpeg(&source, 100, 100);

        let params = ResizeParams {
            source,
            targets: vec![
                ResizeTarget {
                    output: tmp.path().join("missing-dir/a.jpg"),
                    max_width: 50,
                },
                ResizeTarget {
                    output: tmp.path().join("a_w50.jpg"),
                    max_width: 50,
                },
            ],
            quality: Quality::default(),
        };

        let results = RustBackend::new().resize(&params).unwrap();
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }

    #[test]
    fn resize_corrupt_source_errors_without_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("corrupt.jpg");
        std::fs::write(&source, b"definitely not a jpeg").unwrap();

        let output = tmp.path().join("corrupt_w600.jpg");
        let result = RustBackend::new().resize(&ResizeParams::single(
            &source,
            &output,
            600,
            Quality::default(),
        ));

        assert!(result.is_err());
        assert!(!output.exists());
        // No temp files left behind either.
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn resize_unsupported_extension_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("anim.gif");
        std::fs::write(&source, b"GIF89a").unwrap();

        let result = RustBackend::new().resize(&ResizeParams::single(
            &source,
            tmp.path().join("anim_w600.gif"),
            600,
            Quality::default(),
        ));
        assert!(matches!(result, Err(BackendError::UnsupportedFormat(_))));
    }

    #[test]
    fn resize_overwrites_existing_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("a.jpg");
        create_test_jpeg(&source, 400, 200);
        let output = tmp.path().join("a_w200.jpg");
        std::fs::write(&output, b"stale bytes").unwrap();

        RustBackend::new()
            .resize(&ResizeParams::single(
                &source,
                &output,
                200,
                Quality::default(),
            ))
            .unwrap();

        assert_eq!(image_size(&output), (200, 100));
    }
}
