//! Parameter types for image operations.
//!
//! These structs describe *what* to produce, not *how*. Callers (the cache and
//! the batch pipeline) decide which derivatives are needed; the
//! [`backend`](super::backend) does the pixel work. A mock backend can then
//! stand in for tests without touching pixel code.
//!
//! - [`Quality`]: JPEG encoding quality (1–100, default 85). Clamped on construction.
//! - [`ResizeTarget`]: one output file and the maximum width it may have.
//! - [`ResizeParams`]: one source decoded once, written to one or more targets.

use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
///
/// Ignored for PNG output, which is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// A single derivative to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeTarget {
    pub output: PathBuf,
    /// Upper bound on the output width. Narrower sources keep their width.
    pub max_width: u32,
}

/// Decode `source` once and write every target from the decoded pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub source: PathBuf,
    pub targets: Vec<ResizeTarget>,
    pub quality: Quality,
}

impl ResizeParams {
    /// Parameters for a single output, the common case for the on-demand cache.
    pub fn single(
        source: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        max_width: u32,
        quality: Quality,
    ) -> Self {
        Self {
            source: source.into(),
            targets: vec![ResizeTarget {
                output: output.into(),
                max_width,
            }],
            quality,
        }
    }
}
