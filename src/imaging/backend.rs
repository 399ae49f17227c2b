//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the resize primitive every derivative goes
//! through: decode a source once and write one or more width-capped targets in
//! the source's own format.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use the
//! `MockBackend` below, which records calls and writes placeholder files.

use super::params::ResizeParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Pixel size of a written derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Outcome of writing one [`ResizeTarget`](super::params::ResizeTarget).
pub type TargetResult = Result<Dimensions, BackendError>;

/// Trait for image processing backends.
///
/// Implementations must be `Sync`: the cache is shared across request threads
/// and the batch pipeline drives the backend from rayon workers.
pub trait ImageBackend: Sync {
    /// Decode `params.source` once and write every target.
    ///
    /// The outer error means nothing was written (source unreadable or
    /// undecodable). Otherwise there is one result per target, in order, so a
    /// failed write does not hide the targets that succeeded. Each target is
    /// written atomically: readers see the old file or the complete new one.
    fn resize(&self, params: &ResizeParams) -> Result<Vec<TargetResult>, BackendError>;
}
