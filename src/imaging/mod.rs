//! Image processing: pure Rust, zero system dependencies.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Resize** | Lanczos3, width-capped, never upscaled |
//! | **Encode** | JPEG or PNG, matching the source extension |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, TargetResult};
pub use calculations::{calculate_target_dimensions, needs_resize};
pub use params::{Quality, ResizeParams, ResizeTarget};
pub use rust_backend::{RustBackend, format_for_path, supported_input_extensions};
