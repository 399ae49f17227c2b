//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Output dimensions for a source scaled down to at most `max_width`.
///
/// Aspect ratio is preserved with the height rounded to the nearest pixel
/// (never below 1). Sources already within the bound keep their exact
/// dimensions: derivatives are never upscaled.
///
/// # Examples
/// ```
/// # use darkroom::imaging::calculate_target_dimensions;
/// assert_eq!(calculate_target_dimensions((3000, 2000), 600), (600, 400));
/// assert_eq!(calculate_target_dimensions((500, 400), 600), (500, 400));
/// ```
pub fn calculate_target_dimensions(original: (u32, u32), max_width: u32) -> (u32, u32) {
    let (orig_w, orig_h) = original;
    if orig_w <= max_width || orig_w == 0 {
        return original;
    }
    let ratio = max_width as f64 / orig_w as f64;
    let height = (orig_h as f64 * ratio).round().max(1.0) as u32;
    (max_width, height)
}

/// Whether producing a `max_width` derivative requires resampling at all.
pub fn needs_resize(original: (u32, u32), max_width: u32) -> bool {
    calculate_target_dimensions(original, max_width) != original
}
