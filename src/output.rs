//! CLI output formatting for the batch commands.
//!
//! Every formatter is a pure function returning display lines; the `print_*`
//! wrappers just write them to stdout. Progress events arrive from rayon
//! workers over a channel, so per-image blocks are self-contained and may
//! interleave in any order.
//!
//! # Output Format
//!
//! ## Optimize
//!
//! ```text
//! content/portfolio → content/portfolio_optimized (2 images)
//!     photos/sunset.jpg
//!         sunset.jpg: generated
//!         sunset_w600.jpg: up to date
//!         sunset_w1600.jpg: failed (Processing failed: ...)
//!     removed photos/old_w600.jpg
//! content/portfolio: 2 images: 1 generated, 0 regenerated, 1 up to date, 1 failed
//! ```
//!
//! ## Warmup
//!
//! ```text
//! Warming 2 images at 600px, 1600px
//!     photos/sunset.jpg @ 600px: generated
//!     photos/sunset.jpg @ 1600px: cached
//! 2 images: 1 generated, 1 already cached
//! ```

use crate::cache::Outcome;
use crate::optimize::{OptimizeEvent, OptimizeReport, TargetOutcome, TargetState};
use crate::warmup::{WarmupEvent, WarmupReport};
use std::path::Path;

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn target_line(target: &TargetOutcome) -> String {
    let state = match &target.state {
        TargetState::Generated => "generated".to_string(),
        TargetState::Regenerated => "regenerated".to_string(),
        TargetState::Skipped => "up to date".to_string(),
        TargetState::Failed(err) => format!("failed ({err})"),
    };
    format!("        {}: {}", display_name(&target.output), state)
}

fn widths_list(widths: &[u32]) -> String {
    widths
        .iter()
        .map(|w| format!("{w}px"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Optimize
// ============================================================================

/// Format a single optimize progress event as display lines.
pub fn format_optimize_event(event: &OptimizeEvent) -> Vec<String> {
    match event {
        OptimizeEvent::DirStarted {
            source,
            dest,
            image_count,
        } => vec![format!(
            "{} \u{2192} {} ({} images)",
            source.display(),
            dest.display(),
            image_count
        )],
        OptimizeEvent::ImageOptimized { path, targets } => {
            let mut lines = vec![format!("    {}", path.display())];
            lines.extend(targets.iter().map(target_line));
            lines
        }
        OptimizeEvent::OrphanRemoved { path } => {
            vec![format!("    removed {}", path.display())]
        }
    }
}

/// One summary line per directory, plus the failed outputs.
pub fn format_optimize_summary(reports: &[OptimizeReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for report in reports {
        lines.push(format!("{}: {}", report.source.display(), report));
        for (output, err) in &report.failures {
            lines.push(format!("    {}: {}", output.display(), err));
        }
    }
    lines
}

pub fn print_optimize_summary(reports: &[OptimizeReport]) {
    for line in format_optimize_summary(reports) {
        println!("{}", line);
    }
}

// ============================================================================
// Warmup
// ============================================================================

/// Format a single warmup progress event as display lines.
pub fn format_warmup_event(event: &WarmupEvent) -> Vec<String> {
    match event {
        WarmupEvent::Started {
            image_count,
            widths,
        } => vec![format!(
            "Warming {} images at {}",
            image_count,
            widths_list(widths)
        )],
        WarmupEvent::Resolved {
            path,
            width,
            result,
        } => {
            let status = match result {
                Ok(Outcome::Hit) => "cached".to_string(),
                Ok(Outcome::Generated) => "generated".to_string(),
                Ok(Outcome::Joined) => "shared".to_string(),
                Err(err) => format!("failed ({err})"),
            };
            vec![format!("    {} @ {}px: {}", path.display(), width, status)]
        }
    }
}

/// Summary line followed by every failed `(image, width)`.
pub fn format_warmup_summary(report: &WarmupReport) -> Vec<String> {
    let mut lines = vec![report.to_string()];
    for (path, width, err) in &report.failures {
        lines.push(format!("    {} @ {}px: {}", path.display(), width, err));
    }
    lines
}

pub fn print_warmup_summary(report: &WarmupReport) {
    for line in format_warmup_summary(report) {
        println!("{}", line);
    }
}
