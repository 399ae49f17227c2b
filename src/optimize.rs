//! Batch optimization into a mirrored tree.
//!
//! Produces fixed-width derivatives of every image under a source directory
//! into a destination directory with the same layout, using the mirror scheme
//! from [`key`](crate::key). Run it at build time; the result is plain files a
//! static host can serve without this crate.
//!
//! ## Default targets
//!
//! ```text
//! content/portfolio/photos/sunset.jpg (3000px)
//!   → content/portfolio_optimized/photos/sunset.jpg        2500px
//!   → content/portfolio_optimized/photos/sunset_w600.jpg    600px
//!   → content/portfolio_optimized/photos/sunset_w1600.jpg  1600px
//! ```
//!
//! ## Incremental runs
//!
//! Each `(image, target)` pair is classified before any pixel work:
//!
//! - **missing**: no derivative yet → generated
//! - **stale**: derivative older than the source → regenerated in place
//! - **fresh**: derivative at least as new as the source → skipped
//!
//! All non-fresh targets of one image come from a single decode. A second run
//! over an unchanged tree does no image work at all.
//!
//! ## Orphans
//!
//! After generation the destination tree is walked and every file that no
//! source could have produced is deleted, including temp files from an
//! interrupted write. Detection only goes destination → source. Empty
//! directories are left in place.

use crate::imaging::{ImageBackend, Quality, ResizeParams, ResizeTarget};
use crate::key::{self, Scheme};
use crate::scan::{self, ScanError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Source and destination are the same directory: {0}")]
    SameDirectory(PathBuf),
}

/// One output size: a filename suffix and the widest the output may be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub suffix: String,
    pub max_width: u32,
}

impl Target {
    pub fn new(suffix: &str, max_width: u32) -> Self {
        Self {
            suffix: suffix.to_string(),
            max_width,
        }
    }
}

/// Base copy capped at 2500px plus 600px and 1600px variants.
pub fn default_targets() -> Vec<Target> {
    vec![
        Target::new("", 2500),
        Target::new("_w600", 600),
        Target::new("_w1600", 1600),
    ]
}

/// A source directory and the mirror it is optimized into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorDir {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Settings shared by every directory of a run.
#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub targets: Vec<Target>,
    pub quality: Quality,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            quality: Quality::default(),
        }
    }
}

impl OptimizeConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            targets: config.optimize.targets.clone(),
            quality: Quality::new(config.images.quality),
        }
    }
}

/// Terminal state of one `(image, target)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "error")]
pub enum TargetState {
    Generated,
    Regenerated,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub suffix: String,
    /// Output path relative to the destination root.
    pub output: PathBuf,
    pub state: TargetState,
}

/// Progress reported while a run is in flight.
#[derive(Debug, Clone)]
pub enum OptimizeEvent {
    DirStarted {
        source: PathBuf,
        dest: PathBuf,
        image_count: usize,
    },
    ImageOptimized {
        /// Source path relative to the source root.
        path: PathBuf,
        targets: Vec<TargetOutcome>,
    },
    OrphanRemoved {
        /// Path relative to the destination root.
        path: PathBuf,
    },
}

/// Summary of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub images: usize,
    pub generated: usize,
    pub regenerated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(output, error)` for every failed target.
    pub failures: Vec<(PathBuf, String)>,
    pub orphans_removed: Vec<PathBuf>,
    /// Set when the directory as a whole could not be processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OptimizeReport {
    fn empty(source: &Path, dest: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: &TargetOutcome) {
        match &outcome.state {
            TargetState::Generated => self.generated += 1,
            TargetState::Regenerated => self.regenerated += 1,
            TargetState::Skipped => self.skipped += 1,
            TargetState::Failed(err) => {
                self.failed += 1;
                self.failures.push((outcome.output.clone(), err.clone()));
            }
        }
    }

    /// Derivatives written in this run.
    pub fn written(&self) -> usize {
        self.generated + self.regenerated
    }

    /// No failed target and no directory-level error.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.error.is_none()
    }
}

impl fmt::Display for OptimizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.error {
            return write!(f, "failed: {err}");
        }
        write!(
            f,
            "{} images: {} generated, {} regenerated, {} up to date",
            self.images, self.generated, self.regenerated, self.skipped
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if !self.orphans_removed.is_empty() {
            write!(f, ", {} orphans removed", self.orphans_removed.len())?;
        }
        Ok(())
    }
}

/// Optimize every configured directory, in order.
///
/// A directory that cannot be processed at all gets a report carrying its
/// `error`; the remaining directories still run.
pub fn optimize_all(
    backend: &impl ImageBackend,
    dirs: &[MirrorDir],
    config: &OptimizeConfig,
    events: Option<Sender<OptimizeEvent>>,
) -> Vec<OptimizeReport> {
    let mut reports = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let report = match optimize_dir(backend, &dir.source, &dir.dest, config, events.clone()) {
            Ok(report) => report,
            Err(err) => {
                warn!(source = %dir.source.display(), error = %err, "cannot optimize directory");
                OptimizeReport {
                    error: Some(err.to_string()),
                    ..OptimizeReport::empty(&dir.source, &dir.dest)
                }
            }
        };
        reports.push(report);
    }
    reports
}

/// Mirror `source` into `dest` and remove orphans from `dest`.
///
/// A missing `source` is not an error: it is logged and yields an empty report
/// without touching `dest`.
pub fn optimize_dir(
    backend: &impl ImageBackend,
    source: &Path,
    dest: &Path,
    config: &OptimizeConfig,
    events: Option<Sender<OptimizeEvent>>,
) -> Result<OptimizeReport, OptimizeError> {
    let mut report = OptimizeReport::empty(source, dest);
    if !source.is_dir() {
        warn!(source = %source.display(), "source directory does not exist, skipping");
        return Ok(report);
    }
    if same_directory(source, dest) {
        return Err(OptimizeError::SameDirectory(source.to_path_buf()));
    }

    let images = scan::find_images(source)?;
    std::fs::create_dir_all(dest)?;
    report.images = images.len();
    info!(
        source = %source.display(),
        dest = %dest.display(),
        images = images.len(),
        "optimizing directory"
    );
    if let Some(tx) = &events {
        tx.send(OptimizeEvent::DirStarted {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            image_count: images.len(),
        })
        .ok();
    }

    let outcomes: Vec<Vec<TargetOutcome>> = images
        .par_iter()
        .map(|rel| {
            let targets = optimize_image(backend, source, dest, rel, config);
            if let Some(tx) = &events {
                tx.send(OptimizeEvent::ImageOptimized {
                    path: rel.clone(),
                    targets: targets.clone(),
                })
                .ok();
            }
            targets
        })
        .collect();

    for outcome in outcomes.iter().flatten() {
        report.record(outcome);
    }

    let suffixes: Vec<&str> = config.targets.iter().map(|t| t.suffix.as_str()).collect();
    report.orphans_removed = remove_orphans(source, dest, &suffixes);
    if let Some(tx) = &events {
        for path in &report.orphans_removed {
            tx.send(OptimizeEvent::OrphanRemoved { path: path.clone() })
                .ok();
        }
    }

    info!(source = %source.display(), summary = %report, "directory optimized");
    Ok(report)
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Missing,
    Stale,
    Fresh,
}

/// Compare a derivative against its source's modification time. Equal
/// timestamps count as fresh.
fn freshness(dest: &Path, source_mtime: SystemTime) -> Freshness {
    match std::fs::metadata(dest) {
        Err(_) => Freshness::Missing,
        Ok(meta) if !meta.is_file() => Freshness::Stale,
        Ok(meta) => match meta.modified() {
            Ok(dest_mtime) if dest_mtime >= source_mtime => Freshness::Fresh,
            _ => Freshness::Stale,
        },
    }
}

/// Bring every target of one image up to date.
fn optimize_image(
    backend: &impl ImageBackend,
    source_root: &Path,
    dest_root: &Path,
    rel: &Path,
    config: &OptimizeConfig,
) -> Vec<TargetOutcome> {
    let source = source_root.join(rel);
    let mut outcomes: Vec<TargetOutcome> = config
        .targets
        .iter()
        .map(|t| TargetOutcome {
            suffix: t.suffix.clone(),
            output: key::derivative_path(
                rel,
                &Scheme::Mirror {
                    suffix: t.suffix.clone(),
                },
            ),
            state: TargetState::Skipped,
        })
        .collect();

    let source_mtime = match std::fs::metadata(&source).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(e) => {
            warn!(source = %source.display(), error = %e, "cannot read source");
            fail_all(&mut outcomes, &e.to_string());
            return outcomes;
        }
    };

    // (index into outcomes, freshness) for every target that needs work.
    let pending: Vec<(usize, Freshness)> = outcomes
        .iter()
        .enumerate()
        .filter_map(|(i, o)| match freshness(&dest_root.join(&o.output), source_mtime) {
            Freshness::Fresh => None,
            f => Some((i, f)),
        })
        .collect();

    if pending.is_empty() {
        debug!(source = %rel.display(), "all targets up to date");
        return outcomes;
    }

    if let Some(dir) = dest_root.join(rel).parent()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        warn!(dir = %dir.display(), error = %e, "cannot create destination directory");
        let msg = format!("cannot create {}: {e}", dir.display());
        for &(i, _) in &pending {
            outcomes[i].state = TargetState::Failed(msg.clone());
        }
        return outcomes;
    }

    let params = ResizeParams {
        source: source.clone(),
        targets: pending
            .iter()
            .map(|&(i, _)| ResizeTarget {
                output: dest_root.join(&outcomes[i].output),
                max_width: config.targets[i].max_width,
            })
            .collect(),
        quality: config.quality,
    };

    match backend.resize(&params) {
        Err(e) => {
            warn!(source = %source.display(), error = %e, "cannot decode source");
            let msg = e.to_string();
            for &(i, _) in &pending {
                outcomes[i].state = TargetState::Failed(msg.clone());
            }
        }
        Ok(results) => {
            for (&(i, freshness), result) in pending.iter().zip(results) {
                outcomes[i].state = match result {
                    Ok(dims) => {
                        info!(
                            output = %outcomes[i].output.display(),
                            width = dims.width,
                            height = dims.height,
                            "wrote derivative"
                        );
                        if freshness == Freshness::Missing {
                            TargetState::Generated
                        } else {
                            TargetState::Regenerated
                        }
                    }
                    Err(e) => {
                        warn!(
                            output = %outcomes[i].output.display(),
                            error = %e,
                            "cannot write derivative"
                        );
                        TargetState::Failed(e.to_string())
                    }
                };
            }
        }
    }
    outcomes
}

fn fail_all(outcomes: &mut [TargetOutcome], msg: &str) {
    for outcome in outcomes {
        outcome.state = TargetState::Failed(msg.to_string());
    }
}

/// Delete every file under `dest_root` that none of its possible sources in
/// `source_root` backs. Returns the removed paths, relative to `dest_root`.
fn remove_orphans(source_root: &Path, dest_root: &Path, suffixes: &[&str]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for entry in WalkDir::new(dest_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry during orphan cleanup");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dest_root) else {
            continue;
        };
        let backed = key::mirror_source_candidates(rel, suffixes)
            .iter()
            .any(|candidate| source_root.join(candidate).is_file());
        if backed {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(path = %rel.display(), "removed orphan");
                removed.push(rel.to_path_buf());
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "cannot remove orphan"),
        }
    }
    removed
}
