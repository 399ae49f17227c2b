//! Cache warmup.
//!
//! Pre-generates the on-demand cache so the first visitor after a deploy does
//! not pay for resizing. Every image under the cache's source root is resolved
//! at each configured width through [`DerivativeCache::resolve`], so warmup
//! produces exactly the files the server would, and can run next to a live
//! server without duplicating work.
//!
//! A failing image is recorded and the run moves on.

use crate::cache::{DerivativeCache, Outcome};
use crate::imaging::ImageBackend;
use crate::scan::{self, ScanError};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use tracing::{info, warn};

/// Widths warmed when none are configured: the two sizes the portfolio pages request.
pub const DEFAULT_WIDTHS: [u32; 2] = [600, 1600];

/// Progress for one `(image, width)` pair.
#[derive(Debug, Clone)]
pub enum WarmupEvent {
    Started {
        image_count: usize,
        widths: Vec<u32>,
    },
    Resolved {
        path: PathBuf,
        width: u32,
        result: Result<Outcome, String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub images: usize,
    pub cached: usize,
    pub generated: usize,
    /// `(source path, width, error)` per failure.
    pub failures: Vec<(PathBuf, u32, String)>,
}

impl WarmupReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for WarmupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} images: {} generated, {} already cached",
            self.images, self.generated, self.cached
        )?;
        if !self.failures.is_empty() {
            write!(f, ", {} failed", self.failures.len())?;
        }
        Ok(())
    }
}

/// Resolve every image under the cache's source root at every width.
///
/// Only a missing or unreadable source root is an error.
pub fn warmup<B: ImageBackend>(
    cache: &DerivativeCache<B>,
    widths: &[u32],
    events: Option<Sender<WarmupEvent>>,
) -> Result<WarmupReport, ScanError> {
    let images = scan::find_images(cache.source_root())?;
    info!(
        source = %cache.source_root().display(),
        cache = %cache.cache_root().display(),
        images = images.len(),
        ?widths,
        "warming cache"
    );
    if let Some(tx) = &events {
        tx.send(WarmupEvent::Started {
            image_count: images.len(),
            widths: widths.to_vec(),
        })
        .ok();
    }

    let jobs: Vec<(&PathBuf, u32)> = images
        .iter()
        .flat_map(|rel| widths.iter().map(move |&w| (rel, w)))
        .collect();

    let results: Vec<(PathBuf, u32, Result<Outcome, String>)> = jobs
        .par_iter()
        .map(|&(rel, width)| {
            let result = cache
                .resolve_detailed(rel, width)
                .map(|r| r.outcome)
                .map_err(|e| e.to_string());
            if let Err(err) = &result {
                warn!(path = %rel.display(), width, error = %err, "warmup failed");
            }
            if let Some(tx) = &events {
                tx.send(WarmupEvent::Resolved {
                    path: rel.clone(),
                    width,
                    result: result.clone(),
                })
                .ok();
            }
            (rel.clone(), width, result)
        })
        .collect();

    let mut report = WarmupReport {
        images: images.len(),
        ..WarmupReport::default()
    };
    for (path, width, result) in results {
        match result {
            Ok(Outcome::Hit) => report.cached += 1,
            // A join means someone else generated it during this run.
            Ok(Outcome::Generated | Outcome::Joined) => report.generated += 1,
            Err(err) => report.failures.push((path, width, err)),
        }
    }

    info!(summary = %report, "warmup finished");
    Ok(report)
}
