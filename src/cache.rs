//! On-demand derivative cache.
//!
//! Resizing a full-resolution photo is the slow part of serving a portfolio
//! page. This module turns a `(relative path, width)` request into a file on
//! disk that can be served directly, generating it the first time it is asked
//! for and reusing it afterwards.
//!
//! # Design
//!
//! ## Layout
//!
//! Derivatives live under the cache root using the cache scheme from
//! [`key`](crate::key): `photos/sunset.jpg` at width 600 becomes
//! `<cache_root>/photos/sunset_w600.jpg`. The disk is the cache; there is no
//! in-memory index and nothing is evicted.
//!
//! ## No freshness check
//!
//! Once a derivative exists it is returned as-is, even if the source has been
//! modified since. Published photos are treated as immutable, and the cache
//! is keyed by *nominal* width rather than by source version. This differs
//! on purpose from the batch mirror in [`optimize`](crate::optimize), which
//! compares modification times. To refresh a cached derivative, delete it (or
//! the whole cache root).
//!
//! ## Single-flight generation
//!
//! Concurrent requests for the same missing derivative collapse into one
//! generation. The first caller registers an in-flight slot keyed by the
//! derivative path and does the work; later callers block on that slot and
//! receive the same result, success or failure. The registry lock is only
//! held to insert and remove slots, so different keys generate in parallel.
//! If the generating caller panics, its slot is completed with an error
//! on unwind so waiters never hang.
//!
//! ## Atomic writes
//!
//! The backend writes each derivative to a temporary file in the destination
//! directory and renames it into place. A reader either sees no file (and
//! joins or starts a generation) or a complete image.

use crate::imaging::{BackendError, ImageBackend, Quality, ResizeParams, RustBackend};
use crate::key::{self, Scheme};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from [`DerivativeCache::resolve`].
///
/// Cloneable so one generation's outcome can be handed to every caller that
/// waited on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Invalid source path: {0}")]
    InvalidPath(String),
    #[error("Derivative width must be positive")]
    InvalidWidth,
    #[error("Source image not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("Cannot create cache directory {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Failed to generate {path}: {source}")]
    GenerationFailed {
        path: PathBuf,
        #[source]
        source: Arc<BackendError>,
    },
}

impl CacheError {
    fn generation(path: &Path, err: BackendError) -> Self {
        Self::GenerationFailed {
            path: path.to_path_buf(),
            source: Arc::new(err),
        }
    }
}

/// How a successful [`DerivativeCache::resolve_detailed`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The derivative was already on disk.
    Hit,
    /// This call generated the derivative.
    Generated,
    /// Another caller was generating it; this call waited for that result.
    Joined,
}

/// A ready-to-serve derivative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub outcome: Outcome,
}

/// Snapshot of cache activity since construction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub generated: u32,
    pub joined: u32,
    pub failed: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.generated + self.joined + self.failed
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cached, {} generated", self.hits, self.generated)?;
        if self.joined > 0 {
            write!(f, ", {} shared", self.joined)?;
        }
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU32,
    generated: AtomicU32,
    joined: AtomicU32,
    failed: AtomicU32,
}

type FlightResult = Result<PathBuf, CacheError>;

/// One generation in progress; waiters block on `ready` until `slot` is set.
struct InFlight {
    slot: Mutex<Option<FlightResult>>,
    ready: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Publish the result. Only the first call has any effect.
    fn complete(&self, result: FlightResult) {
        let mut slot = lock(&self.slot);
        if slot.is_none() {
            *slot = Some(result);
        }
        self.ready.notify_all();
    }

    fn wait(&self) -> FlightResult {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

type FlightMap = Mutex<HashMap<PathBuf, Arc<InFlight>>>;

/// Held by the caller that owns a generation. Dropping it (normally or while
/// unwinding) completes the slot and unregisters the key.
struct Leader<'a> {
    flights: &'a FlightMap,
    key: PathBuf,
    flight: Arc<InFlight>,
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        self.flight.complete(Err(CacheError::generation(
            &self.key,
            BackendError::ProcessingFailed("generation aborted".into()),
        )));
        lock(self.flights).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disk-backed cache of resized images for one content root.
///
/// Cheap to share: wrap it in an `Arc` and call [`resolve`](Self::resolve)
/// from any thread.
pub struct DerivativeCache<B: ImageBackend = RustBackend> {
    source_root: PathBuf,
    cache_root: PathBuf,
    backend: B,
    quality: Quality,
    flights: FlightMap,
    counters: Counters,
}

impl DerivativeCache<RustBackend> {
    /// Cache backed by the production image backend.
    pub fn new(source_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self::with_backend(source_root, cache_root, RustBackend::new())
    }
}

impl<B: ImageBackend> DerivativeCache<B> {
    /// Cache using a specific backend (allows testing with mock).
    pub fn with_backend(
        source_root: impl Into<PathBuf>,
        cache_root: impl Into<PathBuf>,
        backend: B,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            cache_root: cache_root.into(),
            backend,
            quality: Quality::default(),
            flights: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Set the JPEG quality used for generated derivatives.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Absolute path of the derivative for `rel_path` at `width`, whether or
    /// not it exists yet.
    pub fn derivative_path(&self, rel_path: &Path, width: u32) -> PathBuf {
        self.cache_root.join(key::derivative_path(rel_path, &Scheme::Cache { width }))
    }

    /// Return a servable path for `rel_path` resized to `width`.
    pub fn resolve(&self, rel_path: &Path, width: u32) -> Result<PathBuf, CacheError> {
        self.resolve_detailed(rel_path, width).map(|r| r.path)
    }

    /// [`resolve`](Self::resolve), also reporting whether the derivative was
    /// found, generated, or shared with a concurrent caller.
    pub fn resolve_detailed(&self, rel_path: &Path, width: u32) -> Result<Resolved, CacheError> {
        let result = self.lookup_or_generate(rel_path, width);
        match &result {
            Ok(resolved) => {
                let counter = match resolved.outcome {
                    Outcome::Hit => &self.counters.hits,
                    Outcome::Generated => &self.counters.generated,
                    Outcome::Joined => &self.counters.joined,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            generated: self.counters.generated.load(Ordering::Relaxed),
            joined: self.counters.joined.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn lookup_or_generate(&self, rel_path: &Path, width: u32) -> Result<Resolved, CacheError> {
        let rel = key::normalize_relative(rel_path)
            .ok_or_else(|| CacheError::InvalidPath(rel_path.display().to_string()))?;
        if width == 0 {
            return Err(CacheError::InvalidWidth);
        }

        let source = self.source_root.join(&rel);
        if !source.is_file() {
            return Err(CacheError::SourceNotFound(source));
        }

        let cached = self.derivative_path(&rel, width);
        if cached.is_file() {
            debug!(path = %cached.display(), "derivative cache hit");
            return Ok(Resolved {
                path: cached,
                outcome: Outcome::Hit,
            });
        }

        let leader = {
            let mut flights = lock(&self.flights);
            match flights.entry(cached.clone()) {
                Entry::Occupied(entry) => Err(Arc::clone(entry.get())),
                Entry::Vacant(entry) => {
                    let flight = Arc::new(InFlight::new());
                    entry.insert(Arc::clone(&flight));
                    Ok(Leader {
                        flights: &self.flights,
                        key: cached.clone(),
                        flight,
                    })
                }
            }
        };

        let leader = match leader {
            Ok(leader) => leader,
            Err(flight) => {
                debug!(path = %cached.display(), "joining in-flight generation");
                return flight.wait().map(|path| Resolved {
                    path,
                    outcome: Outcome::Joined,
                });
            }
        };

        // A previous flight may have finished between the existence check
        // above and registering this one.
        if cached.is_file() {
            leader.flight.complete(Ok(cached.clone()));
            return Ok(Resolved {
                path: cached,
                outcome: Outcome::Hit,
            });
        }

        let result = self.generate(&source, &cached, width);
        if let Err(err) = &result {
            warn!(source = %source.display(), width, error = %err, "derivative generation failed");
        }
        leader.flight.complete(result.clone().map(|()| cached.clone()));
        drop(leader);

        result.map(|()| Resolved {
            path: cached,
            outcome: Outcome::Generated,
        })
    }

    fn generate(&self, source: &Path, cached: &Path, width: u32) -> Result<(), CacheError> {
        if let Some(dir) = cached.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CacheError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: Arc::new(e),
            })?;
        }

        let params = ResizeParams::single(source, cached, width, self.quality);
        let mut results = self
            .backend
            .resize(&params)
            .map_err(|e| CacheError::generation(cached, e))?;

        match results.pop() {
            Some(Ok(dims)) => {
                info!(
                    path = %cached.display(),
                    width = dims.width,
                    height = dims.height,
                    "generated derivative"
                );
                Ok(())
            }
            Some(Err(err)) => Err(CacheError::generation(cached, err)),
            None => Err(CacheError::generation(
                cached,
                BackendError::ProcessingFailed("backend produced no output".into()),
            )),
        }
    }
}
