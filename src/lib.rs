//! # Darkroom
//!
//! Resized copies of portfolio photos, produced on demand or in batch.
//! Full-resolution sources stay untouched under a content root; every smaller
//! size a page asks for is a *derivative* written next to them (batch) or into
//! a cache directory (on demand).
//!
//! # Three Ways to Get a Derivative
//!
//! ```text
//! serve      GET /assets/portfolio/photos/sunset.jpg?w=600
//!              → cache/photos/sunset_w600.jpg   (generated on first request)
//! warmup     every image × [600, 1600]
//!              → cache/photos/sunset_w600.jpg   (same files, ahead of time)
//! optimize   content/portfolio → content/portfolio_optimized
//!              → sunset.jpg, sunset_w600.jpg, sunset_w1600.jpg
//! ```
//!
//! `serve` and `warmup` share the [`cache::DerivativeCache`]; `optimize`
//! writes a standalone mirror tree a static host can serve directly.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`key`] | Pure naming: where the derivative of a source lives, request path sanitization |
//! | [`imaging`] | `ImageBackend` trait and the pure-Rust resize/encode backend |
//! | [`cache`] | On-demand derivative cache with single-flight generation |
//! | [`serve`] | axum routes serving originals and derivatives |
//! | [`optimize`] | Batch mirror with mtime-based staleness and orphan cleanup |
//! | [`warmup`] | Pre-generates the on-demand cache for configured widths |
//! | [`scan`] | Sorted discovery of supported images under a root |
//! | [`config`] | `darkroom.toml` loading, merging, validation |
//! | [`output`] | CLI formatting of batch progress and summaries |
//! | [`telemetry`] | tracing subscriber setup for the binary |
//!
//! # Design Decisions
//!
//! ## The Disk Is the Cache
//!
//! There is no index, database, or in-memory map of what has been generated.
//! A derivative exists if its file exists. Restarting the server loses
//! nothing, and deleting the cache directory is a complete reset.
//!
//! ## Two Freshness Policies
//!
//! The batch mirror regenerates a target when its source is newer. The
//! on-demand cache never does: a published photo is assumed immutable, and a
//! derivative, once written, is served until someone deletes it. See the
//! [`cache`] module docs.
//!
//! ## Never Upscale
//!
//! A source narrower than the requested width is re-encoded at its own size.
//! Requesting `?w=1600` of an 800px photo yields an 800px file.
//!
//! ## Atomic Writes
//!
//! Every derivative is encoded into a temp file in its destination directory
//! and renamed into place. Concurrent readers, a crashed process, or a
//! timed-out request never leave a truncated image behind.
//!
//! ## Degrade to the Original
//!
//! A visitor never gets an error because a thumbnail could not be produced.
//! Bad widths, decode failures, and slow generations all fall back to the
//! full-size source; only a missing source is a 404.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod key;
pub mod optimize;
pub mod output;
pub mod scan;
pub mod serve;
pub mod telemetry;
pub mod warmup;

#[cfg(test)]
pub(crate) mod test_helpers;
