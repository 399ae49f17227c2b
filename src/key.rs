//! Derivative naming: where a resized copy of a source image lives.
//!
//! Two layouts exist and both must stay reproducible, because trees produced
//! by earlier runs are reused as-is:
//!
//! | Scheme | Layout | Used by |
//! |--------|--------|---------|
//! | [`Scheme::Cache`] | `<dir>/<stem>_w<width><ext>` | [`cache`](crate::cache) |
//! | [`Scheme::Mirror`] | `<dir>/<stem><suffix><ext>` | [`optimize`](crate::optimize) |
//!
//! Both keep the full relative directory of the source, so `a/x.jpg` and
//! `b/x.jpg` never share a derivative. The extension is copied verbatim
//! (`IMG.JPG` → `IMG_w600.JPG`); only format routing lowercases it.
//!
//! Keys are always relative. Joining them to a root is the caller's job.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Naming scheme for a single derivative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    /// On-demand cache: width-suffixed name.
    Cache { width: u32 },
    /// Batch mirror: target-specific suffix, `""` for the base size.
    Mirror { suffix: String },
}

/// Relative path of the derivative of `rel_path` under `scheme`.
pub fn derivative_path(rel_path: &Path, scheme: &Scheme) -> PathBuf {
    match scheme {
        Scheme::Cache { width } => cache_path(rel_path, *width),
        Scheme::Mirror { suffix } => mirror_path(rel_path, suffix),
    }
}

/// Cache-scheme key: `photos/sunset.jpg` at 600 → `photos/sunset_w600.jpg`.
pub fn cache_path(rel_path: &Path, width: u32) -> PathBuf {
    with_suffix(rel_path, &format!("_w{width}"))
}

/// Mirror-scheme key: `photos/sunset.jpg` with `_w1600` → `photos/sunset_w1600.jpg`.
///
/// The empty suffix maps a source onto the same relative path.
pub fn mirror_path(rel_path: &Path, suffix: &str) -> PathBuf {
    if suffix.is_empty() {
        return rel_path.to_path_buf();
    }
    with_suffix(rel_path, suffix)
}

/// Every source path that could have produced `mirror_rel` under one of
/// `suffixes`.
///
/// This is the inverse of [`mirror_path`], used by orphan cleanup. A mirror
/// file is kept while at least one candidate exists in the source tree.
/// `sunset_w600.jpg` with suffixes `["", "_w600"]` yields both
/// `sunset_w600.jpg` (base target of a source literally named that) and
/// `sunset.jpg`.
pub fn mirror_source_candidates(mirror_rel: &Path, suffixes: &[&str]) -> Vec<PathBuf> {
    let Some(stem) = mirror_rel.file_stem().and_then(|s| s.to_str()) else {
        // Non UTF-8 names can only be base-target copies.
        return vec![mirror_rel.to_path_buf()];
    };

    let mut candidates = Vec::new();
    for suffix in suffixes {
        if suffix.is_empty() {
            candidates.push(mirror_rel.to_path_buf());
            continue;
        }
        let Some(base) = stem.strip_suffix(suffix) else {
            continue;
        };
        if base.is_empty() {
            continue;
        }
        let mut name = OsString::from(base);
        if let Some(ext) = mirror_rel.extension() {
            name.push(".");
            name.push(ext);
        }
        candidates.push(mirror_rel.with_file_name(name));
    }
    candidates
}

/// Append `suffix` to the file stem, keeping directory and extension.
fn with_suffix(rel_path: &Path, suffix: &str) -> PathBuf {
    let stem = rel_path.file_stem().unwrap_or_default();
    let mut name = OsString::from(stem);
    name.push(suffix);
    if let Some(ext) = rel_path.extension() {
        name.push(".");
        name.push(ext);
    }
    rel_path.with_file_name(name)
}

/// Normalize a request path into a path relative to a content root.
///
/// Leading slashes and `.` segments are dropped. Returns `None` for anything
/// that could escape the root (`..`, drive prefixes) and for paths that name
/// no file at all.
pub fn sanitize_relative(raw: &str) -> Option<PathBuf> {
    normalize_relative(Path::new(raw.trim_start_matches('/')))
}

/// [`sanitize_relative`] for an already-split path. Absolute paths are rejected.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}
