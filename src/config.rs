//! Configuration.
//!
//! Handles loading, validating, and merging `darkroom.toml`. Stock defaults
//! are serialized to a TOML table and the user file is merged on top, so a
//! config file only needs the keys it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! content_root = "content/portfolio"  # Source photos served and warmed
//! # cache_root = "/var/cache/darkroom" # Default: <temp dir>/darkroom_cache
//!
//! [server]
//! bind = "0.0.0.0:8080"
//! mount = "/assets/portfolio"         # URL prefix for source-relative paths
//! max_width = 4000                    # Larger ?w= values serve the original
//! generation_timeout_secs = 30        # 0 waits as long as generation takes
//!
//! [images]
//! quality = 85                        # JPEG quality (1-100)
//!
//! [optimize]
//! targets = [
//!   { suffix = "", max_width = 2500 },
//!   { suffix = "_w600", max_width = 600 },
//!   { suffix = "_w1600", max_width = 1600 },
//! ]
//! dirs = [
//!   { source = "content/portfolio", dest = "content/portfolio_optimized" },
//!   { source = "content/aboutme", dest = "content/aboutme_optimized" },
//! ]
//!
//! [warmup]
//! widths = [600, 1600]
//!
//! [processing]
//! max_processes = 4                   # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early. Arrays replace the default
//! array wholesale rather than merging element by element.

use crate::optimize::{MirrorDir, Target, default_targets};
use crate::warmup::DEFAULT_WIDTHS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "darkroom.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Source tree the server and warmup read from.
    pub content_root: PathBuf,
    /// Where on-demand derivatives are written. Overridden by `CACHE_DIR`.
    pub cache_root: Option<PathBuf>,
    pub server: ServerConfig,
    pub images: ImagesConfig,
    pub optimize: OptimizeSection,
    pub warmup: WarmupConfig,
    pub processing: ProcessingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("content/portfolio"),
            cache_root: None,
            server: ServerConfig::default(),
            images: ImagesConfig::default(),
            optimize: OptimizeSection::default(),
            warmup: WarmupConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.server.max_width == 0 {
            return Err(ConfigError::Validation(
                "server.max_width must be positive".into(),
            ));
        }
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "server.bind must be an address like 0.0.0.0:8080: {:?}",
                self.server.bind
            )));
        }
        let mount = &self.server.mount;
        if !mount.is_empty() && !mount.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.mount must start with '/': {mount:?}"
            )));
        }
        if self.warmup.widths.contains(&0) {
            return Err(ConfigError::Validation(
                "warmup.widths must be positive".into(),
            ));
        }
        self.optimize.validate()
    }

    /// Cache root from config, else `<temp dir>/darkroom_cache`.
    ///
    /// The binary checks `--cache-dir` / `CACHE_DIR` before calling this.
    pub fn cache_root_or_default(&self) -> PathBuf {
        self.cache_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("darkroom_cache"))
    }
}

/// HTTP serving settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address. The port is overridden by `PORT`.
    pub bind: String,
    /// URL prefix the content root is served under. Empty mounts at `/`.
    pub mount: String,
    /// Widest derivative a request may ask for.
    pub max_width: u32,
    /// Seconds a request waits for generation before serving the original.
    pub generation_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            mount: "/assets/portfolio".to_string(),
            max_width: 4000,
            generation_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn generation_timeout(&self) -> Option<Duration> {
        (self.generation_timeout_secs > 0)
            .then(|| Duration::from_secs(self.generation_timeout_secs))
    }
}

/// Encoding settings shared by every derivative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// JPEG encoding quality (1 = worst, 100 = best). PNG output is lossless.
    pub quality: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

/// Batch optimization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizeSection {
    pub targets: Vec<Target>,
    pub dirs: Vec<MirrorDir>,
}

impl Default for OptimizeSection {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            dirs: vec![
                MirrorDir {
                    source: PathBuf::from("content/portfolio"),
                    dest: PathBuf::from("content/portfolio_optimized"),
                },
                MirrorDir {
                    source: PathBuf::from("content/aboutme"),
                    dest: PathBuf::from("content/aboutme_optimized"),
                },
            ],
        }
    }
}

impl OptimizeSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Validation(
                "optimize.targets must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.max_width == 0 {
                return Err(ConfigError::Validation(format!(
                    "optimize target {:?}: max_width must be positive",
                    target.suffix
                )));
            }
            if target.suffix.contains(['/', '\\']) {
                return Err(ConfigError::Validation(format!(
                    "optimize target {:?}: suffix must not contain path separators",
                    target.suffix
                )));
            }
            if !seen.insert(target.suffix.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "optimize target suffix {:?} is used more than once",
                    target.suffix
                )));
            }
        }
        for dir in &self.dirs {
            if dir.source == dir.dest {
                return Err(ConfigError::Validation(format!(
                    "optimize dir {}: source and dest must differ",
                    dir.source.display()
                )));
            }
        }
        Ok(())
    }
}

/// Cache warmup settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarmupConfig {
    pub widths: Vec<u32>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            widths: DEFAULT_WIDTHS.to_vec(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel image processing workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// The base layer user overrides are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Config::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// An explicit path must exist. Without one, `darkroom.toml` in the working
/// directory is used if present, otherwise the stock defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let overlay = match path {
        Some(path) => Some(toml::from_str(&fs::read_to_string(path)?)?),
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock `darkroom.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Darkroom Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# Source photos served by `serve` and pre-generated by `warmup`.
# Warmup always reads this directory, never an `optimize` destination such as
# content/portfolio_optimized. Point it there to warm the optimized tree.
content_root = "content/portfolio"

# Where on-demand derivatives are cached. The CACHE_DIR environment variable
# and --cache-dir take precedence. Default: <system temp dir>/darkroom_cache
# cache_root = "/var/cache/darkroom"

# ---------------------------------------------------------------------------
# HTTP server
# ---------------------------------------------------------------------------
[server]
# Listen address. The PORT environment variable overrides the port.
bind = "0.0.0.0:8080"

# URL prefix for images: GET /assets/portfolio/photos/sunset.jpg?w=600
mount = "/assets/portfolio"

# Requests for wider derivatives (or non-numeric widths) get the original.
max_width = 4000

# Seconds a request waits for a derivative to be generated before falling
# back to the original. Generation still finishes in the background.
# 0 waits indefinitely.
generation_timeout_secs = 30

# ---------------------------------------------------------------------------
# Encoding
# ---------------------------------------------------------------------------
[images]
# JPEG quality (1 = worst, 100 = best). PNG output is always lossless.
quality = 85

# ---------------------------------------------------------------------------
# Batch optimization (`darkroom optimize`)
# ---------------------------------------------------------------------------
[optimize]
# Each source image produces one file per target, named
# <stem><suffix><ext>, no wider than max_width. Narrower sources keep their
# size. At most one target may use the empty suffix.
targets = [
  { suffix = "", max_width = 2500 },
  { suffix = "_w600", max_width = 600 },
  { suffix = "_w1600", max_width = 1600 },
]

# Directories to mirror, processed in order. Missing sources are skipped.
# Files in dest with no matching source are deleted.
dirs = [
  { source = "content/portfolio", dest = "content/portfolio_optimized" },
  { source = "content/aboutme", dest = "content/aboutme_optimized" },
]

# ---------------------------------------------------------------------------
# Cache warmup (`darkroom warmup`)
# ---------------------------------------------------------------------------
[warmup]
# Widths generated for every image under content_root.
widths = [600, 1600]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel image-processing workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
