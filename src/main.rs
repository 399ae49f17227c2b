use clap::{Parser, Subcommand};
use darkroom::cache::DerivativeCache;
use darkroom::config::{self, Config};
use darkroom::imaging::{Quality, RustBackend};
use darkroom::optimize::{self, OptimizeConfig};
use darkroom::serve::{self, AppState};
use darkroom::telemetry::{self, LogFormat};
use darkroom::{output, warmup};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

/// Shared flags for commands that use the on-demand cache.
#[derive(clap::Args, Clone)]
struct CacheArgs {
    /// Cache directory (overrides `cache_root` in the config file)
    #[arg(long, env = "CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Parser)]
#[command(name = "darkroom")]
#[command(about = "Resized image derivatives for a photo portfolio")]
#[command(long_about = "\
Resized image derivatives for a photo portfolio

Sources are never modified. Derivatives are written either to a cache
directory on demand, or to a mirrored tree in batch:

  content/portfolio/photos/sunset.jpg
    serve / warmup  → <cache>/photos/sunset_w600.jpg
    optimize        → content/portfolio_optimized/photos/sunset_w600.jpg

Run 'darkroom gen-config' to generate a documented darkroom.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: darkroom.toml in the working directory, if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Default log level; RUST_LOG directives take precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve originals and on-demand derivatives over HTTP
    Serve {
        /// Listen port (overrides the port in `server.bind`)
        #[arg(long, env = "PORT")]
        port: Option<u16>,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Mirror source directories into fixed-size derivatives and remove orphans
    Optimize {
        /// Print the run summary as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Pre-generate the on-demand cache for the configured widths
    Warmup(CacheArgs),
    /// Print a stock darkroom.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Cli {
        config: config_path,
        log_level,
        log_format,
        command,
    } = Cli::parse();

    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    telemetry::init(log_level, log_format)?;
    let config = config::load_config(config_path.as_deref())?;

    match command {
        Command::Serve { port, cache } => run_serve(&config, port, cache.cache_dir)?,
        Command::Optimize { json } => run_optimize(&config, json)?,
        Command::Warmup(cache) => run_warmup(&config, cache.cache_dir)?,
        Command::GenConfig => {}
    }

    Ok(())
}

fn run_serve(
    config: &Config,
    port: Option<u16>,
    cache_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cache = Arc::new(open_cache(config, cache_dir));
    let mut addr: SocketAddr = config.server.bind.parse()?;
    if let Some(port) = port {
        addr.set_port(port);
    }
    info!(
        content = %cache.source_root().display(),
        cache = %cache.cache_root().display(),
        mount = %config.server.mount,
        "starting server"
    );

    let app = serve::router(
        AppState::from_config(cache, &config.server),
        &config.server.mount,
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        serve::run(listener, app).await
    })?;
    Ok(())
}

fn run_optimize(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    init_thread_pool(&config.processing);
    let backend = RustBackend::new();
    let settings = OptimizeConfig::from_config(config);

    let reports = if json {
        optimize::optimize_all(&backend, &config.optimize.dirs, &settings, None)
    } else {
        let (tx, rx) = std::sync::mpsc::channel();
        let printer = std::thread::spawn(move || {
            for event in rx {
                for line in output::format_optimize_event(&event) {
                    println!("{}", line);
                }
            }
        });
        let reports =
            optimize::optimize_all(&backend, &config.optimize.dirs, &settings, Some(tx));
        printer.join().unwrap();
        reports
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        output::print_optimize_summary(&reports);
    }

    let failed_dirs = reports.iter().filter(|r| r.error.is_some()).count();
    let failed: usize = reports.iter().map(|r| r.failed).sum();
    match (failed_dirs, failed) {
        (0, 0) => Ok(()),
        (0, n) => Err(format!("{n} derivatives failed").into()),
        (d, n) => Err(format!("{d} directories and {n} derivatives failed").into()),
    }
}

fn run_warmup(
    config: &Config,
    cache_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_thread_pool(&config.processing);
    let cache = open_cache(config, cache_dir);

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_warmup_event(&event) {
                println!("{}", line);
            }
        }
    });
    let report = warmup::warmup(&cache, &config.warmup.widths, Some(tx));
    printer.join().unwrap();
    let report = report?;

    output::print_warmup_summary(&report);
    if !report.is_success() {
        return Err(format!("{} derivatives failed", report.failures.len()).into());
    }
    Ok(())
}

/// `--cache-dir` / `CACHE_DIR`, then `cache_root` from config, then the temp dir.
fn resolve_cache_root(config: &Config, cache_dir: Option<PathBuf>) -> PathBuf {
    cache_dir.unwrap_or_else(|| config.cache_root_or_default())
}

fn open_cache(config: &Config, cache_dir: Option<PathBuf>) -> DerivativeCache {
    let cache_root = resolve_cache_root(config, cache_dir);
    DerivativeCache::new(config.content_root.clone(), cache_root)
        .with_quality(Quality::new(config.images.quality))
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores: the config can only lower it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
