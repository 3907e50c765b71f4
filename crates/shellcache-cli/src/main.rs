//! shellcache - command line host for the offline cache manager.
//!
//! Drives the install/activate/fetch lifecycle against a real origin,
//! keeping buckets on disk between runs.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shellcache_core::utils::{format_size, truncate_string};
use shellcache_core::{
    CacheManager, DiskStorage, HttpNetwork, LocalHost, ManagerConfig, Mediation, Request, Worker,
};

/// Characters of a text body shown by `fetch` without `--output`
const BODY_PREVIEW_CHARS: usize = 400;

#[derive(Parser)]
#[command(name = "shellcache", version, about = "Versioned offline cache for an application shell")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the cache buckets
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision the shell resources of the configured version
    Install,
    /// Delete buckets of every other version
    Activate,
    /// Install then activate
    Update,
    /// Mediate one request through the cache
    Fetch {
        /// Path relative to the origin, or an absolute URL
        target: String,
        /// Write the response body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List buckets and the entries of the current one
    Buckets,
    /// Delete every bucket, current version included
    Clear,
    /// Show the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => ManagerConfig::config_path()?,
    };
    let cache_dir = cli.cache_dir;

    match cli.command {
        Command::Config { init } => show_config(&config_path, init)?,
        Command::Install => {
            let manager = build_manager(&config_path, cache_dir)?;
            let report = manager.provision().await?;
            println!("Installed {} ({} resources)", report.bucket, report.resources.len());
            for key in &report.resources {
                println!("  {}", key);
            }
        }
        Command::Activate => {
            let manager = build_manager(&config_path, cache_dir)?;
            let report = manager.collect().await?;
            print_collect(&report);
        }
        Command::Update => {
            let manager = build_manager(&config_path, cache_dir)?;
            let mut worker = Worker::new(manager, Arc::new(LocalHost::new()));
            let (provisioned, collected) = worker.start().await?;
            println!(
                "Installed {} ({} resources)",
                provisioned.bucket,
                provisioned.resources.len()
            );
            print_collect(&collected);
        }
        Command::Fetch { target, output } => {
            let manager = build_manager(&config_path, cache_dir)?;
            fetch(&manager, &target, output).await?;
        }
        Command::Buckets => {
            let manager = build_manager(&config_path, cache_dir)?;
            list_buckets(&manager).await?;
        }
        Command::Clear => {
            let manager = build_manager(&config_path, cache_dir)?;
            let cleared = manager.clear_all().await?;
            println!("Cleared {} bucket(s)", cleared.len());
            for name in cleared {
                println!("  {}", name);
            }
        }
    }

    Ok(())
}

/// Manager over the on-disk buckets and the real network
fn build_manager(config_path: &Path, cache_dir: Option<PathBuf>) -> Result<CacheManager> {
    let config = ManagerConfig::load_from(config_path)?;
    let cache_dir = match cache_dir {
        Some(dir) => dir,
        None => ManagerConfig::cache_dir()?,
    };
    info!(bucket = %config.bucket_name(), cache_dir = %cache_dir.display(), "shellcache starting");

    let storage = DiskStorage::new(cache_dir.clone())
        .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;
    let network = HttpNetwork::new().context("Failed to create HTTP client")?;
    Ok(CacheManager::new(config, Arc::new(storage), Arc::new(network))?)
}

fn show_config(path: &Path, init: bool) -> Result<()> {
    if init {
        ManagerConfig::default().save_to(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }
    let config = ManagerConfig::load_from(path)?;
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("# current bucket: {}", config.bucket_name());
    Ok(())
}

fn print_collect(report: &shellcache_core::CollectReport) {
    match &report.kept {
        Some(name) => println!("Kept {}", name),
        None => println!("No bucket for the current version yet"),
    }
    for name in &report.deleted {
        println!("  deleted {}", name);
    }
    for (name, error) in &report.failed {
        println!("  FAILED  {}: {}", name, error);
    }
}

async fn fetch(manager: &CacheManager, target: &str, output: Option<PathBuf>) -> Result<()> {
    let url = manager.config().resolve(target)?;
    let outcome = manager.mediate(Request::get(url.clone())).await;
    // Let the background cache write land before the process exits
    manager.settle().await;

    let outcome = outcome.with_context(|| format!("Failed to fetch {}", url))?;
    let source = outcome.source();
    let response = match outcome {
        Mediation::Passthrough => {
            println!("{} is not handled by the cache manager", url);
            return Ok(());
        }
        other => other
            .into_response()
            .context("mediated outcome without a response")?,
    };

    eprintln!(
        "{} {} from {} ({})",
        response.status,
        url,
        source,
        format_size(response.body.len())
    );

    match output {
        Some(path) => {
            std::fs::write(&path, &response.body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Saved to {}", path.display());
        }
        None => println!("{}", truncate_string(&response.text(), BODY_PREVIEW_CHARS)),
    }
    Ok(())
}

async fn list_buckets(manager: &CacheManager) -> Result<()> {
    let names = manager.bucket_names().await?;
    if names.is_empty() {
        println!("No buckets");
        return Ok(());
    }
    for name in &names {
        let marker = if name == manager.bucket_name() { "*" } else { " " };
        println!("{} {}", marker, name);
    }

    let entries = manager.bucket_entries().await?;
    if !entries.is_empty() {
        println!();
        println!("Entries in {}:", manager.bucket_name());
        for entry in entries {
            println!(
                "  {:>3}  {:>9}  {:<10}  {}",
                entry.status,
                format_size(entry.size),
                entry.age_display(),
                truncate_string(&entry.key.to_string(), 80)
            );
        }
    }
    Ok(())
}
