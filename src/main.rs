//! Algebras - AI-powered localization automation
//!
//! Command line entry point: loads `algebras.toml`, sets up logging and
//! dispatches to the translation workflow.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use algebras::cache::FingerprintCache;
use algebras::cli::{Args, CacheAction, Commands};
use algebras::config::{Config, CONFIG_FILE};
use algebras::summary::format_duration;
use algebras::workflow::{RunOptions, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = setup_logging(args.verbose)?;

    let config_path = args.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    if let Commands::Init { force } = args.command {
        return init_config(&config_path, force);
    }

    if !config_path.exists() {
        anyhow::bail!(
            "No configuration found at {}. Run 'algebras init' first.",
            config_path.display()
        );
    }
    let config = Config::from_file(&config_path)?;
    let root = project_root(&config_path)?;

    match args.command {
        Commands::Translate {
            language,
            force,
            only_missing,
            regenerate,
        } => {
            let options = RunOptions {
                language,
                force,
                only_missing,
                regenerate,
                ..RunOptions::default()
            };
            run_translation(config, root, options).await?;
        }
        Commands::Update {
            language,
            full,
            use_git,
        } => {
            let options = RunOptions {
                language,
                force: full,
                use_git_history: use_git,
                ..RunOptions::default()
            };
            run_translation(config, root, options).await?;
        }
        Commands::Add { language } => {
            let mut config = config;
            let code = language.to_lowercase();
            if config.add_language(&code)? {
                config.save_to_file(&config_path)?;
                println!("Added language '{}' to {}", code, config_path.display());
                println!("Run 'algebras translate --language {}' to translate it", code);
            } else {
                println!("Language '{}' is already configured", code);
            }
        }
        Commands::Status { language } => {
            // Status never calls the backend, so no credentials are required
            let workflow = Workflow::offline(config, root);
            let report = workflow.status(language.as_deref()).await?;
            report.print();
        }
        Commands::Cache { action } => {
            let cache = FingerprintCache::open(config.resolved_cache_path(&root), config.cache.max_size_bytes);
            manage_cache(&cache, action)?;
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

async fn run_translation(config: Config, root: PathBuf, options: RunOptions) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight work...");
            ctrl_c.cancel();
        }
    });

    let workflow = Workflow::new(config, root, cancel)?;
    let summary = workflow.translate(&options).await?;
    summary.print();

    if summary.has_failures() {
        anyhow::bail!("{} strings could not be translated", summary.total_failed());
    }
    info!("Translation completed successfully");
    Ok(())
}

fn manage_cache(cache: &FingerprintCache, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Info => {
            let stats = cache.stats();
            println!("\nCache Statistics:");
            println!("Location: {}", cache.path().map(|p| p.display().to_string()).unwrap_or_default());
            println!("Entries: {}", stats.entries);
            println!("Size: {:.2} MB", stats.total_bytes as f64 / 1024.0 / 1024.0);
            println!("Limit: {:.2} MB", stats.max_bytes as f64 / 1024.0 / 1024.0);
        }
        CacheAction::List { limit } => {
            let entries = cache.entries();
            if entries.is_empty() {
                println!("No cached translations found.");
                return Ok(());
            }

            println!("\nCached Translations:");
            println!("{:<18} {:<15} {:<50}", "Fingerprint", "Cached", "Translation");
            println!("{}", "-".repeat(85));
            let now = Utc::now();
            for entry in entries.iter().take(limit) {
                let cached_ago = (now - entry.created_at).num_seconds().max(0) as u64;
                let preview: String = entry.translated_text.chars().take(47).collect();
                let preview = if preview.len() < entry.translated_text.len() {
                    format!("{}...", preview)
                } else {
                    preview
                };
                println!(
                    "{:<18} {:<15} {:<50}",
                    entry.fingerprint.as_str().get(..16).unwrap_or_default(),
                    format_duration(cached_ago),
                    preview.replace('\n', " ")
                );
            }
        }
        CacheAction::Clear => {
            let count = cache.len();
            cache.clear();
            cache.persist().context("Failed to save cleared cache")?;
            println!("Cleared {} cached translations", count);
        }
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; use --force to overwrite it", path.display());
    }
    Config::default().save_to_file(path)?;
    println!("Wrote starter configuration to {}", path.display());
    Ok(())
}

/// Files in the configuration are relative to the directory that holds it.
fn project_root(config_path: &Path) -> Result<PathBuf> {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.to_path_buf()),
        _ => Ok(std::env::current_dir()?),
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".algebras").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "algebras.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("algebras.log").display());

    Ok(guard)
}
