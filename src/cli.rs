use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "AI-powered localization for your project files", long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (default: ./algebras.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate missing and outdated strings into the configured languages
    Translate {
        /// Only translate into this language
        #[arg(short, long)]
        language: Option<String>,

        /// Retranslate every string, even if it is up to date
        #[arg(short, long)]
        force: bool,

        /// Only translate keys missing from target files
        #[arg(long)]
        only_missing: bool,

        /// Rewrite target files from scratch instead of updating them in place
        #[arg(long)]
        regenerate: bool,
    },

    /// Retranslate strings whose source text changed since the last run
    Update {
        /// Only update this language
        #[arg(short, long)]
        language: Option<String>,

        /// Retranslate every string instead of only missing and outdated ones
        #[arg(long)]
        full: bool,

        /// Also use git history to find outdated strings (slower)
        #[arg(long)]
        use_git: bool,
    },

    /// Add a target language to the configuration
    Add {
        /// Language code, e.g. `fr` or `pt-BR`
        language: String,
    },

    /// Show how many strings are missing or outdated per language
    Status {
        /// Only report this language
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Manage the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Write a starter configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show cache location, size and entry count
    Info,

    /// List cached translations, most recently used first
    List {
        /// Maximum number of entries to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Remove all cached translations
    Clear,
}
