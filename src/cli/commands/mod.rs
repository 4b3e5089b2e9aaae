//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `identify`: Segment a recording and print its tracklist
//! - `cache`: Cache statistics and maintenance
//! - `tools`: External tool checks and effective configuration

mod cache;
mod identify;
mod tools;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::{self, Config, Credentials};
use crate::identification::IdentificationError;

pub use cache::{cmd_cache_cleanup, cmd_cache_clear, cmd_cache_stats};
pub use identify::cmd_identify;
pub use tools::{cmd_check_tools, cmd_show_config};

/// Tracklister CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Credentials that override the config file
#[derive(Args, Debug, Default)]
pub struct CredentialArgs {
    /// AcoustID API key
    #[arg(long, env = "ACOUSTID_API_KEY", global = true, hide_env_values = true)]
    pub acoustid_api_key: Option<String>,
    /// ACRCloud access key
    #[arg(long, env = "ACRCLOUD_ACCESS_KEY", global = true, hide_env_values = true)]
    pub acrcloud_access_key: Option<String>,
    /// ACRCloud access secret
    #[arg(long, env = "ACRCLOUD_ACCESS_SECRET", global = true, hide_env_values = true)]
    pub acrcloud_access_secret: Option<String>,
}

impl From<&CredentialArgs> for Credentials {
    fn from(args: &CredentialArgs) -> Self {
        Credentials {
            acoustid_api_key: args.acoustid_api_key.clone(),
            acrcloud_access_key: args.acrcloud_access_key.clone(),
            acrcloud_access_secret: args.acrcloud_access_secret.clone(),
        }
    }
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Identify the tracks in a recording
    Identify {
        /// Path to the recording
        input: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Skip the result cache for this run
        #[arg(long)]
        no_cache: bool,
        /// Primary provider (overrides the config file)
        #[arg(long)]
        provider: Option<String>,
        /// Fallback providers, tried in order when the primary fails
        #[arg(long, value_delimiter = ',')]
        fallback: Vec<String>,
    },
    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Check that ffmpeg, ffprobe and fpcalc are installed
    CheckTools,
    /// Print the effective configuration (secrets masked)
    Config,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Show hit counters and disk usage
    Stats,
    /// Remove every cached entry
    Clear,
    /// Remove entries older than the given age and repair the index
    Cleanup {
        /// Maximum entry age in seconds (default: cache.max_age_seconds)
        #[arg(long)]
        max_age: Option<u64>,
    },
}

/// Load the config file and apply command-line credentials.
fn effective_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    config.credentials.merge(Credentials::from(&cli.credentials));
    config
}

/// Run the specified CLI command.
/// Whether a command already told the user about this failure, leaving only
/// the exit status to set.
pub fn already_reported(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<IdentificationError>(),
        Some(IdentificationError::NoResults { .. })
    )
}

pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let mut config = effective_config(cli);
    let rt = Runtime::new()?;

    match &cli.command {
        Commands::Identify {
            input,
            json,
            no_cache,
            provider,
            fallback,
        } => {
            if *no_cache {
                config.cache.enabled = false;
            }
            if let Some(primary) = provider {
                config.providers.primary = primary.clone();
            }
            if !fallback.is_empty() {
                config.providers.fallback_enabled = true;
                config.providers.fallback = fallback.clone();
            }
            cmd_identify(&rt, &config, input, *json)
        }
        Commands::Cache { action } => match action {
            CacheCommand::Stats => cmd_cache_stats(&rt, &config),
            CacheCommand::Clear => cmd_cache_clear(&rt, &config),
            CacheCommand::Cleanup { max_age } => cmd_cache_cleanup(&rt, &config, *max_age),
        },
        Commands::CheckTools => cmd_check_tools(&rt, &config),
        Commands::Config => cmd_show_config(&config, cli.config.as_deref()),
    }
}

pub(crate) fn print_fpcalc_install_instructions() {
    eprintln!("Install Chromaprint:");
    eprintln!("  Windows: winget install AcoustID.Chromaprint");
    eprintln!("  macOS:   brew install chromaprint");
    eprintln!("  Linux:   apt install libchromaprint-tools");
}

pub(crate) fn print_ffmpeg_install_instructions() {
    eprintln!("Install FFmpeg:");
    eprintln!("  Windows: winget install Gyan.FFmpeg");
    eprintln!("  macOS:   brew install ffmpeg");
    eprintln!("  Linux:   apt install ffmpeg");
}
