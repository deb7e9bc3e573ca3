//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod config_cmd;
mod engines;
mod process;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use docintake::Config;

#[derive(Parser)]
#[command(name = "docintake")]
#[command(about = "Scanned document intake and OCR orchestration")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run a PDF or image through the OCR pipeline
    Process {
        /// Document to process (.pdf, .png, .jpg, .jpeg)
        file: PathBuf,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Do not persist the result
        #[arg(long)]
        no_store: bool,
    },

    /// Show the stored status of a processed document
    Status {
        /// Document id (SHA-256 of the file)
        id: String,
    },

    /// List the configured engine chain and check each engine
    Engines,

    /// Print the effective configuration as TOML
    Config,
}

async fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(&path)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        }
        None => Ok(Config::load().await),
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config).await?;

    match cli.command {
        Commands::Process {
            file,
            json,
            no_store,
        } => process::cmd_process(&config, &file, json, no_store).await,
        Commands::Status { id } => status::cmd_status(&config, &id).await,
        Commands::Engines => engines::cmd_engines(&config).await,
        Commands::Config => config_cmd::cmd_config_show(&config),
    }
}
