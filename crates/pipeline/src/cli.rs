//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use charla_domain::config::Config;
use charla_domain::Result;

#[derive(Parser)]
#[command(name = "charla", about = "Deterministic conversational pipeline server")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "charla.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Config inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report every issue.
    Validate,
    /// Print the resolved config (defaults applied).
    Show,
}

/// Load the config file; a missing file yields the built-in defaults.
pub fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}
