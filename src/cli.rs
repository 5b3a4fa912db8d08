//! Command-line flags for the octolink binary

use clap::Parser;

/// Octolink - URL shortener with real-time visit analytics
#[derive(Parser, Debug)]
#[command(name = "octolink")]
#[command(version)]
#[command(about = "URL shortener with real-time visit analytics", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short = 'c', default_value = "config.toml")]
    pub config: String,

    /// Write a sample configuration to the given path and exit
    #[arg(long, value_name = "PATH")]
    pub generate_config: Option<String>,
}
