//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all bridges.
///
/// The configuration file is optional: every required setting can also come
/// from the environment.
#[derive(Parser, Debug, Clone)]
#[command(about = "Serialink telemetry bridge")]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments from the process command line.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
