//! CLI argument parsing for vtl1mon

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vtl1mon")]
#[command(version)]
#[command(
    about = "Correlate secure-mode (VTL1) transitions with kernel stack walks",
    long_about = None
)]
pub struct Cli {
    /// CSV file to write correlated records to (created or truncated)
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Replay a JSON-lines capture of raw trace records instead of a live session
    #[arg(long = "replay", value_name = "CAPTURE")]
    pub replay: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra directory to search for module images (repeatable)
    #[arg(long = "symbols", value_name = "DIR")]
    pub symbols: Vec<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
