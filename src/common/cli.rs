//! CLI argument parsing for LZTS tools
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Each binary has its own Args struct that embeds CommonArgs

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Common arguments shared across all LZTS tools
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", env = "LZTS_CONFIG", default_value = "config.toml")]
    pub config_file: String,
}

/// Output style for report-printing tools
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Arguments for the synthetic data file writer
#[derive(Parser, Debug, Clone)]
pub struct EmulatorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Output data file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Number of acquisition rounds (one POD per enabled channel each)
    #[arg(short = 'n', long = "rounds", default_value = "100")]
    pub rounds: u32,

    /// RNG seed for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Arguments for the offline POD walker
#[derive(Parser, Debug, Clone)]
pub struct PodDumpArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Data file to read
    pub input: PathBuf,

    /// Print every POD header, not only the survey report
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Arguments for the headless viewer
#[derive(Parser, Debug, Clone)]
pub struct ViewerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Replay a data file instead of the built-in emulator
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Emulator rounds when no input file is given
    #[arg(short = 'n', long = "rounds", default_value = "1000")]
    pub rounds: u32,

    /// Override enabled channels (logical indices 0-15)
    #[arg(short = 'c', long = "channel", action = clap::ArgAction::Append)]
    pub channels: Vec<u8>,
}

/// Arguments for the delay calibration tool
#[derive(Parser, Debug, Clone)]
pub struct CalibrateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Recorded sweep, one line of 0/1 characters per lane
    pub sweep: PathBuf,

    /// Append the resulting CSV row to this file
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// First delay value of the recorded sweep
    #[arg(long)]
    pub delay_min: Option<u32>,
}
