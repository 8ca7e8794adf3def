use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mtsforge")]
#[command(author, version, about = "Batch MTS to MP4 converter")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert files (or every matching file in directories)
    Convert(ConvertArgs),

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Args)]
pub struct ConvertArgs {
    /// Source files or directories
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Number of concurrent conversions
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Output extension
    #[arg(long)]
    pub ext: Option<String>,

    /// Keep source files after successful conversion
    #[arg(long)]
    pub keep_source: bool,

    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}
