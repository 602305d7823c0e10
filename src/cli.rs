use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "encodeforge")]
#[command(author, version, about = "Preset-driven media library transcoding")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the library file holding jobs, presets and filters
    #[arg(short, long, global = true)]
    pub library: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe a file and print the encoder command lines a preset builds for it
    Args {
        /// Source media file
        #[arg(required = true)]
        file: PathBuf,

        /// Preset name from the library
        #[arg(short, long)]
        preset: String,

        /// Output path substituted into the command (defaults next to the source)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Initialise a job and process its work list
    Run {
        /// Job name from the library
        #[arg(short, long)]
        job: String,
    },

    /// List the jobs in the library
    Jobs {
        /// Initialise every job first and report the resulting phase states
        #[arg(long)]
        test: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration and library files
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
