use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe, translate and embed subtitles for a video file or a
    /// directory of video files
    Process {
        /// Input video file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Override the batch size chosen by hardware profiling
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override the beam size chosen by hardware profiling
        #[arg(long)]
        beam_size: Option<u32>,
    },

    /// Show detected hardware and the performance profile it maps to
    Probe,

    /// List configured target languages
    Languages,

    /// Write a default configuration file
    Init {
        /// Destination path
        #[arg(short, long, default_value = "jimaku.toml")]
        output: PathBuf,
    },

    /// Internal: isolated translation worker, started by `process`
    #[command(hide = true)]
    Worker {
        /// Manifest file written by the parent process
        #[arg(long)]
        manifest: PathBuf,
    },
}
