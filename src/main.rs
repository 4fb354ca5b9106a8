// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depthcam")]
#[command(about = "Depth camera capture and fusion pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/depthcam/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sensor modes and the one a session would select
    Formats,

    /// Run the live pipeline and print fused frames
    Stream {
        /// Stop after this many fused frames
        #[arg(short, long, default_value = "30")]
        frames: u64,
    },

    /// Take a still photo with embedded depth and a depth thumbnail
    Photo {
        /// Output directory (default: ~/Pictures/depthcam)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the thumbnail bytes to this device or file
        #[arg(short, long)]
        link: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=depthcam=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = depthcam::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Formats => cli::list_formats(&config),
        Commands::Stream { frames } => cli::stream(&config, frames),
        Commands::Photo { output, link } => cli::take_photo(&config, output, link),
    }
}
