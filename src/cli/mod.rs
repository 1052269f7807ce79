//! CLI Module
//!
//! Command-line interface for the Cantor renderer.

pub mod commands;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Cantor - layered robotic vocal renderer
#[derive(Parser, Debug)]
#[command(name = "cantor-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log detail (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render text into a mixed WAV
    #[command(name = "render")]
    Render {
        /// File containing the text to sing
        #[arg(short, long)]
        text: PathBuf,

        /// Output WAV path for the mix
        #[arg(short, long)]
        output: PathBuf,

        /// Render config (JSON); defaults apply when absent
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Length of the ambient stems in seconds
        #[arg(short, long)]
        duration: Option<f32>,

        /// Also write one WAV per stem next to the mix
        #[arg(long)]
        stems: bool,
    },

    /// Check a render config without rendering
    #[command(name = "validate-config")]
    ValidateConfig {
        /// Path to the config
        path: PathBuf,
    },

    /// List available engines in selection order
    #[command(name = "engines")]
    Engines,
}
