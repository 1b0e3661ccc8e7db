//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution in `main.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use trilhad::Timeframe;

/// Trilha progression engine
#[derive(Parser)]
#[command(name = "trilhad")]
#[command(about = "Trilha - lesson progression and reward engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides $TRILHA_CONFIG and /etc/trilha/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a lesson completion and print the rewards it produced
    Apply {
        /// User id
        user: String,

        /// Lesson id
        #[arg(long)]
        lesson: String,

        /// Minutes spent on the lesson
        #[arg(long)]
        minutes: f64,

        /// Score, 0-100
        #[arg(long)]
        score: f64,

        /// easy, medium, hard or expert
        #[arg(long, default_value = "medium")]
        difficulty: String,
    },

    /// Show the progression dashboard for a user
    Snapshot { user: String },

    /// List a user's unlocked badges
    Badges { user: String },

    /// Show lifetime stats, or activity over a window with --timeframe
    Stats {
        user: String,

        /// day, week or month
        #[arg(long)]
        timeframe: Option<Timeframe>,
    },

    /// Print the badge catalog and level table
    Catalog,
}
