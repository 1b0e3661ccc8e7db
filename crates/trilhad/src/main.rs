//! Trilha Daemon - progression and reward engine
//!
//! Composition root: wires SQLite storage, the LRU read cache and the wall
//! clock into a `ProgressionEngine`, runs one command, prints JSON.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trilha_common::{LessonCompletionInput, TrilhaConfig, UserId, BADGE_CATALOG, LEVEL_TABLE};
use trilhad::{LruReadCache, ProgressionEngine, SqliteStore, SystemClock};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TrilhaConfig::load_from(path)?,
        None => TrilhaConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    // RUST_LOG wins over the configured filter; logs go to stderr, JSON to stdout
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Catalog = cli.command {
        return print_json(&json!({ "badges": BADGE_CATALOG, "levels": LEVEL_TABLE }));
    }

    info!("Trilha v{} starting", env!("CARGO_PKG_VERSION"));
    let engine = build_engine(&config)?;

    match cli.command {
        Commands::Apply {
            user,
            lesson,
            minutes,
            score,
            difficulty,
        } => {
            let input = LessonCompletionInput::new(&lesson, minutes, score, &difficulty);
            let result = engine
                .apply_lesson_completion(&UserId::new(user), &input)
                .context("Failed to apply lesson completion")?;
            print_json(&result)
        }
        Commands::Snapshot { user } => {
            print_json(&engine.get_progression_snapshot(&UserId::new(user))?)
        }
        Commands::Badges { user } => print_json(&engine.get_badges(&UserId::new(user))?),
        Commands::Stats { user, timeframe } => {
            let user = UserId::new(user);
            match timeframe {
                Some(tf) => print_json(&engine.get_timeframe_stats(&user, tf)?),
                None => print_json(&engine.get_stats(&user)?),
            }
        }
        Commands::Catalog => Ok(()),
    }
}

fn build_engine(config: &TrilhaConfig) -> Result<ProgressionEngine> {
    let store = SqliteStore::open(&config.database.path, config.database.busy_timeout())
        .with_context(|| {
            format!(
                "Failed to open progression database {}",
                config.database.path.display()
            )
        })?;
    let cache = LruReadCache::new(config.cache.effective_capacity());

    Ok(ProgressionEngine::new(
        Arc::new(store),
        Arc::new(cache),
        Arc::new(SystemClock),
        config,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
