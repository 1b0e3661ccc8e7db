//! Progression Module
//!
//! Level curve for learners: a fixed ten-step threshold table and the pure
//! resolver that maps cumulative XP onto it.
//!
//! ## Level System
//!
//! - Levels 1-10, thresholds from 0 to 4500 XP
//! - Portuguese display names and an icon per level
//! - Terminal level reports 100% progress and 0 XP to next

pub mod levels;

pub use levels::{LevelEntry, LevelInfo, LevelUp, ProgressionResolver, LEVEL_TABLE};
