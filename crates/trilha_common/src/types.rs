//! Shared records owned by the storage layer.
//!
//! These are the long-lived shapes the engine reads and writes inside a
//! transaction. Ephemeral values (rewards, level info, notifications) live in
//! their own modules.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::progression::ProgressionResolver;

/// Opaque user identifier handed over by the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Persisted progression row for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgression {
    pub user_id: UserId,
    /// Cumulative XP, never decreases
    pub total_xp: u64,
    /// Derived from `total_xp`, stored for cheap reads
    pub level: u8,
    pub coins: u64,
    pub gems: u64,
}

impl UserProgression {
    /// Fresh progression for a user with no history
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total_xp: 0,
            level: ProgressionResolver::resolve(0).level,
            coins: 0,
            gems: 0,
        }
    }

    /// Fold an XP/coin delta in, keeping `level` consistent with `total_xp`
    pub fn apply_delta(&mut self, xp_delta: u64, coin_delta: u64) {
        self.total_xp = self.total_xp.saturating_add(xp_delta);
        self.coins = self.coins.saturating_add(coin_delta);
        self.level = ProgressionResolver::resolve(self.total_xp).level;
    }
}

/// Which activity a streak counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreakType {
    #[default]
    DailyLesson,
}

impl StreakType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakType::DailyLesson => "daily_lesson",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily_lesson" => Some(StreakType::DailyLesson),
            _ => None,
        }
    }
}

/// Consecutive-day activity record
///
/// `longest_streak >= current_streak` holds for every record produced by
/// `StreakTracker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub user_id: UserId,
    pub streak_type: StreakType,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: NaiveDate,
}

/// Persisted badge unlock, unique per (user, badge)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBadge {
    pub user_id: UserId,
    pub badge_id: String,
    pub unlocked_at: DateTime<Utc>,
}

/// Lifetime lesson statistics, the input to badge predicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonStats {
    pub lessons_completed: u64,
    /// Completions with a score of 100
    pub perfect_scores: u64,
    /// Fastest completion in minutes, if any lesson was completed
    pub fastest_completion_minutes: Option<f64>,
    pub total_minutes: f64,
}

impl LessonStats {
    /// Stats after folding in one more completion; only an exact 100 is perfect
    pub fn with_completion(&self, minutes: f64, score: f64) -> Self {
        let fastest = match self.fastest_completion_minutes {
            Some(current) if current <= minutes => current,
            _ => minutes,
        };
        Self {
            lessons_completed: self.lessons_completed + 1,
            perfect_scores: self.perfect_scores + u64::from(score == 100.0),
            fastest_completion_minutes: Some(fastest),
            total_minutes: self.total_minutes + minutes,
        }
    }
}

/// Per-day activity counters for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub lessons_completed: u32,
    pub xp_earned: u64,
}

impl DailyActivity {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            lessons_completed: 0,
            xp_earned: 0,
        }
    }
}
