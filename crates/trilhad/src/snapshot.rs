//! Read model.
//!
//! Dashboard, badge shelf and statistics views. Each view is read inside a
//! read-only transaction and then cached under its key until the next
//! committed write for that user purges it.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use trilha_common::badges;
use trilha_common::{
    DailyActivity, LevelInfo, ProgressionResolver, StreakRecord, StreakType, UserBadge, UserId,
    UserProgression,
};

use crate::cache::keys;
use crate::engine::ProgressionEngine;
use crate::error::ProgressionError;
use crate::storage::{StoreResult, StoreTransaction, TxMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub xp: u64,
    pub coins: u64,
    pub gems: u64,
}

/// Unlocked badge joined with its catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockedBadge {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub unlocked_at: DateTime<Utc>,
}

impl UnlockedBadge {
    fn from_record(record: &UserBadge) -> Self {
        // Storage only ever holds ids that came from the catalog
        let badge = badges::find(&record.badge_id)
            .unwrap_or_else(|| panic!("badge {:?} is not in the catalog", record.badge_id));
        Self {
            id: badge.id.to_string(),
            name: badge.name.to_string(),
            description: badge.description.to_string(),
            icon: badge.icon.to_string(),
            unlocked_at: record.unlocked_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakView {
    pub current: u32,
    pub longest: u32,
    pub last_activity_date: NaiveDate,
    /// Still extendable: activity today or yesterday
    pub active: bool,
}

impl StreakView {
    fn new(record: &StreakRecord, today: NaiveDate) -> Self {
        let active = (today - record.last_activity_date).num_days() <= 1;
        Self {
            current: if active { record.current_streak } else { 0 },
            longest: record.longest_streak,
            last_activity_date: record.last_activity_date,
            active,
        }
    }
}

/// Dashboard view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionSnapshot {
    pub user_id: UserId,
    pub level: LevelInfo,
    pub wallet: Wallet,
    pub badges: Vec<UnlockedBadge>,
    pub streak: Option<StreakView>,
}

/// Lifetime statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsView {
    pub total_xp: u64,
    pub level: u8,
    pub lessons_completed: u64,
    pub perfect_scores: u64,
    pub fastest_completion_minutes: Option<f64>,
    pub average_minutes: Option<f64>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub badges_unlocked: usize,
    pub badges_available: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
        }
    }

    /// Days covered, today included
    pub fn days(&self) -> i64 {
        match self {
            Timeframe::Day => 1,
            Timeframe::Week => 7,
            Timeframe::Month => 30,
        }
    }

    pub fn since(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.days() - 1)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "today" => Ok(Timeframe::Day),
            "week" => Ok(Timeframe::Week),
            "month" => Ok(Timeframe::Month),
            other => Err(format!("unknown timeframe '{}' (day, week, month)", other)),
        }
    }
}

/// Activity totals over a recent window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeStats {
    pub timeframe: Timeframe,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub lessons_completed: u64,
    pub xp_earned: u64,
    pub active_days: usize,
    pub daily: Vec<DailyActivity>,
}

impl ProgressionEngine {
    /// Dashboard for a user; users with no history get a level 1 snapshot
    pub fn get_progression_snapshot(
        &self,
        user_id: &UserId,
    ) -> Result<ProgressionSnapshot, ProgressionError> {
        let today = self.clock.today();
        self.read_cached(&keys::dashboard(user_id), user_id, |tx| {
            let progression = tx
                .read_user_progression(user_id)?
                .unwrap_or_else(|| UserProgression::new(user_id.clone()));
            let badges = tx.read_user_badges(user_id)?;
            let streak = tx.read_streak(user_id, StreakType::DailyLesson)?;

            Ok(ProgressionSnapshot {
                user_id: user_id.clone(),
                level: ProgressionResolver::resolve(progression.total_xp),
                wallet: Wallet {
                    xp: progression.total_xp,
                    coins: progression.coins,
                    gems: progression.gems,
                },
                badges: badges.iter().map(UnlockedBadge::from_record).collect(),
                streak: streak.as_ref().map(|s| StreakView::new(s, today)),
            })
        })
    }

    pub fn get_badges(&self, user_id: &UserId) -> Result<Vec<UnlockedBadge>, ProgressionError> {
        self.read_cached(&keys::badges(user_id), user_id, |tx| {
            Ok(tx
                .read_user_badges(user_id)?
                .iter()
                .map(UnlockedBadge::from_record)
                .collect())
        })
    }

    pub fn get_stats(&self, user_id: &UserId) -> Result<StatsView, ProgressionError> {
        let today = self.clock.today();
        self.read_cached(&keys::stats(user_id), user_id, |tx| {
            let progression = tx
                .read_user_progression(user_id)?
                .unwrap_or_else(|| UserProgression::new(user_id.clone()));
            let lessons = tx.read_lesson_stats(user_id)?;
            let streak = tx
                .read_streak(user_id, StreakType::DailyLesson)?
                .map(|s| StreakView::new(&s, today));
            let unlocked = tx.read_unlocked_badge_ids(user_id)?;

            let average_minutes = (lessons.lessons_completed > 0)
                .then(|| lessons.total_minutes / lessons.lessons_completed as f64);

            Ok(StatsView {
                total_xp: progression.total_xp,
                level: progression.level,
                lessons_completed: lessons.lessons_completed,
                perfect_scores: lessons.perfect_scores,
                fastest_completion_minutes: lessons.fastest_completion_minutes,
                average_minutes,
                current_streak: streak.as_ref().map(|s| s.current).unwrap_or(0),
                longest_streak: streak.as_ref().map(|s| s.longest).unwrap_or(0),
                badges_unlocked: unlocked.len(),
                badges_available: badges::BADGE_CATALOG.len(),
            })
        })
    }

    pub fn get_timeframe_stats(
        &self,
        user_id: &UserId,
        timeframe: Timeframe,
    ) -> Result<TimeframeStats, ProgressionError> {
        let today = self.clock.today();
        let since = timeframe.since(today);
        let key = keys::timeframe_stats(user_id, timeframe.as_str());
        self.read_cached(&key, user_id, |tx| {
            let daily: Vec<DailyActivity> = tx
                .read_activity_since(user_id, since)?
                .into_iter()
                .filter(|day| day.date <= today)
                .collect();

            Ok(TimeframeStats {
                timeframe,
                since,
                until: today,
                lessons_completed: daily.iter().map(|d| u64::from(d.lessons_completed)).sum(),
                xp_earned: daily.iter().map(|d| d.xp_earned).sum(),
                active_days: daily.iter().filter(|d| d.lessons_completed > 0).count(),
                daily,
            })
        })
    }

    /// Serve `key` from cache, or load it in a read-only transaction and cache it.
    /// The fill is dropped if the user's views were purged during the load.
    fn read_cached<T, F>(&self, key: &str, user_id: &UserId, load: F) -> Result<T, ProgressionError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut dyn StoreTransaction) -> StoreResult<T>,
    {
        if let Some(value) = self.cache.get(key) {
            match serde_json::from_value(value) {
                Ok(view) => {
                    debug!(key, "Read model cache hit");
                    return Ok(view);
                }
                Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
            }
        }

        let generation = self.invalidation.generation(user_id);
        let mut tx = self.store.begin_transaction(user_id, TxMode::ReadOnly)?;
        let loaded = load(tx.as_mut());
        if let Err(e) = tx.rollback() {
            warn!(user = %user_id, error = %e, "Read transaction rollback failed");
        }
        let view = loaded?;

        match serde_json::to_value(&view) {
            Ok(value) => {
                self.invalidation.set_if_current(
                    self.cache.as_ref(),
                    user_id,
                    generation,
                    key,
                    value,
                    self.cache_settings.ttl(),
                );
            }
            Err(e) => warn!(key, error = %e, "Failed to cache read model"),
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_timeframe_since() {
        assert_eq!(Timeframe::Day.since(day(10)), day(10));
        assert_eq!(Timeframe::Week.since(day(10)), day(4));
        assert_eq!(
            Timeframe::Month.since(day(10)),
            NaiveDate::from_ymd_opt(2024, 2, 10).unwrap()
        );
    }

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("Week".parse::<Timeframe>(), Ok(Timeframe::Week));
        assert_eq!("today".parse::<Timeframe>(), Ok(Timeframe::Day));
        assert!("year".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_streak_view_active_window() {
        let record = StreakRecord {
            user_id: UserId::from("u"),
            streak_type: StreakType::DailyLesson,
            current_streak: 4,
            longest_streak: 6,
            last_activity_date: day(9),
        };
        let view = StreakView::new(&record, day(10));
        assert!(view.active);
        assert_eq!(view.current, 4);

        let lapsed = StreakView::new(&record, day(12));
        assert!(!lapsed.active);
        assert_eq!(lapsed.current, 0);
        assert_eq!(lapsed.longest, 6);
    }

    #[test]
    #[should_panic(expected = "not in the catalog")]
    fn test_unknown_badge_id_panics() {
        UnlockedBadge::from_record(&UserBadge {
            user_id: UserId::from("u"),
            badge_id: "no_such_badge".to_string(),
            unlocked_at: Utc::now(),
        });
    }
}
