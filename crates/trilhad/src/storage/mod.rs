//! Storage collaborator.
//!
//! The engine sees storage as a transactional key/value surface: begin a
//! transaction scoped to one user, read and write that user's rows, then
//! commit or roll back. A read-write transaction holds the user's exclusive
//! lock until it finishes; dropping it unfinished rolls back.

pub mod memory;
pub mod sqlite;

pub use memory::{FailPoint, MemoryStore};
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use trilha_common::{
    DailyActivity, LessonCompletionEvent, LessonStats, StreakRecord, StreakType, UserBadge,
    UserId, UserProgression,
};

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Transaction intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Takes the per-user lock for a read-modify-write
    ReadWrite,
    /// Consistent read, no lock, writes rejected
    ReadOnly,
}

pub trait ProgressionStore: Send + Sync {
    fn begin_transaction(
        &self,
        user_id: &UserId,
        mode: TxMode,
    ) -> StoreResult<Box<dyn StoreTransaction + '_>>;
}

pub trait StoreTransaction {
    fn read_user_progression(&mut self, user_id: &UserId) -> StoreResult<Option<UserProgression>>;

    fn read_streak(
        &mut self,
        user_id: &UserId,
        streak_type: StreakType,
    ) -> StoreResult<Option<StreakRecord>>;

    fn read_unlocked_badge_ids(&mut self, user_id: &UserId) -> StoreResult<HashSet<String>>;

    /// Unlocked badges ordered by unlock time
    fn read_user_badges(&mut self, user_id: &UserId) -> StoreResult<Vec<UserBadge>>;

    fn read_lesson_stats(&mut self, user_id: &UserId) -> StoreResult<LessonStats>;

    /// Activity for one day, zeroed if the user did nothing that day
    fn read_daily_activity(&mut self, user_id: &UserId, date: NaiveDate)
        -> StoreResult<DailyActivity>;

    /// Days with activity on or after `since`, oldest first
    fn read_activity_since(
        &mut self,
        user_id: &UserId,
        since: NaiveDate,
    ) -> StoreResult<Vec<DailyActivity>>;

    /// Fold a completion into lesson stats and the day's lesson counter
    fn record_lesson(
        &mut self,
        user_id: &UserId,
        event: &LessonCompletionEvent,
        date: NaiveDate,
    ) -> StoreResult<()>;

    fn add_daily_xp(&mut self, user_id: &UserId, date: NaiveDate, xp: u64) -> StoreResult<()>;

    /// Add XP and coins, creating the row if needed; level follows XP
    fn write_progression(&mut self, user_id: &UserId, xp_delta: u64, coin_delta: u64)
        -> StoreResult<()>;

    fn write_streak(&mut self, record: &StreakRecord) -> StoreResult<()>;

    /// Returns false, without error, if the badge was already unlocked
    fn insert_unlocked_badge(
        &mut self,
        user_id: &UserId,
        badge_id: &str,
        unlocked_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
