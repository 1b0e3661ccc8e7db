//! In-memory progression store.
//!
//! Transactions work on a private copy of the user's state and publish it on
//! commit. Same-user exclusivity is optimistic: a second read-write
//! transaction for a user already in flight fails with `Conflict`, and the
//! engine retries. Different users never contend.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use tracing::debug;
use trilha_common::{
    DailyActivity, LessonCompletionEvent, LessonStats, StreakRecord, StreakType, UserBadge,
    UserId, UserProgression,
};

use super::{ProgressionStore, StoreResult, StoreTransaction, TxMode};
use crate::error::StoreError;

/// Injected failure, for exercising rollback and breaker paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// `begin_transaction` fails as if storage were unreachable
    Begin,
    /// `write_streak` fails, after progression was already written
    WriteStreak,
    /// `commit` fails and nothing is published
    Commit,
}

#[derive(Debug, Clone, Default)]
struct UserState {
    progression: Option<UserProgression>,
    streaks: HashMap<StreakType, StreakRecord>,
    badges: Vec<UserBadge>,
    stats: LessonStats,
    activity: BTreeMap<NaiveDate, DailyActivity>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, UserState>>,
    in_flight: Mutex<HashSet<UserId>>,
    fail_point: Mutex<Option<FailPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_point(&self, point: Option<FailPoint>) {
        if let Ok(mut guard) = self.fail_point.lock() {
            *guard = point;
        }
    }

    fn fails_at(&self, point: FailPoint) -> bool {
        self.fail_point
            .lock()
            .map(|guard| *guard == Some(point))
            .unwrap_or(false)
    }

    /// Committed progression row, bypassing transactions
    pub fn progression(&self, user_id: &UserId) -> Option<UserProgression> {
        self.users
            .read()
            .ok()
            .and_then(|users| users.get(user_id).and_then(|s| s.progression.clone()))
    }

    /// Committed badge rows, bypassing transactions
    pub fn badges(&self, user_id: &UserId) -> Vec<UserBadge> {
        self.users
            .read()
            .ok()
            .and_then(|users| users.get(user_id).map(|s| s.badges.clone()))
            .unwrap_or_default()
    }

    fn snapshot(&self, user_id: &UserId) -> StoreResult<UserState> {
        let users = self
            .users
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        Ok(users.get(user_id).cloned().unwrap_or_default())
    }

    fn publish(&self, user_id: &UserId, state: UserState) -> StoreResult<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        users.insert(user_id.clone(), state);
        Ok(())
    }

    fn release(&self, user_id: &UserId) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(user_id);
        }
    }
}

impl ProgressionStore for MemoryStore {
    fn begin_transaction(
        &self,
        user_id: &UserId,
        mode: TxMode,
    ) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        if self.fails_at(FailPoint::Begin) {
            return Err(StoreError::Backend("storage unavailable".to_string()));
        }

        if mode == TxMode::ReadWrite {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
            if !in_flight.insert(user_id.clone()) {
                debug!(user = %user_id, "User already has a transaction in flight");
                return Err(StoreError::Conflict(format!(
                    "user {} is locked by another transaction",
                    user_id
                )));
            }
        }

        let working = match self.snapshot(user_id) {
            Ok(state) => state,
            Err(e) => {
                if mode == TxMode::ReadWrite {
                    self.release(user_id);
                }
                return Err(e);
            }
        };

        Ok(Box::new(MemoryTransaction {
            store: self,
            user_id: user_id.clone(),
            mode,
            working,
            finished: false,
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    user_id: UserId,
    mode: TxMode,
    working: UserState,
    finished: bool,
}

impl MemoryTransaction<'_> {
    fn check_user(&self, user_id: &UserId) -> StoreResult<()> {
        if *user_id != self.user_id {
            return Err(StoreError::Backend(format!(
                "transaction for {} cannot touch {}",
                self.user_id, user_id
            )));
        }
        Ok(())
    }

    fn writable(&mut self, user_id: &UserId) -> StoreResult<&mut UserState> {
        self.check_user(user_id)?;
        if self.mode == TxMode::ReadOnly {
            return Err(StoreError::Backend("write in read-only transaction".to_string()));
        }
        Ok(&mut self.working)
    }

    fn readable(&self, user_id: &UserId) -> StoreResult<&UserState> {
        self.check_user(user_id)?;
        Ok(&self.working)
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn read_user_progression(&mut self, user_id: &UserId) -> StoreResult<Option<UserProgression>> {
        Ok(self.readable(user_id)?.progression.clone())
    }

    fn read_streak(
        &mut self,
        user_id: &UserId,
        streak_type: StreakType,
    ) -> StoreResult<Option<StreakRecord>> {
        Ok(self.readable(user_id)?.streaks.get(&streak_type).cloned())
    }

    fn read_unlocked_badge_ids(&mut self, user_id: &UserId) -> StoreResult<HashSet<String>> {
        Ok(self
            .readable(user_id)?
            .badges
            .iter()
            .map(|b| b.badge_id.clone())
            .collect())
    }

    fn read_user_badges(&mut self, user_id: &UserId) -> StoreResult<Vec<UserBadge>> {
        Ok(self.readable(user_id)?.badges.clone())
    }

    fn read_lesson_stats(&mut self, user_id: &UserId) -> StoreResult<LessonStats> {
        Ok(self.readable(user_id)?.stats.clone())
    }

    fn read_daily_activity(
        &mut self,
        user_id: &UserId,
        date: NaiveDate,
    ) -> StoreResult<DailyActivity> {
        Ok(self
            .readable(user_id)?
            .activity
            .get(&date)
            .cloned()
            .unwrap_or_else(|| DailyActivity::empty(date)))
    }

    fn read_activity_since(
        &mut self,
        user_id: &UserId,
        since: NaiveDate,
    ) -> StoreResult<Vec<DailyActivity>> {
        Ok(self
            .readable(user_id)?
            .activity
            .range(since..)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn record_lesson(
        &mut self,
        user_id: &UserId,
        event: &LessonCompletionEvent,
        date: NaiveDate,
    ) -> StoreResult<()> {
        let state = self.writable(user_id)?;
        state.stats = state.stats.with_completion(event.time_spent_minutes, event.score);
        state
            .activity
            .entry(date)
            .or_insert_with(|| DailyActivity::empty(date))
            .lessons_completed += 1;
        Ok(())
    }

    fn add_daily_xp(&mut self, user_id: &UserId, date: NaiveDate, xp: u64) -> StoreResult<()> {
        let state = self.writable(user_id)?;
        let day = state
            .activity
            .entry(date)
            .or_insert_with(|| DailyActivity::empty(date));
        day.xp_earned = day.xp_earned.saturating_add(xp);
        Ok(())
    }

    fn write_progression(
        &mut self,
        user_id: &UserId,
        xp_delta: u64,
        coin_delta: u64,
    ) -> StoreResult<()> {
        let state = self.writable(user_id)?;
        state
            .progression
            .get_or_insert_with(|| UserProgression::new(user_id.clone()))
            .apply_delta(xp_delta, coin_delta);
        Ok(())
    }

    fn write_streak(&mut self, record: &StreakRecord) -> StoreResult<()> {
        if self.store.fails_at(FailPoint::WriteStreak) {
            return Err(StoreError::Backend("streak write failed".to_string()));
        }
        let state = self.writable(&record.user_id)?;
        state.streaks.insert(record.streak_type, record.clone());
        Ok(())
    }

    fn insert_unlocked_badge(
        &mut self,
        user_id: &UserId,
        badge_id: &str,
        unlocked_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let state = self.writable(user_id)?;
        if state.badges.iter().any(|b| b.badge_id == badge_id) {
            return Ok(false);
        }
        state.badges.push(UserBadge {
            user_id: user_id.clone(),
            badge_id: badge_id.to_string(),
            unlocked_at,
        });
        Ok(true)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if self.mode == TxMode::ReadOnly {
            self.finished = true;
            return Ok(());
        }
        if self.store.fails_at(FailPoint::Commit) {
            return Err(StoreError::Backend("commit failed".to_string()));
        }
        let state = std::mem::take(&mut self.working);
        self.store.publish(&self.user_id, state)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(user = %self.user_id, "Dropping unfinished transaction, discarding writes");
        }
        if self.mode == TxMode::ReadWrite {
            self.store.release(&self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trilha_common::Difficulty;

    fn user() -> UserId {
        UserId::from("alice")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 2).unwrap()
    }

    #[test]
    fn test_commit_publishes() {
        let store = MemoryStore::new();
        let mut tx = store.begin_transaction(&user(), TxMode::ReadWrite).unwrap();
        tx.write_progression(&user(), 120, 24).unwrap();
        tx.commit().unwrap();

        let prog = store.progression(&user()).unwrap();
        assert_eq!(prog.total_xp, 120);
        assert_eq!(prog.level, 2);
    }

    #[test]
    fn test_drop_discards() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin_transaction(&user(), TxMode::ReadWrite).unwrap();
            tx.write_progression(&user(), 120, 24).unwrap();
        }
        assert!(store.progression(&user()).is_none());

        // Lock released on drop
        assert!(store.begin_transaction(&user(), TxMode::ReadWrite).is_ok());
    }

    #[test]
    fn test_same_user_conflicts_other_user_does_not() {
        let store = MemoryStore::new();
        let _held = store.begin_transaction(&user(), TxMode::ReadWrite).unwrap();

        let err = store
            .begin_transaction(&user(), TxMode::ReadWrite)
            .err()
            .unwrap();
        assert!(err.is_conflict());

        assert!(store
            .begin_transaction(&UserId::from("bob"), TxMode::ReadWrite)
            .is_ok());
        assert!(store.begin_transaction(&user(), TxMode::ReadOnly).is_ok());
    }

    #[test]
    fn test_duplicate_badge_insert_is_noop() {
        let store = MemoryStore::new();
        let mut tx = store.begin_transaction(&user(), TxMode::ReadWrite).unwrap();
        assert!(tx.insert_unlocked_badge(&user(), "first_lesson", Utc::now()).unwrap());
        assert!(!tx.insert_unlocked_badge(&user(), "first_lesson", Utc::now()).unwrap());
        tx.commit().unwrap();
        assert_eq!(store.badges(&user()).len(), 1);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin_transaction(&user(), TxMode::ReadOnly).unwrap();
        assert!(tx.write_progression(&user(), 1, 1).is_err());
    }

    #[test]
    fn test_transaction_is_user_scoped() {
        let store = MemoryStore::new();
        let mut tx = store.begin_transaction(&user(), TxMode::ReadWrite).unwrap();
        assert!(tx.read_user_progression(&UserId::from("mallory")).is_err());
    }

    #[test]
    fn test_record_lesson_and_activity() {
        let store = MemoryStore::new();
        let event = LessonCompletionEvent {
            user_id: user(),
            lesson_id: "l1".into(),
            time_spent_minutes: 12.0,
            score: 100.0,
            difficulty: Difficulty::Easy,
        };
        let mut tx = store.begin_transaction(&user(), TxMode::ReadWrite).unwrap();
        tx.record_lesson(&user(), &event, date()).unwrap();
        tx.add_daily_xp(&user(), date(), 96).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin_transaction(&user(), TxMode::ReadOnly).unwrap();
        let stats = tx.read_lesson_stats(&user()).unwrap();
        assert_eq!(stats.lessons_completed, 1);
        assert_eq!(stats.perfect_scores, 1);

        let day = tx.read_daily_activity(&user(), date()).unwrap();
        assert_eq!(day.lessons_completed, 1);
        assert_eq!(day.xp_earned, 96);

        let since = tx.read_activity_since(&user(), date().pred_opt().unwrap()).unwrap();
        assert_eq!(since.len(), 1);
    }

    #[test]
    fn test_commit_fail_point() {
        let store = MemoryStore::new();
        store.set_fail_point(Some(FailPoint::Commit));
        let mut tx = store.begin_transaction(&user(), TxMode::ReadWrite).unwrap();
        tx.write_progression(&user(), 50, 10).unwrap();
        assert!(tx.commit().is_err());
        assert!(store.progression(&user()).is_none());
    }
}
