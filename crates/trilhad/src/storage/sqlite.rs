//! SQLite progression store
//!
//! Schema:
//! - user_progression: XP, level, wallet and write revision per user
//! - user_streaks: one row per (user, streak type)
//! - user_badges: unlocks, unique per (user, badge)
//! - lesson_stats: lifetime lesson counters per user
//! - daily_activity: lessons and XP per user per day
//!
//! Writers serialize per user, not per database. A read-write transaction
//! claims the user in the store's lease table (a second claim gets
//! `Conflict`), reads committed rows in autocommit mode and buffers its
//! writes. Commit flushes the buffer in one short `BEGIN IMMEDIATE`
//! transaction, so the database write lock is held only for the flush and
//! other users' writers proceed in parallel.
//!
//! Clones of a store share the lease table. Handles opened separately on
//! the same file (or other processes) are caught at commit: the flush
//! fails with `Conflict` if the user's `revision` moved since begin.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use trilha_common::{
    DailyActivity, LessonCompletionEvent, LessonStats, StreakRecord, StreakType, UserBadge,
    UserId, UserProgression,
};

use super::{ProgressionStore, StoreResult, StoreTransaction, TxMode};
use crate::error::StoreError;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS user_progression (
        user_id TEXT PRIMARY KEY,
        total_xp INTEGER NOT NULL DEFAULT 0,
        level INTEGER NOT NULL DEFAULT 1,
        coins INTEGER NOT NULL DEFAULT 0,
        gems INTEGER NOT NULL DEFAULT 0,
        revision INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_streaks (
        user_id TEXT NOT NULL,
        streak_type TEXT NOT NULL,
        current_streak INTEGER NOT NULL,
        longest_streak INTEGER NOT NULL,
        last_activity_date TEXT NOT NULL,
        PRIMARY KEY (user_id, streak_type)
    );

    CREATE TABLE IF NOT EXISTS user_badges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        badge_id TEXT NOT NULL,
        unlocked_at TEXT NOT NULL,
        UNIQUE (user_id, badge_id)
    );

    CREATE INDEX IF NOT EXISTS idx_badges_user ON user_badges(user_id);

    CREATE TABLE IF NOT EXISTS lesson_stats (
        user_id TEXT PRIMARY KEY,
        lessons_completed INTEGER NOT NULL DEFAULT 0,
        perfect_scores INTEGER NOT NULL DEFAULT 0,
        fastest_minutes REAL,
        total_minutes REAL NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS daily_activity (
        user_id TEXT NOT NULL,
        activity_date TEXT NOT NULL,
        lessons_completed INTEGER NOT NULL DEFAULT 0,
        xp_earned INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, activity_date)
    );
"#;

/// SQLite-backed progression store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    leases: Arc<Mutex<HashSet<UserId>>>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(&path)?;
        // WAL lets readers proceed while a writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Progression database ready");

        Ok(Self {
            path,
            busy_timeout,
            leases: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn claim(&self, user_id: &UserId) -> StoreResult<UserLease> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| StoreError::Backend("sqlite lease table poisoned".to_string()))?;
        if !leases.insert(user_id.clone()) {
            debug!(user = %user_id, "User already has a writer in flight");
            return Err(StoreError::Conflict(format!(
                "user {} is locked by another transaction",
                user_id
            )));
        }
        Ok(UserLease {
            leases: Arc::clone(&self.leases),
            user_id: user_id.clone(),
        })
    }
}

impl ProgressionStore for SqliteStore {
    fn begin_transaction(
        &self,
        user_id: &UserId,
        mode: TxMode,
    ) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        match mode {
            TxMode::ReadOnly => {
                let conn = self.connect()?;
                conn.execute_batch("BEGIN DEFERRED")?;
                Ok(Box::new(SqliteTransaction {
                    conn,
                    user_id: user_id.clone(),
                    writer: None,
                }))
            }
            TxMode::ReadWrite => {
                let lease = self.claim(user_id)?;
                let conn = self.connect()?;
                let base_revision = load_revision(&conn, user_id)?;
                Ok(Box::new(SqliteTransaction {
                    conn,
                    user_id: user_id.clone(),
                    writer: Some(Writer {
                        _lease: lease,
                        base_revision,
                        pending: PendingWrites::default(),
                    }),
                }))
            }
        }
    }
}

/// Holds a user's writer slot until dropped
#[derive(Debug)]
struct UserLease {
    leases: Arc<Mutex<HashSet<UserId>>>,
    user_id: UserId,
}

impl Drop for UserLease {
    fn drop(&mut self) {
        match self.leases.lock() {
            Ok(mut leases) => {
                leases.remove(&self.user_id);
            }
            Err(_) => warn!(user = %self.user_id, "Lease table poisoned, writer slot not released"),
        }
    }
}

/// Full row values a writer will flush at commit
#[derive(Debug, Default)]
struct PendingWrites {
    progression: Option<UserProgression>,
    streaks: HashMap<StreakType, StreakRecord>,
    badges: Vec<UserBadge>,
    stats: Option<LessonStats>,
    activity: BTreeMap<NaiveDate, DailyActivity>,
}

impl PendingWrites {
    fn is_empty(&self) -> bool {
        self.progression.is_none()
            && self.streaks.is_empty()
            && self.badges.is_empty()
            && self.stats.is_none()
            && self.activity.is_empty()
    }
}

#[derive(Debug)]
struct Writer {
    _lease: UserLease,
    /// Progression revision seen at begin; `None` if the user had no row
    base_revision: Option<i64>,
    pending: PendingWrites,
}

/// Dropping an unfinished transaction closes its connection, which rolls
/// back any open SQLite transaction and discards buffered writes.
struct SqliteTransaction {
    conn: Connection,
    user_id: UserId,
    writer: Option<Writer>,
}

impl SqliteTransaction {
    fn check_user(&self, user_id: &UserId) -> StoreResult<()> {
        if *user_id != self.user_id {
            return Err(StoreError::Backend(format!(
                "transaction for {} cannot touch {}",
                self.user_id, user_id
            )));
        }
        Ok(())
    }

    fn pending(&self) -> Option<&PendingWrites> {
        self.writer.as_ref().map(|w| &w.pending)
    }

    fn pending_mut(&mut self, user_id: &UserId) -> StoreResult<&mut PendingWrites> {
        self.check_user(user_id)?;
        self.writer
            .as_mut()
            .map(|w| &mut w.pending)
            .ok_or_else(|| StoreError::Backend("write in read-only transaction".to_string()))
    }
}

impl StoreTransaction for SqliteTransaction {
    fn read_user_progression(&mut self, user_id: &UserId) -> StoreResult<Option<UserProgression>> {
        self.check_user(user_id)?;
        if let Some(prog) = self.pending().and_then(|p| p.progression.clone()) {
            return Ok(Some(prog));
        }
        load_progression(&self.conn, user_id)
    }

    fn read_streak(
        &mut self,
        user_id: &UserId,
        streak_type: StreakType,
    ) -> StoreResult<Option<StreakRecord>> {
        self.check_user(user_id)?;
        if let Some(record) = self.pending().and_then(|p| p.streaks.get(&streak_type)) {
            return Ok(Some(record.clone()));
        }
        let row = self
            .conn
            .query_row(
                "SELECT current_streak, longest_streak, last_activity_date
                 FROM user_streaks WHERE user_id = ?1 AND streak_type = ?2",
                params![user_id.as_str(), streak_type.as_str()],
                |row| {
                    Ok(StreakRecord {
                        user_id: user_id.clone(),
                        streak_type,
                        current_streak: row.get::<_, i64>(0)? as u32,
                        longest_streak: row.get::<_, i64>(1)? as u32,
                        last_activity_date: row.get::<_, NaiveDate>(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn read_unlocked_badge_ids(&mut self, user_id: &UserId) -> StoreResult<HashSet<String>> {
        Ok(self
            .read_user_badges(user_id)?
            .into_iter()
            .map(|b| b.badge_id)
            .collect())
    }

    fn read_user_badges(&mut self, user_id: &UserId) -> StoreResult<Vec<UserBadge>> {
        self.check_user(user_id)?;
        let mut badges = load_badges(&self.conn, user_id)?;
        if let Some(pending) = self.pending() {
            badges.extend(pending.badges.iter().cloned());
            // Stable, so committed rows keep their id order within a timestamp
            badges.sort_by_key(|b| b.unlocked_at);
        }
        Ok(badges)
    }

    fn read_lesson_stats(&mut self, user_id: &UserId) -> StoreResult<LessonStats> {
        self.check_user(user_id)?;
        if let Some(stats) = self.pending().and_then(|p| p.stats.clone()) {
            return Ok(stats);
        }
        let stats = self
            .conn
            .query_row(
                "SELECT lessons_completed, perfect_scores, fastest_minutes, total_minutes
                 FROM lesson_stats WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| {
                    Ok(LessonStats {
                        lessons_completed: row.get::<_, i64>(0)? as u64,
                        perfect_scores: row.get::<_, i64>(1)? as u64,
                        fastest_completion_minutes: row.get::<_, Option<f64>>(2)?,
                        total_minutes: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(stats.unwrap_or_default())
    }

    fn read_daily_activity(
        &mut self,
        user_id: &UserId,
        date: NaiveDate,
    ) -> StoreResult<DailyActivity> {
        self.check_user(user_id)?;
        if let Some(day) = self.pending().and_then(|p| p.activity.get(&date)) {
            return Ok(day.clone());
        }
        let day = self
            .conn
            .query_row(
                "SELECT lessons_completed, xp_earned FROM daily_activity
                 WHERE user_id = ?1 AND activity_date = ?2",
                params![user_id.as_str(), date],
                |row| {
                    Ok(DailyActivity {
                        date,
                        lessons_completed: row.get::<_, i64>(0)? as u32,
                        xp_earned: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(day.unwrap_or_else(|| DailyActivity::empty(date)))
    }

    fn read_activity_since(
        &mut self,
        user_id: &UserId,
        since: NaiveDate,
    ) -> StoreResult<Vec<DailyActivity>> {
        self.check_user(user_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT activity_date, lessons_completed, xp_earned FROM daily_activity
             WHERE user_id = ?1 AND activity_date >= ?2 ORDER BY activity_date",
        )?;
        let mut days: BTreeMap<NaiveDate, DailyActivity> = stmt
            .query_map(params![user_id.as_str(), since], |row| {
                let day = DailyActivity {
                    date: row.get(0)?,
                    lessons_completed: row.get::<_, i64>(1)? as u32,
                    xp_earned: row.get::<_, i64>(2)? as u64,
                };
                Ok((day.date, day))
            })?
            .collect::<Result<_, _>>()?;
        if let Some(pending) = self.pending() {
            for (date, day) in pending.activity.range(since..) {
                days.insert(*date, day.clone());
            }
        }
        Ok(days.into_values().collect())
    }

    fn record_lesson(
        &mut self,
        user_id: &UserId,
        event: &LessonCompletionEvent,
        date: NaiveDate,
    ) -> StoreResult<()> {
        self.pending_mut(user_id)?;
        let stats = self
            .read_lesson_stats(user_id)?
            .with_completion(event.time_spent_minutes, event.score);
        let mut day = self.read_daily_activity(user_id, date)?;
        day.lessons_completed += 1;

        let pending = self.pending_mut(user_id)?;
        pending.stats = Some(stats);
        pending.activity.insert(date, day);
        Ok(())
    }

    fn add_daily_xp(&mut self, user_id: &UserId, date: NaiveDate, xp: u64) -> StoreResult<()> {
        self.pending_mut(user_id)?;
        let mut day = self.read_daily_activity(user_id, date)?;
        day.xp_earned += xp;
        self.pending_mut(user_id)?.activity.insert(date, day);
        Ok(())
    }

    fn write_progression(
        &mut self,
        user_id: &UserId,
        xp_delta: u64,
        coin_delta: u64,
    ) -> StoreResult<()> {
        self.pending_mut(user_id)?;
        let mut prog = self
            .read_user_progression(user_id)?
            .unwrap_or_else(|| UserProgression::new(user_id.clone()));
        prog.apply_delta(xp_delta, coin_delta);
        self.pending_mut(user_id)?.progression = Some(prog);
        Ok(())
    }

    fn write_streak(&mut self, record: &StreakRecord) -> StoreResult<()> {
        self.pending_mut(&record.user_id)?
            .streaks
            .insert(record.streak_type, record.clone());
        Ok(())
    }

    fn insert_unlocked_badge(
        &mut self,
        user_id: &UserId,
        badge_id: &str,
        unlocked_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.pending_mut(user_id)?;
        if self.read_unlocked_badge_ids(user_id)?.contains(badge_id) {
            return Ok(false);
        }
        self.pending_mut(user_id)?.badges.push(UserBadge {
            user_id: user_id.clone(),
            badge_id: badge_id.to_string(),
            unlocked_at,
        });
        Ok(true)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let Some(writer) = self.writer.take() else {
            self.conn.execute_batch("COMMIT")?;
            return Ok(());
        };
        if writer.pending.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load_revision(&tx, &self.user_id)?;
        if current != writer.base_revision {
            debug!(
                user = %self.user_id,
                base = ?writer.base_revision,
                current = ?current,
                "Progression changed under writer"
            );
            return Err(StoreError::Conflict(format!(
                "user {} was updated by another writer",
                self.user_id
            )));
        }
        flush(&tx, &self.user_id, &writer.pending)?;
        tx.commit()?;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        if self.writer.take().is_none() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

fn load_progression(conn: &Connection, user_id: &UserId) -> StoreResult<Option<UserProgression>> {
    let row = conn
        .query_row(
            "SELECT total_xp, level, coins, gems FROM user_progression WHERE user_id = ?1",
            params![user_id.as_str()],
            |row| {
                Ok(UserProgression {
                    user_id: user_id.clone(),
                    total_xp: row.get::<_, i64>(0)? as u64,
                    level: row.get::<_, i64>(1)? as u8,
                    coins: row.get::<_, i64>(2)? as u64,
                    gems: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn load_revision(conn: &Connection, user_id: &UserId) -> StoreResult<Option<i64>> {
    let revision = conn
        .query_row(
            "SELECT revision FROM user_progression WHERE user_id = ?1",
            params![user_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(revision)
}

fn load_badges(conn: &Connection, user_id: &UserId) -> StoreResult<Vec<UserBadge>> {
    let mut stmt = conn.prepare(
        "SELECT badge_id, unlocked_at FROM user_badges
         WHERE user_id = ?1 ORDER BY unlocked_at, id",
    )?;
    let badges = stmt
        .query_map(params![user_id.as_str()], |row| {
            Ok(UserBadge {
                user_id: user_id.clone(),
                badge_id: row.get(0)?,
                unlocked_at: row.get::<_, DateTime<Utc>>(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(badges)
}

/// Write buffered rows and bump the user's revision
fn flush(conn: &Connection, user_id: &UserId, pending: &PendingWrites) -> StoreResult<()> {
    match &pending.progression {
        Some(prog) => {
            conn.execute(
                "INSERT INTO user_progression (user_id, total_xp, level, coins, gems, revision, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                    total_xp = excluded.total_xp,
                    level = excluded.level,
                    coins = excluded.coins,
                    gems = excluded.gems,
                    revision = user_progression.revision + 1,
                    updated_at = excluded.updated_at",
                params![
                    user_id.as_str(),
                    prog.total_xp as i64,
                    prog.level as i64,
                    prog.coins as i64,
                    prog.gems as i64,
                    Utc::now()
                ],
            )?;
        }
        None => {
            conn.execute(
                "UPDATE user_progression SET revision = revision + 1 WHERE user_id = ?1",
                params![user_id.as_str()],
            )?;
        }
    }

    for record in pending.streaks.values() {
        conn.execute(
            "INSERT INTO user_streaks (user_id, streak_type, current_streak, longest_streak, last_activity_date)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, streak_type) DO UPDATE SET
                current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                last_activity_date = excluded.last_activity_date",
            params![
                record.user_id.as_str(),
                record.streak_type.as_str(),
                record.current_streak as i64,
                record.longest_streak as i64,
                record.last_activity_date
            ],
        )?;
    }

    for badge in &pending.badges {
        conn.execute(
            "INSERT OR IGNORE INTO user_badges (user_id, badge_id, unlocked_at) VALUES (?1, ?2, ?3)",
            params![user_id.as_str(), badge.badge_id, badge.unlocked_at],
        )?;
    }

    if let Some(stats) = &pending.stats {
        conn.execute(
            "INSERT INTO lesson_stats (user_id, lessons_completed, perfect_scores, fastest_minutes, total_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                lessons_completed = excluded.lessons_completed,
                perfect_scores = excluded.perfect_scores,
                fastest_minutes = excluded.fastest_minutes,
                total_minutes = excluded.total_minutes",
            params![
                user_id.as_str(),
                stats.lessons_completed as i64,
                stats.perfect_scores as i64,
                stats.fastest_completion_minutes,
                stats.total_minutes
            ],
        )?;
    }

    for day in pending.activity.values() {
        conn.execute(
            "INSERT INTO daily_activity (user_id, activity_date, lessons_completed, xp_earned)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, activity_date) DO UPDATE SET
                lessons_completed = excluded.lessons_completed,
                xp_earned = excluded.xp_earned",
            params![
                user_id.as_str(),
                day.date,
                i64::from(day.lessons_completed),
                day.xp_earned as i64
            ],
        )?;
    }

    debug!(
        user = %user_id,
        streaks = pending.streaks.len(),
        badges = pending.badges.len(),
        days = pending.activity.len(),
        "Flushed progression writes"
    );
    Ok(())
}
