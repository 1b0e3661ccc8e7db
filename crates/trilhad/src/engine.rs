//! Progression engine.
//!
//! One lesson completion becomes one atomic read-modify-write over a user's
//! progression: XP and coins, streak, badges and daily goals move together or
//! not at all. Notifications are composed only after commit, so a failed
//! transaction never announces anything.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

use chrono::{DateTime, NaiveDate, Utc};
use trilha_common::config::{CacheSettings, RetrySettings};
use trilha_common::goals;
use trilha_common::{
    Badge, BadgeEvaluator, CompositionInput, DailyActivity, GoalCompletion, LessonCompletionEvent,
    LessonCompletionInput, LevelInfo, LevelUp, NotificationComposer, NotificationEvent,
    ProgressionResolver, RewardCalculator, RewardOutcome, RewardRules, StatsSnapshot, StreakBonus,
    StreakRecord, StreakTracker, StreakType, TrilhaConfig, UserId, UserProgression,
};

use crate::cache::{keys, InvalidationGuard, ReadCache};
use crate::clock::Clock;
use crate::error::{ProgressionError, StoreError};
use crate::storage::{ProgressionStore, StoreResult, StoreTransaction, TxMode};
use crate::supervisor::{BackoffConfig, BackoffState, CircuitBreaker, CircuitState};

/// Everything one lesson completion produced
#[derive(Debug, Clone, Serialize)]
pub struct ProgressionResult {
    pub reward: RewardOutcome,
    pub level_up: Option<LevelUp>,
    pub new_badges: Vec<&'static Badge>,
    pub streak: StreakRecord,
    pub streak_bonus: Option<StreakBonus>,
    pub completed_goals: Vec<GoalCompletion>,
    /// Progression after every bonus was folded in
    pub progression: UserProgression,
    pub level: LevelInfo,
    pub notifications: Vec<NotificationEvent>,
}

/// State a transaction committed
struct Committed {
    before_xp: u64,
    progression: UserProgression,
    streak: StreakRecord,
    streak_bonus: Option<StreakBonus>,
    new_badges: Vec<&'static Badge>,
    completed_goals: Vec<GoalCompletion>,
}

pub struct ProgressionEngine {
    pub(crate) store: Arc<dyn ProgressionStore>,
    pub(crate) cache: Arc<dyn ReadCache>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cache_settings: CacheSettings,
    pub(crate) invalidation: InvalidationGuard,
    calculator: RewardCalculator,
    retry: RetrySettings,
    breaker: Mutex<CircuitBreaker>,
}

impl ProgressionEngine {
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        cache: Arc<dyn ReadCache>,
        clock: Arc<dyn Clock>,
        config: &TrilhaConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            cache_settings: config.cache.clone(),
            invalidation: InvalidationGuard::new(),
            calculator: RewardCalculator::new(RewardRules::default()),
            retry: config.retry.clone(),
            breaker: Mutex::new(
                CircuitBreaker::new(config.circuit.failure_threshold, config.circuit.cooldown())
                    .with_half_open_max(config.circuit.half_open_max_requests),
            ),
        }
    }

    pub fn with_reward_rules(mut self, rules: RewardRules) -> Self {
        self.calculator = RewardCalculator::new(rules);
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker
            .lock()
            .map(|b| b.state())
            .unwrap_or(CircuitState::Open)
    }

    /// Apply one lesson completion for `user_id`
    pub fn apply_lesson_completion(
        &self,
        user_id: &UserId,
        input: &LessonCompletionInput,
    ) -> Result<ProgressionResult, ProgressionError> {
        let event = input.validate(user_id)?;
        let reward = self.calculator.calculate(&event);
        debug!(
            user = %user_id,
            lesson = %event.lesson_id,
            xp = reward.xp_awarded,
            coins = reward.coins_awarded,
            "Computed lesson reward"
        );

        let committed = self.commit_with_retry(&event, reward)?;

        self.invalidation.invalidate(self.cache.as_ref(), user_id);

        let level_up = ProgressionResolver::level_up(committed.before_xp, committed.progression.total_xp);
        let notifications = NotificationComposer::compose(&CompositionInput {
            reward,
            level_up: level_up.as_ref(),
            new_badges: &committed.new_badges,
            streak_bonus: committed.streak_bonus,
            completed_goals: &committed.completed_goals,
        });
        self.stash_notifications(&notifications);

        if let Some(up) = &level_up {
            info!(user = %user_id, from = up.from.level, to = up.to.level, "Level up");
        }
        info!(
            user = %user_id,
            lesson = %event.lesson_id,
            xp = reward.xp_awarded,
            total_xp = committed.progression.total_xp,
            level = committed.progression.level,
            badges = ?committed.new_badges.iter().map(|b| b.id).collect::<Vec<_>>(),
            streak = committed.streak.current_streak,
            "Lesson completion applied"
        );

        Ok(ProgressionResult {
            reward,
            level_up,
            level: ProgressionResolver::resolve(committed.progression.total_xp),
            new_badges: committed.new_badges,
            streak: committed.streak,
            streak_bonus: committed.streak_bonus,
            completed_goals: committed.completed_goals,
            progression: committed.progression,
            notifications,
        })
    }

    /// Look up a recently composed notification by id
    pub fn get_notification(&self, id: &str) -> Option<NotificationEvent> {
        self.cache
            .get(&keys::notification(id))
            .and_then(|value| serde_json::from_value(value).ok())
    }

    fn stash_notifications(&self, notifications: &[NotificationEvent]) {
        let ttl = self.cache_settings.notification_ttl();
        for note in notifications {
            match serde_json::to_value(note) {
                Ok(value) => self.cache.set(&keys::notification(&note.id), value, ttl),
                Err(e) => warn!(id = %note.id, error = %e, "Failed to cache notification"),
            }
        }
    }

    /// Run the transaction, retrying lock conflicts with backoff
    fn commit_with_retry(
        &self,
        event: &LessonCompletionEvent,
        reward: RewardOutcome,
    ) -> Result<Committed, ProgressionError> {
        let max_attempts = self.retry.effective_max_attempts();
        let mut backoff = BackoffState::new(BackoffConfig::from(&self.retry));
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.admit()?;

            match self.run_transaction(event, reward) {
                Ok(committed) => {
                    self.record_outcome(true);
                    return Ok(committed);
                }
                Err(StoreError::Conflict(detail)) => {
                    self.release_admission();
                    if attempt >= max_attempts {
                        warn!(
                            user = %event.user_id,
                            attempts = attempt,
                            "Giving up on conflicting progression update"
                        );
                        return Err(ProgressionError::ConcurrencyConflict {
                            attempts: attempt,
                            detail,
                        });
                    }
                    let delay = backoff.next_backoff();
                    debug!(
                        user = %event.user_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Progression update conflicted, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(StoreError::Backend(msg)) => {
                    self.record_outcome(false);
                    warn!(user = %event.user_id, error = %msg, "Progression update failed");
                    return Err(ProgressionError::Persistence(msg));
                }
            }
        }
    }

    fn admit(&self) -> Result<(), ProgressionError> {
        let mut breaker = self
            .breaker
            .lock()
            .map_err(|_| ProgressionError::Persistence("circuit breaker poisoned".to_string()))?;
        if breaker.allow_request() {
            Ok(())
        } else {
            Err(ProgressionError::Persistence(
                "storage circuit open, failing fast".to_string(),
            ))
        }
    }

    fn record_outcome(&self, success: bool) {
        if let Ok(mut breaker) = self.breaker.lock() {
            if success {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        }
    }

    /// A conflict says nothing about storage health
    fn release_admission(&self) {
        if let Ok(mut breaker) = self.breaker.lock() {
            breaker.release();
        }
    }

    fn run_transaction(
        &self,
        event: &LessonCompletionEvent,
        reward: RewardOutcome,
    ) -> StoreResult<Committed> {
        let now = self.clock.now();
        let today = now.date_naive();

        let mut tx = self
            .store
            .begin_transaction(&event.user_id, TxMode::ReadWrite)?;

        match apply_in_transaction(tx.as_mut(), event, reward, today, now) {
            Ok(committed) => {
                tx.commit()?;
                Ok(committed)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!(user = %event.user_id, error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn apply_in_transaction(
    tx: &mut dyn StoreTransaction,
    event: &LessonCompletionEvent,
    reward: RewardOutcome,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> StoreResult<Committed> {
    let user_id = &event.user_id;

    let before = tx
        .read_user_progression(user_id)?
        .unwrap_or_else(|| UserProgression::new(user_id.clone()));
    let previous_streak = tx.read_streak(user_id, StreakType::DailyLesson)?;
    let unlocked = tx.read_unlocked_badge_ids(user_id)?;
    let lesson_stats = tx.read_lesson_stats(user_id)?;
    let activity_before = tx.read_daily_activity(user_id, today)?;

    tx.record_lesson(user_id, event, today)?;
    tx.write_progression(user_id, reward.xp_awarded, reward.coins_awarded)?;

    let advance =
        StreakTracker::advance(previous_streak.as_ref(), user_id, StreakType::DailyLesson, today);
    if advance.changed {
        tx.write_streak(&advance.record)?;
    }
    let streak_bonus = StreakTracker::milestone_bonus(&advance);

    let snapshot = StatsSnapshot {
        lessons: lesson_stats.with_completion(event.time_spent_minutes, event.score),
        current_streak: advance.record.current_streak,
        longest_streak: advance.record.longest_streak,
    };
    let mut new_badges = Vec::new();
    for badge in BadgeEvaluator::evaluate(user_id, &unlocked, &snapshot) {
        if tx.insert_unlocked_badge(user_id, badge.id, now)? {
            new_badges.push(badge);
        }
    }
    let (badge_xp, badge_coins) = BadgeEvaluator::rewards(&new_badges);
    let (streak_xp, streak_coins) = streak_bonus.map(|b| (b.xp, b.coins)).unwrap_or((0, 0));

    let earned_before_goals = reward.xp_awarded + streak_xp + badge_xp;
    let activity_after = DailyActivity {
        lessons_completed: activity_before.lessons_completed + 1,
        xp_earned: activity_before.xp_earned + earned_before_goals,
        ..activity_before.clone()
    };
    let completed_goals = goals::completed_goals(&activity_before, &activity_after);
    let (goal_xp, goal_coins) = completed_goals
        .iter()
        .fold((0, 0), |(xp, coins), g| (xp + g.xp_reward, coins + g.coin_reward));

    let bonus_xp = streak_xp + badge_xp + goal_xp;
    let bonus_coins = streak_coins + badge_coins + goal_coins;
    if bonus_xp > 0 || bonus_coins > 0 {
        tx.write_progression(user_id, bonus_xp, bonus_coins)?;
    }
    tx.add_daily_xp(user_id, today, earned_before_goals + goal_xp)?;

    let progression = tx
        .read_user_progression(user_id)?
        .ok_or_else(|| StoreError::Backend(format!("progression for {} vanished mid-transaction", user_id)))?;

    Ok(Committed {
        before_xp: before.total_xp,
        progression,
        streak: advance.record,
        streak_bonus,
        new_badges,
        completed_goals,
    })
}
