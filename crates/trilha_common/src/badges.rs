//! Badge catalog and unlock evaluation.
//!
//! Badges are a fixed table; each carries a `{type, value}` condition over
//! the user's lesson statistics and streak. Unlocks are one-time: the
//! evaluator only reports badges the user does not hold yet, in catalog
//! order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::types::{LessonStats, UserId};

/// Unlock predicate shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BadgeCondition {
    /// At least N lessons completed
    LessonCount(u64),
    /// Current streak of at least N days
    StreakDays(u32),
    /// At least N lessons finished with a score of 100
    PerfectScores(u64),
    /// A lesson completed in at most N minutes
    FastCompletion(u32),
}

impl BadgeCondition {
    pub fn is_met(&self, stats: &StatsSnapshot) -> bool {
        match *self {
            BadgeCondition::LessonCount(n) => stats.lessons.lessons_completed >= n,
            BadgeCondition::StreakDays(n) => stats.current_streak >= n,
            BadgeCondition::PerfectScores(n) => stats.lessons.perfect_scores >= n,
            BadgeCondition::FastCompletion(max_minutes) => stats
                .lessons
                .fastest_completion_minutes
                .is_some_and(|m| m <= f64::from(max_minutes)),
        }
    }
}

/// Static catalog entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Badge {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub condition: BadgeCondition,
    pub xp_reward: u64,
    pub coin_reward: u64,
}

impl Badge {
    const fn new(
        id: &'static str,
        name: &'static str,
        description: &'static str,
        icon: &'static str,
        condition: BadgeCondition,
        xp_reward: u64,
        coin_reward: u64,
    ) -> Self {
        Self { id, name, description, icon, condition, xp_reward, coin_reward }
    }
}

/// All badges, in unlock/report order
pub const BADGE_CATALOG: &[Badge] = &[
    // Lesson milestones
    Badge::new("first_lesson", "Primeiros Passos", "Complete sua primeira lição", "🎓",
        BadgeCondition::LessonCount(1), 25, 5),
    Badge::new("lessons_10", "Estudante Assíduo", "Complete 10 lições", "📖",
        BadgeCondition::LessonCount(10), 100, 20),
    Badge::new("lessons_50", "Maratonista do Saber", "Complete 50 lições", "🏃",
        BadgeCondition::LessonCount(50), 300, 60),
    Badge::new("lessons_100", "Centurião", "Complete 100 lições", "💯",
        BadgeCondition::LessonCount(100), 500, 100),

    // Streaks
    Badge::new("streak_3", "Em Chamas", "Estude 3 dias seguidos", "🔥",
        BadgeCondition::StreakDays(3), 50, 10),
    Badge::new("streak_7", "Semana Perfeita", "Estude 7 dias seguidos", "📅",
        BadgeCondition::StreakDays(7), 150, 30),
    Badge::new("streak_30", "Hábito de Ferro", "Estude 30 dias seguidos", "🏆",
        BadgeCondition::StreakDays(30), 500, 100),

    // Quality
    Badge::new("perfect_1", "Nota Máxima", "Tire 100 em uma lição", "⭐",
        BadgeCondition::PerfectScores(1), 30, 5),
    Badge::new("perfect_10", "Perfeccionista", "Tire 100 em 10 lições", "🌟",
        BadgeCondition::PerfectScores(10), 200, 40),

    // Speed
    Badge::new("fast_5", "Relâmpago", "Complete uma lição em até 5 minutos", "⚡",
        BadgeCondition::FastCompletion(5), 50, 10),
];

/// Look up a catalog entry by id
pub fn find(id: &str) -> Option<&'static Badge> {
    BADGE_CATALOG.iter().find(|b| b.id == id)
}

/// Statistics a badge predicate can look at
///
/// Built after the triggering completion has been folded in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub lessons: LessonStats,
    pub current_streak: u32,
    pub longest_streak: u32,
}

/// Finds badges newly earned by a stats snapshot
pub struct BadgeEvaluator;

impl BadgeEvaluator {
    /// Badges whose condition holds and that `already_unlocked` does not
    /// contain, in catalog order
    pub fn evaluate(
        user_id: &UserId,
        already_unlocked: &HashSet<String>,
        stats: &StatsSnapshot,
    ) -> Vec<&'static Badge> {
        let unlocked: Vec<&'static Badge> = BADGE_CATALOG
            .iter()
            .filter(|badge| !already_unlocked.contains(badge.id))
            .filter(|badge| badge.condition.is_met(stats))
            .collect();

        if !unlocked.is_empty() {
            debug!(
                user = %user_id,
                badges = ?unlocked.iter().map(|b| b.id).collect::<Vec<_>>(),
                "Badge conditions met"
            );
        }
        unlocked
    }

    /// Sum of XP and coins granted by a set of badges
    pub fn rewards(badges: &[&Badge]) -> (u64, u64) {
        badges
            .iter()
            .fold((0, 0), |(xp, coins), b| (xp + b.xp_reward, coins + b.coin_reward))
    }
}
