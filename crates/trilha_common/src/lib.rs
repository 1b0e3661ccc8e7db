//! Trilha Common - Domain model for the progression & reward engine.
//!
//! Everything in here is pure: level curve, reward math, badge catalog,
//! streak arithmetic, daily goals and the notification stagger. Storage and
//! caching live in `trilhad`.

pub mod badges;
pub mod config;
pub mod error;
pub mod events;
pub mod goals;
pub mod notifications;
pub mod progression;
pub mod rewards;
pub mod streaks;
pub mod types;

pub use badges::{Badge, BadgeCondition, BadgeEvaluator, StatsSnapshot, BADGE_CATALOG};
pub use config::TrilhaConfig;
pub use error::ValidationError;
pub use events::{Difficulty, LessonCompletionEvent, LessonCompletionInput};
pub use goals::{Goal, GoalCompletion, GoalMetric, DAILY_GOALS};
pub use notifications::{CompositionInput, NotificationComposer, NotificationEvent, NotificationKind};
pub use progression::{LevelInfo, LevelUp, ProgressionResolver, LEVEL_TABLE};
pub use rewards::{RewardCalculator, RewardOutcome, RewardRules};
pub use streaks::{StreakAdvance, StreakBonus, StreakTracker, STREAK_MILESTONES};
pub use types::*;
