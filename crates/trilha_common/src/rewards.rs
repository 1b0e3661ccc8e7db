//! Reward Calculator
//!
//! Turns a validated lesson completion into raw XP and coins. Level
//! resolution happens later, against the user's new total.
//!
//! ## Formula
//!
//! | Factor           | Value                                       |
//! |------------------|---------------------------------------------|
//! | Base XP          | easy 80, medium 100, hard 130, expert 160   |
//! | Time multiplier  | `20 / minutes`, clamped to [0.6, 1.5]       |
//! | Score multiplier | `max(0.5, score / 100)`                     |
//! | Coins            | `round(xp * 0.2)`                           |

use serde::{Deserialize, Serialize};

use crate::events::{Difficulty, LessonCompletionEvent};

/// XP and coins earned by one lesson, before bonuses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardOutcome {
    pub xp_awarded: u64,
    pub coins_awarded: u64,
}

/// Tunable constants of the reward formula
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardRules {
    pub optimal_minutes: f64,
    pub min_time_multiplier: f64,
    pub max_time_multiplier: f64,
    pub min_score_multiplier: f64,
    pub coin_ratio: f64,
}

impl Default for RewardRules {
    fn default() -> Self {
        Self {
            optimal_minutes: 20.0,
            min_time_multiplier: 0.6,
            max_time_multiplier: 1.5,
            min_score_multiplier: 0.5,
            coin_ratio: 0.2,
        }
    }
}

/// Computes `RewardOutcome` from lesson completions
#[derive(Debug, Clone, Default)]
pub struct RewardCalculator {
    rules: RewardRules,
}

impl RewardCalculator {
    pub fn new(rules: RewardRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RewardRules {
        &self.rules
    }

    /// Base XP for a difficulty tier
    pub fn base_xp(difficulty: Difficulty) -> u64 {
        match difficulty {
            Difficulty::Easy => 80,
            Difficulty::Medium => 100,
            Difficulty::Hard => 130,
            Difficulty::Expert => 160,
        }
    }

    /// Faster than optimal earns more, slower earns less, within the clamp.
    /// A zero duration gets the maximum multiplier.
    pub fn time_multiplier(&self, minutes: f64) -> f64 {
        if minutes <= 0.0 {
            return self.rules.max_time_multiplier;
        }
        (self.rules.optimal_minutes / minutes)
            .clamp(self.rules.min_time_multiplier, self.rules.max_time_multiplier)
    }

    /// A score of 0 still earns the floor multiplier
    pub fn score_multiplier(&self, score: f64) -> f64 {
        (score / 100.0).max(self.rules.min_score_multiplier)
    }

    /// Calculate the reward for a completion
    ///
    /// Precondition: `event` came out of `LessonCompletionInput::validate`, so
    /// time is finite and non-negative and score is within 0-100.
    pub fn calculate(&self, event: &LessonCompletionEvent) -> RewardOutcome {
        let base = Self::base_xp(event.difficulty) as f64;
        let xp = (base
            * self.time_multiplier(event.time_spent_minutes)
            * self.score_multiplier(event.score))
        .round();
        let xp_awarded = xp.max(0.0) as u64;
        let coins_awarded = (xp_awarded as f64 * self.rules.coin_ratio).round().max(0.0) as u64;

        RewardOutcome {
            xp_awarded,
            coins_awarded,
        }
    }
}
