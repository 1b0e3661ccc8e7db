//! Daily goals.
//!
//! A goal completes in the transaction whose activity carries the day's
//! counter across its target, so it fires at most once per day.

use serde::{Deserialize, Serialize};

use crate::types::DailyActivity;

/// What a goal counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalMetric {
    LessonsToday,
    XpToday,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goal {
    pub id: &'static str,
    pub title: &'static str,
    pub metric: GoalMetric,
    pub target: u64,
    pub xp_reward: u64,
    pub coin_reward: u64,
}

pub const DAILY_GOALS: &[Goal] = &[
    Goal {
        id: "daily_lessons",
        title: "Meta diária de lições",
        metric: GoalMetric::LessonsToday,
        target: 3,
        xp_reward: 30,
        coin_reward: 5,
    },
    Goal {
        id: "daily_xp",
        title: "Meta diária de XP",
        metric: GoalMetric::XpToday,
        target: 300,
        xp_reward: 50,
        coin_reward: 10,
    },
];

/// A goal crossed by the current transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalCompletion {
    pub goal_id: String,
    pub title: String,
    pub target: u64,
    pub xp_reward: u64,
    pub coin_reward: u64,
}

impl Goal {
    fn value(&self, activity: &DailyActivity) -> u64 {
        match self.metric {
            GoalMetric::LessonsToday => u64::from(activity.lessons_completed),
            GoalMetric::XpToday => activity.xp_earned,
        }
    }

    fn completion(&self) -> GoalCompletion {
        GoalCompletion {
            goal_id: self.id.to_string(),
            title: self.title.to_string(),
            target: self.target,
            xp_reward: self.xp_reward,
            coin_reward: self.coin_reward,
        }
    }
}

/// Goals whose target lies in `(before, after]`, in table order
pub fn completed_goals(before: &DailyActivity, after: &DailyActivity) -> Vec<GoalCompletion> {
    DAILY_GOALS
        .iter()
        .filter(|goal| goal.value(before) < goal.target && goal.value(after) >= goal.target)
        .map(Goal::completion)
        .collect()
}
