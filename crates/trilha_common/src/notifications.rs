//! Notification composition.
//!
//! Turns the outcomes of one progression transaction into an ordered,
//! staggered list of presentation events. The order, delays, durations,
//! icons and animation tags are a client contract and must not drift.
//!
//! | # | Kind          | Delay (ms)                     | Duration |
//! |---|---------------|--------------------------------|----------|
//! | 1 | XP gain       | 0                              | 3000     |
//! | 2 | Coin reward   | 1000                           | 3000     |
//! | 3 | Level up      | 2000                           | 4000     |
//! | 4 | Badge unlock  | 3000 + i * 1500                | 4000     |
//! | 5 | Streak bonus  | count_so_far * 1000            | 3500     |
//! | 6 | Goal complete | (count_so_far + i) * 1000      | 3500     |

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::badges::Badge;
use crate::goals::GoalCompletion;
use crate::progression::LevelUp;
use crate::rewards::RewardOutcome;
use crate::streaks::StreakBonus;

/// Notification variant with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    XpGain {
        xp: u64,
    },
    CoinReward {
        coins: u64,
    },
    LevelUp {
        from_level: u8,
        to_level: u8,
        level_name: String,
    },
    BadgeUnlocked {
        badge_id: String,
        badge_name: String,
        xp_reward: u64,
        coin_reward: u64,
    },
    StreakBonus {
        milestone_days: u32,
        xp: u64,
        coins: u64,
    },
    GoalCompleted {
        goal_id: String,
        xp_reward: u64,
        coin_reward: u64,
    },
}

impl NotificationKind {
    pub fn duration_ms(&self) -> u64 {
        match self {
            NotificationKind::XpGain { .. } => 3000,
            NotificationKind::CoinReward { .. } => 3000,
            NotificationKind::LevelUp { .. } => 4000,
            NotificationKind::BadgeUnlocked { .. } => 4000,
            NotificationKind::StreakBonus { .. } => 3500,
            NotificationKind::GoalCompleted { .. } => 3500,
        }
    }

    pub fn animation(&self) -> &'static str {
        match self {
            NotificationKind::XpGain { .. } => "bounce",
            NotificationKind::CoinReward { .. } => "coin-spin",
            NotificationKind::LevelUp { .. } => "level-up",
            NotificationKind::BadgeUnlocked { .. } => "badge-unlock",
            NotificationKind::StreakBonus { .. } => "flame",
            NotificationKind::GoalCompleted { .. } => "confetti",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NotificationKind::XpGain { .. } => "xp_gain",
            NotificationKind::CoinReward { .. } => "coin_reward",
            NotificationKind::LevelUp { .. } => "level_up",
            NotificationKind::BadgeUnlocked { .. } => "badge_unlocked",
            NotificationKind::StreakBonus { .. } => "streak_bonus",
            NotificationKind::GoalCompleted { .. } => "goal_completed",
        }
    }
}

/// One presentation event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub icon: String,
    pub animation: String,
    pub title: String,
    pub message: String,
    pub duration_ms: u64,
    pub delay_ms: u64,
}

impl NotificationEvent {
    fn new(kind: NotificationKind, icon: &str, title: String, message: String, delay_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            icon: icon.to_string(),
            animation: kind.animation().to_string(),
            duration_ms: kind.duration_ms(),
            kind,
            title,
            message,
            delay_ms,
        }
    }
}

/// Everything a committed transaction produced
#[derive(Debug, Clone, Default)]
pub struct CompositionInput<'a> {
    pub reward: RewardOutcome,
    pub level_up: Option<&'a LevelUp>,
    pub new_badges: &'a [&'static Badge],
    pub streak_bonus: Option<StreakBonus>,
    pub completed_goals: &'a [GoalCompletion],
}

pub struct NotificationComposer;

impl NotificationComposer {
    pub fn compose(input: &CompositionInput<'_>) -> Vec<NotificationEvent> {
        let mut out = Vec::new();

        let xp = input.reward.xp_awarded;
        if xp > 0 {
            out.push(NotificationEvent::new(
                NotificationKind::XpGain { xp },
                "✨",
                format!("+{} XP", xp),
                format!("Você ganhou {} pontos de experiência!", xp),
                0,
            ));
        }

        let coins = input.reward.coins_awarded;
        if coins > 0 {
            out.push(NotificationEvent::new(
                NotificationKind::CoinReward { coins },
                "🪙",
                format!("+{} moedas", coins),
                "Moedas adicionadas à sua carteira".to_string(),
                1000,
            ));
        }

        if let Some(up) = input.level_up {
            out.push(NotificationEvent::new(
                NotificationKind::LevelUp {
                    from_level: up.from.level,
                    to_level: up.to.level,
                    level_name: up.to.name.clone(),
                },
                "🎉",
                "Subiu de nível!".to_string(),
                format!("Você alcançou o nível {}: {} {}", up.to.level, up.to.icon, up.to.name),
                2000,
            ));
        }

        for (i, badge) in input.new_badges.iter().enumerate() {
            out.push(NotificationEvent::new(
                NotificationKind::BadgeUnlocked {
                    badge_id: badge.id.to_string(),
                    badge_name: badge.name.to_string(),
                    xp_reward: badge.xp_reward,
                    coin_reward: badge.coin_reward,
                },
                badge.icon,
                "Conquista desbloqueada!".to_string(),
                format!("{}: {}", badge.name, badge.description),
                3000 + i as u64 * 1500,
            ));
        }

        if let Some(bonus) = input.streak_bonus {
            let delay = out.len() as u64 * 1000;
            out.push(NotificationEvent::new(
                NotificationKind::StreakBonus {
                    milestone_days: bonus.milestone_days,
                    xp: bonus.xp,
                    coins: bonus.coins,
                },
                "🔥",
                format!("Sequência de {} dias!", bonus.milestone_days),
                format!("Bônus de +{} XP e +{} moedas", bonus.xp, bonus.coins),
                delay,
            ));
        }

        let so_far = out.len() as u64;
        for (i, goal) in input.completed_goals.iter().enumerate() {
            out.push(NotificationEvent::new(
                NotificationKind::GoalCompleted {
                    goal_id: goal.goal_id.clone(),
                    xp_reward: goal.xp_reward,
                    coin_reward: goal.coin_reward,
                },
                "🎯",
                "Meta concluída!".to_string(),
                goal.title.clone(),
                (so_far + i as u64) * 1000,
            ));
        }

        out
    }
}
