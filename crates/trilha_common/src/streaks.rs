//! Streak tracking.
//!
//! Calendar-day streaks advanced by lesson completions, plus the milestone
//! bonuses paid when a streak reaches 3, 7, 14 or 30 days.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{StreakRecord, StreakType, UserId};

/// Milestone table: (days, xp, coins)
pub const STREAK_MILESTONES: &[(u32, u64, u64)] = &[
    (3, 50, 10),
    (7, 150, 30),
    (14, 300, 60),
    (30, 750, 150),
];

/// Bonus paid for reaching a streak milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakBonus {
    pub milestone_days: u32,
    pub xp: u64,
    pub coins: u64,
}

/// Result of advancing a streak for today's activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakAdvance {
    pub record: StreakRecord,
    /// False when today's activity was already counted
    pub changed: bool,
}

pub struct StreakTracker;

impl StreakTracker {
    /// Compute the streak after activity on `today`
    pub fn advance(
        previous: Option<&StreakRecord>,
        user_id: &UserId,
        streak_type: StreakType,
        today: NaiveDate,
    ) -> StreakAdvance {
        let Some(prev) = previous else {
            return StreakAdvance {
                record: StreakRecord {
                    user_id: user_id.clone(),
                    streak_type,
                    current_streak: 1,
                    longest_streak: 1,
                    last_activity_date: today,
                },
                changed: true,
            };
        };

        let gap_days = (today - prev.last_activity_date).num_days();
        match gap_days {
            0 => StreakAdvance {
                record: prev.clone(),
                changed: false,
            },
            1 => {
                let current = prev.current_streak.saturating_add(1);
                StreakAdvance {
                    record: StreakRecord {
                        current_streak: current,
                        longest_streak: prev.longest_streak.max(current),
                        last_activity_date: today,
                        ..prev.clone()
                    },
                    changed: true,
                }
            }
            gap if gap < 0 => {
                // Clock skew: last activity recorded after "today"
                warn!(
                    user = %user_id,
                    last = %prev.last_activity_date,
                    today = %today,
                    "Streak last activity is in the future, leaving unchanged"
                );
                StreakAdvance {
                    record: prev.clone(),
                    changed: false,
                }
            }
            _ => StreakAdvance {
                record: StreakRecord {
                    current_streak: 1,
                    longest_streak: prev.longest_streak.max(1),
                    last_activity_date: today,
                    ..prev.clone()
                },
                changed: true,
            },
        }
    }

    /// Milestone bonus earned by this advance, if the streak just reached one
    ///
    /// Keyed by streak value: hitting day 7 again after a reset pays again.
    pub fn milestone_bonus(advance: &StreakAdvance) -> Option<StreakBonus> {
        if !advance.changed {
            return None;
        }
        STREAK_MILESTONES
            .iter()
            .find(|(days, _, _)| *days == advance.record.current_streak)
            .map(|&(milestone_days, xp, coins)| StreakBonus {
                milestone_days,
                xp,
                coins,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn record(current: u32, longest: u32, last: NaiveDate) -> StreakRecord {
        StreakRecord {
            user_id: UserId::from("u"),
            streak_type: StreakType::DailyLesson,
            current_streak: current,
            longest_streak: longest,
            last_activity_date: last,
        }
    }

    fn advance(prev: Option<&StreakRecord>, today: NaiveDate) -> StreakAdvance {
        StreakTracker::advance(prev, &UserId::from("u"), StreakType::DailyLesson, today)
    }

    #[test]
    fn test_first_activity() {
        let adv = advance(None, day(10));
        assert!(adv.changed);
        assert_eq!(adv.record.current_streak, 1);
        assert_eq!(adv.record.longest_streak, 1);
        assert_eq!(adv.record.last_activity_date, day(10));
    }

    #[test]
    fn test_same_day_no_change() {
        let prev = record(4, 6, day(10));
        let adv = advance(Some(&prev), day(10));
        assert!(!adv.changed);
        assert_eq!(adv.record, prev);
    }

    #[test]
    fn test_consecutive_day_increments() {
        let prev = record(4, 4, day(10));
        let adv = advance(Some(&prev), day(11));
        assert!(adv.changed);
        assert_eq!(adv.record.current_streak, 5);
        assert_eq!(adv.record.longest_streak, 5);
    }

    #[test]
    fn test_consecutive_day_keeps_longer_longest() {
        let prev = record(2, 9, day(10));
        let adv = advance(Some(&prev), day(11));
        assert_eq!(adv.record.current_streak, 3);
        assert_eq!(adv.record.longest_streak, 9);
    }

    #[test]
    fn test_gap_resets_to_one() {
        let prev = record(8, 8, day(10));
        let adv = advance(Some(&prev), day(13));
        assert!(adv.changed);
        assert_eq!(adv.record.current_streak, 1);
        assert_eq!(adv.record.longest_streak, 8);
    }

    #[test]
    fn test_future_last_activity_unchanged() {
        let prev = record(2, 2, day(12));
        let adv = advance(Some(&prev), day(10));
        assert!(!adv.changed);
        assert_eq!(adv.record, prev);
    }

    #[test]
    fn test_month_boundary() {
        let prev = record(1, 1, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let adv = advance(Some(&prev), day(1));
        assert_eq!(adv.record.current_streak, 2);
    }

    #[test]
    fn test_milestone_bonus() {
        let prev = record(2, 2, day(10));
        let adv = advance(Some(&prev), day(11));
        let bonus = StreakTracker::milestone_bonus(&adv).unwrap();
        assert_eq!(bonus, StreakBonus { milestone_days: 3, xp: 50, coins: 10 });

        // Same day repeat does not pay again
        let again = advance(Some(&adv.record), day(11));
        assert!(StreakTracker::milestone_bonus(&again).is_none());
    }

    #[test]
    fn test_milestone_repaid_after_reset() {
        let prev = record(6, 20, day(10));
        let adv = advance(Some(&prev), day(11));
        assert_eq!(StreakTracker::milestone_bonus(&adv).unwrap().milestone_days, 7);
        assert_eq!(adv.record.longest_streak, 20);
    }

    #[test]
    fn test_no_bonus_off_milestone() {
        let prev = record(3, 3, day(10));
        let adv = advance(Some(&prev), day(11));
        assert!(StreakTracker::milestone_bonus(&adv).is_none());
    }
}
