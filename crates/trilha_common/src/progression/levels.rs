//! Level System
//!
//! Static level curve with ten levels and strictly increasing thresholds.
//!
//! ## XP Curve
//!
//! | Level | Threshold | Name                    |
//! |-------|-----------|-------------------------|
//! | 1     | 0         | Iniciante               |
//! | 2     | 100       | Aprendiz                |
//! | 3     | 300       | Estudante Dedicado      |
//! | 4     | 600       | Programador Júnior      |
//! | 5     | 1000      | Programador Pleno       |
//! | 6     | 1500      | Programador Sênior      |
//! | 7     | 2100      | Especialista            |
//! | 8     | 2800      | Arquiteto de Software   |
//! | 9     | 3600      | Mestre do Código        |
//! | 10    | 4500      | Lenda da Programação    |

use serde::{Deserialize, Serialize};

/// One row of the level curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelEntry {
    pub level: u8,
    pub threshold: u64,
    pub name: &'static str,
    pub icon: &'static str,
}

impl LevelEntry {
    const fn new(level: u8, threshold: u64, name: &'static str, icon: &'static str) -> Self {
        Self { level, threshold, name, icon }
    }
}

/// Level curve, ordered by strictly increasing threshold starting at 0
pub const LEVEL_TABLE: &[LevelEntry] = &[
    LevelEntry::new(1, 0, "Iniciante", "🌱"),
    LevelEntry::new(2, 100, "Aprendiz", "📚"),
    LevelEntry::new(3, 300, "Estudante Dedicado", "✏️"),
    LevelEntry::new(4, 600, "Programador Júnior", "💻"),
    LevelEntry::new(5, 1000, "Programador Pleno", "⚡"),
    LevelEntry::new(6, 1500, "Programador Sênior", "🚀"),
    LevelEntry::new(7, 2100, "Especialista", "🎯"),
    LevelEntry::new(8, 2800, "Arquiteto de Software", "🏗️"),
    LevelEntry::new(9, 3600, "Mestre do Código", "🧙"),
    LevelEntry::new(10, 4500, "Lenda da Programação", "👑"),
];

/// Derived level view, recomputed on every read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level: u8,
    pub name: String,
    pub icon: String,
    /// Threshold of the current level
    pub threshold: u64,
    /// Threshold of the next level, `None` at the terminal level
    pub next_threshold: Option<u64>,
    pub xp_to_next: u64,
    /// Progress through the current level (0-100)
    pub progress_percent: u8,
}

impl LevelInfo {
    pub fn is_terminal(&self) -> bool {
        self.next_threshold.is_none()
    }
}

/// A level transition caused by one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUp {
    pub from: LevelInfo,
    pub to: LevelInfo,
}

/// Maps cumulative XP onto the level curve
pub struct ProgressionResolver;

impl ProgressionResolver {
    /// Resolve the level for `total_xp`
    ///
    /// Total over every `u64`: the first threshold is 0, so some entry always
    /// matches.
    pub fn resolve(total_xp: u64) -> LevelInfo {
        let idx = LEVEL_TABLE
            .iter()
            .rposition(|entry| entry.threshold <= total_xp)
            .unwrap_or(0);
        let current = &LEVEL_TABLE[idx];

        match LEVEL_TABLE.get(idx + 1) {
            Some(next) => {
                let span = next.threshold.saturating_sub(current.threshold);
                let into = total_xp.saturating_sub(current.threshold);
                let percent = if span == 0 {
                    100.0
                } else {
                    (100.0 * into as f64 / span as f64).round()
                };
                LevelInfo {
                    level: current.level,
                    name: current.name.to_string(),
                    icon: current.icon.to_string(),
                    threshold: current.threshold,
                    next_threshold: Some(next.threshold),
                    xp_to_next: next.threshold.saturating_sub(total_xp),
                    progress_percent: percent.clamp(0.0, 100.0) as u8,
                }
            }
            None => LevelInfo {
                level: current.level,
                name: current.name.to_string(),
                icon: current.icon.to_string(),
                threshold: current.threshold,
                next_threshold: None,
                xp_to_next: 0,
                progress_percent: 100,
            },
        }
    }

    /// Level transition between two XP totals, if any
    pub fn level_up(before_xp: u64, after_xp: u64) -> Option<LevelUp> {
        let from = Self::resolve(before_xp);
        let to = Self::resolve(after_xp);
        (to.level > from.level).then_some(LevelUp { from, to })
    }

    /// The highest level on the curve
    pub fn max_level() -> u8 {
        LEVEL_TABLE.last().map(|e| e.level).unwrap_or(1)
    }
}
