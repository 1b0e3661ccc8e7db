//! Exponential backoff between conflict retries.

use rand::Rng;
use std::time::Duration;
use trilha_common::config::RetrySettings;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    /// Add up to 25% random jitter so colliding requests spread out
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(20),
            max: Duration::from_millis(200),
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for BackoffConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            base: Duration::from_millis(settings.base_backoff_ms),
            max: Duration::from_millis(settings.max_backoff_ms.max(settings.base_backoff_ms)),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    attempts: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Delay before the next attempt: base * 2^n, capped at max
    pub fn next_backoff(&mut self) -> Duration {
        let factor = 1u32 << self.attempts.min(16);
        let delay = self.config.base.saturating_mul(factor).min(self.config.max);
        self.attempts += 1;

        if self.config.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_growth_capped() {
        let mut state = BackoffState::new(no_jitter());
        let delays: Vec<u128> = (0..5).map(|_| state.next_backoff().as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 50, 50]);
        assert_eq!(state.attempts(), 5);
    }

    #[test]
    fn test_reset() {
        let mut state = BackoffState::new(no_jitter());
        state.next_backoff();
        state.next_backoff();
        state.reset();
        assert_eq!(state.next_backoff(), Duration::from_millis(10));
    }

    #[test]
    fn test_jitter_bounded() {
        let mut state = BackoffState::new(BackoffConfig {
            jitter: true,
            ..no_jitter()
        });
        let delay = state.next_backoff();
        assert!(delay >= Duration::from_millis(10));
        assert!(delay <= Duration::from_millis(12));
    }
}
