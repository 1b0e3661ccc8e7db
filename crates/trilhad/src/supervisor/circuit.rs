//! Circuit breaker guarding the storage collaborator
//!
//! Closed -> Open after `failure_threshold` consecutive persistence failures.
//! Open -> HalfOpen once `cooldown` has elapsed and a request asks to pass.
//! HalfOpen -> Closed after `success_threshold` successes, or back to Open
//! on the first failure. While half-open at most `half_open_max` requests
//! are admitted at once; each holds its slot until its outcome is recorded
//! or released.

use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without touching storage
    Open,
    /// Admitting a bounded number of trial requests
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    /// Consecutive failures while closed
    failure_count: u32,
    /// Successes while half-open
    success_count: u32,
    failure_threshold: u32,
    success_threshold: u32,
    /// Trial requests admitted while half-open and not yet settled
    in_flight: u32,
    half_open_max: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            failure_threshold: failure_threshold.max(1),
            success_threshold: 1,
            in_flight: 0,
            half_open_max: 1,
            opened_at: None,
            cooldown,
        }
    }

    pub fn with_success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = successes.max(1);
        self
    }

    pub fn with_half_open_max(mut self, requests: u32) -> Self {
        self.half_open_max = requests.max(1);
        self
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a request may reach storage; may move Open -> HalfOpen.
    /// A request admitted while half-open must be settled with
    /// `record_success`, `record_failure` or `release`.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.admit_trial(),
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return false;
                }
                self.transition(CircuitState::HalfOpen);
                self.admit_trial()
            }
        }
    }

    fn admit_trial(&mut self) -> bool {
        if self.in_flight >= self.half_open_max {
            return false;
        }
        self.in_flight += 1;
        true
    }

    /// Settle an admitted request that neither proved nor disproved storage
    /// health, e.g. one that lost a lock race
    pub fn release(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.success_count += 1;
                if self.success_count >= self.success_threshold {
                    self.transition(CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&mut self, to: CircuitState) {
        match to {
            CircuitState::Open => {
                warn!(
                    failures = self.failure_count,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Storage circuit opened"
                );
                self.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                info!(max_requests = self.half_open_max, "Storage circuit half-open")
            }
            CircuitState::Closed => {
                info!("Storage circuit closed");
                self.opened_at = None;
            }
        }
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        self.in_flight = 0;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10)).with_success_threshold(2);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        cb.allow_request();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        assert_eq!(cb.failure_count, 1);
        cb.record_success();
        assert_eq!(cb.failure_count, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_bounded_requests() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.allow_request());
        assert!(!cb.allow_request());

        // Released slot is reusable, outcome still pending
        cb.release();
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
        assert!(cb.allow_request());
    }

    #[test]
    fn test_half_open_max_requests() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10))
            .with_half_open_max(2)
            .with_success_threshold(2);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.allow_request());
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
