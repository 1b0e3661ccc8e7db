//! Storage supervision
//!
//! Retry pacing for per-user lock conflicts and a circuit breaker that stops
//! hammering storage while it is failing.

pub mod backoff;
pub mod circuit;

pub use backoff::{BackoffConfig, BackoffState};
pub use circuit::{CircuitBreaker, CircuitState};
