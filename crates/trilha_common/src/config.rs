//! Trilha Configuration
//!
//! Engine configuration for the progression daemon.
//!
//! Configuration lives in /etc/trilha/config.toml (override with
//! `TRILHA_CONFIG`). Every field has a default, so a missing file or a
//! partial file is fine. Out-of-range values are clamped by the
//! `effective_*` accessors rather than rejected.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/trilha";
const CONFIG_FILE: &str = "config.toml";

/// Default progression database path
pub const DEFAULT_DB_PATH: &str = "/var/lib/trilha/progression.db";

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// How long SQLite waits on a locked database before reporting a conflict
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_busy_timeout_ms() -> u64 {
    250
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.min(30_000))
    }
}

/// Read-model cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum cached views (valid: 16-1000000)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Freshness window for dashboard/badge/stats views
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// How long composed notifications stay readable by id
    #[serde(default = "default_notification_ttl")]
    pub notification_ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

fn default_notification_ttl() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
            notification_ttl_secs: default_notification_ttl(),
        }
    }
}

impl CacheSettings {
    pub fn effective_capacity(&self) -> usize {
        self.capacity.clamp(16, 1_000_000)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.clamp(1, 86_400))
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_ttl_secs.clamp(1, 3_600))
    }
}

/// Retry policy for per-user lock conflicts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first (valid: 1-10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    20
}

fn default_max_backoff_ms() -> u64 {
    200
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetrySettings {
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.clamp(1, 10)
    }
}

/// Circuit breaker around the storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSettings {
    /// Consecutive persistence failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds to stay open before letting a trial request through
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Requests admitted at once while half-open
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_half_open_max_requests() -> u32 {
    1
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

impl CircuitSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrilhaConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit: CircuitSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

impl TrilhaConfig {
    /// Default config file location
    pub fn config_path() -> PathBuf {
        std::env::var("TRILHA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    /// Load from `path`, falling back to defaults when the file is absent
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrilhaConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.database.path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_partial_file() {
        let config = TrilhaConfig::parse(
            r#"
            [retry]
            max_attempts = 5

            [cache]
            ttl_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_backoff_ms, 20);
        assert_eq!(config.cache.ttl(), Duration::from_secs(10));
        assert_eq!(config.circuit.failure_threshold, 5);
    }

    #[test]
    fn test_clamping() {
        let config = TrilhaConfig::parse(
            r#"
            [retry]
            max_attempts = 0

            [cache]
            capacity = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.effective_max_attempts(), 1);
        assert_eq!(config.cache.effective_capacity(), 16);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrilhaConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.circuit.cooldown_secs, 30);
        assert_eq!(config.circuit.half_open_max_requests, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\npath = \"/tmp/x.db\"\n").unwrap();
        let config = TrilhaConfig::load_from(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_invalid_toml_errors() {
        assert!(TrilhaConfig::parse("[retry\nmax_attempts = ").is_err());
    }
}
