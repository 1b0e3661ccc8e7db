//! Read-model cache.
//!
//! Write-then-invalidate: the engine never writes fresh progression into the
//! cache, it only purges a user's entries after commit so the next read
//! recomputes from storage. The one exception is composed notifications,
//! which only ever live here, keyed by id, for a short TTL.
//!
//! A reader that loaded a view before a commit must not put it back after
//! the commit's purge. `InvalidationGuard` keeps a per-user generation that
//! every purge bumps; fills only land if the generation is unchanged.

use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;
use trilha_common::UserId;

/// Cache keys used by the read model
pub mod keys {
    use trilha_common::UserId;

    pub fn dashboard(user_id: &UserId) -> String {
        format!("dashboard:{}", user_id)
    }

    pub fn badges(user_id: &UserId) -> String {
        format!("badges:{}", user_id)
    }

    pub fn stats(user_id: &UserId) -> String {
        format!("stats:{}", user_id)
    }

    pub fn timeframe_stats(user_id: &UserId, timeframe: &str) -> String {
        format!("stats:{}:{}", user_id, timeframe)
    }

    pub fn notification(id: &str) -> String {
        format!("notification:{}", id)
    }

    /// Patterns covering every progression view of a user
    pub fn user_patterns(user_id: &UserId) -> Vec<String> {
        vec![
            dashboard(user_id),
            badges(user_id),
            stats(user_id),
            format!("stats:{}:*", user_id),
        ]
    }
}

pub trait ReadCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value, ttl: Duration);

    /// Remove every key matching `pattern`, where `*` matches any run of
    /// characters. Returns how many entries were removed.
    fn invalidate_pattern(&self, pattern: &str) -> usize;
}

/// Purge all cached views of a user
pub fn invalidate_user(cache: &dyn ReadCache, user_id: &UserId) -> usize {
    let removed: usize = keys::user_patterns(user_id)
        .iter()
        .map(|pattern| cache.invalidate_pattern(pattern))
        .sum();
    debug!(user = %user_id, removed, "Invalidated read model");
    removed
}

const GENERATION_STRIPES: usize = 64;

/// Per-user invalidation generations, striped by user id hash.
///
/// Purge and fill both run under the stripe lock, so a fill that captured
/// generation N can never land after the purge that moved it to N+1.
pub struct InvalidationGuard {
    stripes: Vec<Mutex<u64>>,
}

impl InvalidationGuard {
    pub fn new() -> Self {
        Self {
            stripes: (0..GENERATION_STRIPES).map(|_| Mutex::new(0)).collect(),
        }
    }

    /// The counter is a plain integer, so a poisoned stripe is still usable
    fn stripe(&self, user_id: &UserId) -> MutexGuard<'_, u64> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current generation for `user_id`; capture before loading a view
    pub fn generation(&self, user_id: &UserId) -> u64 {
        *self.stripe(user_id)
    }

    /// Bump the user's generation and purge their views
    pub fn invalidate(&self, cache: &dyn ReadCache, user_id: &UserId) -> usize {
        let mut generation = self.stripe(user_id);
        *generation = generation.wrapping_add(1);
        invalidate_user(cache, user_id)
    }

    /// Store `value` only if no purge happened since `seen` was captured
    pub fn set_if_current(
        &self,
        cache: &dyn ReadCache,
        user_id: &UserId,
        seen: u64,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> bool {
        let generation = self.stripe(user_id);
        if *generation != seen {
            debug!(user = %user_id, key, "Skipping fill from superseded read");
            return false;
        }
        cache.set(key, value, ttl);
        true
    }
}

impl Default for InvalidationGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// LRU cache with per-entry TTL
pub struct LruReadCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl LruReadCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries
    pub fn prune_expired(&self) -> usize {
        let Ok(mut cache) = self.entries.lock() else {
            return 0;
        };
        let now = Instant::now();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }
}

impl Default for LruReadCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ReadCache for LruReadCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut cache = self.entries.lock().ok()?;
        let now = Instant::now();
        let lookup = cache
            .get(key)
            .map(|entry| entry.is_fresh(now).then(|| entry.value.clone()));
        match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        if let Ok(mut cache) = self.entries.lock() {
            cache.put(
                key.to_string(),
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                    ttl,
                },
            );
        }
    }

    fn invalidate_pattern(&self, pattern: &str) -> usize {
        let Ok(mut cache) = self.entries.lock() else {
            return 0;
        };

        if !pattern.contains('*') {
            return usize::from(cache.pop(pattern).is_some());
        }

        let matcher = match pattern_regex(pattern) {
            Some(re) => re,
            None => return 0,
        };
        let doomed: Vec<String> = cache
            .iter()
            .filter(|(key, _)| matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            cache.pop(key);
        }
        doomed.len()
    }
}

fn pattern_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_get_set() {
        let cache = LruReadCache::new(8);
        cache.set("dashboard:u1", json!({"xp": 10}), TTL);
        assert_eq!(cache.get("dashboard:u1"), Some(json!({"xp": 10})));
        assert_eq!(cache.get("dashboard:u2"), None);
    }

    #[test]
    fn test_expiry() {
        let cache = LruReadCache::new(8);
        cache.set("k", json!(1), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_wildcard_invalidation() {
        let cache = LruReadCache::new(16);
        cache.set("stats:u1", json!(1), TTL);
        cache.set("stats:u1:week", json!(2), TTL);
        cache.set("stats:u1:month", json!(3), TTL);
        cache.set("stats:u10:week", json!(4), TTL);

        assert_eq!(cache.invalidate_pattern("stats:u1:*"), 2);
        assert!(cache.get("stats:u1").is_some());
        assert!(cache.get("stats:u10:week").is_some());
    }

    #[test]
    fn test_invalidate_user() {
        let cache = LruReadCache::new(16);
        let user = UserId::from("u1");
        cache.set(&keys::dashboard(&user), json!(1), TTL);
        cache.set(&keys::badges(&user), json!(2), TTL);
        cache.set(&keys::timeframe_stats(&user, "week"), json!(3), TTL);
        cache.set(&keys::dashboard(&UserId::from("u2")), json!(4), TTL);

        assert_eq!(invalidate_user(&cache, &user), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fill_after_purge_is_dropped() {
        let cache = LruReadCache::new(16);
        let guard = InvalidationGuard::new();
        let user = UserId::from("u1");

        let seen = guard.generation(&user);
        cache.set(&keys::dashboard(&user), json!({"xp": 0}), TTL);
        assert_eq!(guard.invalidate(&cache, &user), 1);

        let key = keys::dashboard(&user);
        assert!(!guard.set_if_current(&cache, &user, seen, &key, json!({"xp": 0}), TTL));
        assert_eq!(cache.get(&key), None);

        let fresh = guard.generation(&user);
        assert!(guard.set_if_current(&cache, &user, fresh, &key, json!({"xp": 155}), TTL));
        assert_eq!(cache.get(&key), Some(json!({"xp": 155})));
    }

    #[test]
    fn test_pattern_escapes_regex_chars() {
        let cache = LruReadCache::new(8);
        cache.set("stats:a.b:week", json!(1), TTL);
        cache.set("stats:axb:week", json!(2), TTL);
        assert_eq!(cache.invalidate_pattern("stats:a.b:*"), 1);
        assert!(cache.get("stats:axb:week").is_some());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = LruReadCache::new(2);
        cache.set("a", json!(1), TTL);
        cache.set("b", json!(2), TTL);
        cache.set("c", json!(3), TTL);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_prune_expired() {
        let cache = LruReadCache::new(8);
        cache.set("short", json!(1), Duration::from_millis(10));
        cache.set("long", json!(2), TTL);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.prune_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
