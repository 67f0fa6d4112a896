use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::TARGET_WEB_REQUEST;

/// A keyed, expiring cache for expensive read queries.
///
/// Best-effort by construction: the API is infallible, entries are
/// immutable once written, and a lost or evicted entry only costs a
/// recomputation against the authoritative store. Never persisted.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
}

struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl ResponseCache {
    /// Creates a cache bounded to `capacity` entries.
    ///
    /// Capacity eviction is a memory safeguard, not a correctness
    /// requirement; entries past their TTL already read as misses.
    pub fn new(capacity: usize) -> Self {
        ResponseCache {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Looks up a key, treating expired entries as misses.
    ///
    /// An expired entry found here is evicted opportunistically.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.expires_at > Utc::now() {
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }

        None
    }

    /// Stores a value under a key for `ttl_seconds`.
    ///
    /// Overwrites any previous entry for the key. At capacity, the entry
    /// closest to expiry is dropped to make room.
    pub fn set(&self, key: &str, value: Value, ttl_seconds: i64) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Utc::now() + Duration::seconds(ttl_seconds),
            },
        );
    }

    /// Drops every entry whose key starts with `prefix`.
    ///
    /// The pipeline calls this after publishing so feed responses reflect
    /// new content ahead of natural TTL expiry.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        debug!(
            target: TARGET_WEB_REQUEST,
            "Invalidated {} cache entries with prefix '{}'",
            before - self.entries.len(),
            prefix
        );
    }

    /// Number of live entries (expired-but-unevicted included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Builds a deterministic cache key from query parameters.
///
/// Parameters are sorted by name so semantically identical queries always
/// collide on the same key regardless of argument order.
pub fn build_key(prefix: &str, params: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by_key(|(name, _)| *name);

    let joined = sorted
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", prefix, joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let cache = ResponseCache::new(16);

        cache.set("k", json!({"items": [1, 2, 3]}), 300);
        assert_eq!(cache.get("k"), Some(json!({"items": [1, 2, 3]})));
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_evicted() {
        let cache = ResponseCache::new(16);

        cache.set("k", json!("v"), -1);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let cache = ResponseCache::new(16);

        cache.set("k", json!("old"), 300);
        cache.set("k", json!("new"), 300);
        assert_eq!(cache.get("k"), Some(json!("new")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_construction_is_order_independent() {
        let a = build_key(
            "feed",
            &[("lang", "en".to_string()), ("category", "sports".to_string())],
        );
        let b = build_key(
            "feed",
            &[("category", "sports".to_string()), ("lang", "en".to_string())],
        );

        assert_eq!(a, b);
    }

    #[test]
    fn test_key_differs_when_params_differ() {
        let a = build_key("feed", &[("lang", "en".to_string())]);
        let b = build_key("feed", &[("lang", "de".to_string())]);

        assert_ne!(a, b);
    }

    #[test]
    fn test_capacity_evicts_oldest_expiry_first() {
        let cache = ResponseCache::new(2);

        cache.set("short", json!(1), 10);
        cache.set("long", json!(2), 1000);
        cache.set("extra", json!(3), 500);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long"), Some(json!(2)));
        assert_eq!(cache.get("extra"), Some(json!(3)));
    }

    #[test]
    fn test_invalidate_prefix_only_touches_matches() {
        let cache = ResponseCache::new(16);

        cache.set("feed?lang=en", json!(1), 300);
        cache.set("feed?lang=de", json!(2), 300);
        cache.set("facets?", json!(3), 300);

        cache.invalidate_prefix("feed");

        assert_eq!(cache.get("feed?lang=en"), None);
        assert_eq!(cache.get("feed?lang=de"), None);
        assert_eq!(cache.get("facets?"), Some(json!(3)));
    }
}
