//! Keyed fetch cache with per-kind staleness windows.
//!
//! Entries remember either a value or the error of the last fetch, so a
//! permanently failing source is not hammered on every pass. Stale entries are
//! still returned; the caller decides whether to schedule a refetch.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub outcome: Result<V, String>,
    pub fetched_at: SystemTime,
}

impl<V> CacheEntry<V> {
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.fetched_at).unwrap_or(Duration::ZERO)
    }

    pub fn is_stale_at(&self, max_age: Duration, now: SystemTime) -> bool {
        self.age_at(now) > max_age
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lookup<'a, V> {
    pub value: Option<&'a V>,
    pub error: Option<&'a str>,
    pub found: bool,
    pub stale: bool,
}

impl<V> Lookup<'_, V> {
    fn missing() -> Self {
        Self {
            value: None,
            error: None,
            found: false,
            stale: false,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        !self.found || self.stale
    }
}

#[derive(Debug, Clone)]
pub struct Cache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    window: Duration,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn get(&self, key: &K, max_age: Duration) -> Lookup<'_, V> {
        self.get_at(key, max_age, SystemTime::now())
    }

    /// Lookup against this cache's own staleness window.
    pub fn lookup(&self, key: &K) -> Lookup<'_, V> {
        self.get_at(key, self.window, SystemTime::now())
    }

    pub fn get_at(&self, key: &K, max_age: Duration, now: SystemTime) -> Lookup<'_, V> {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::missing();
        };

        let (value, error) = match &entry.outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error.as_str())),
        };

        Lookup {
            value,
            error,
            found: true,
            stale: entry.is_stale_at(max_age, now),
        }
    }

    /// The cached value regardless of age.
    pub fn value(&self, key: &K) -> Option<&V> {
        self.entries
            .get(key)
            .and_then(|entry| entry.outcome.as_ref().ok())
    }

    pub fn set(&mut self, key: K, outcome: Result<V, String>) {
        self.set_at(key, outcome, SystemTime::now());
    }

    pub fn set_at(&mut self, key: K, outcome: Result<V, String>, fetched_at: SystemTime) {
        self.entries.insert(
            key,
            CacheEntry {
                outcome,
                fetched_at,
            },
        );
    }

    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    /// Keys from `candidates` that are missing or stale at `now`, deduplicated
    /// in first-seen order.
    pub fn keys_needing_refresh<'k, I>(&self, candidates: I, now: SystemTime) -> Vec<K>
    where
        I: IntoIterator<Item = &'k K>,
        K: 'k,
    {
        let mut out: Vec<K> = Vec::new();
        for key in candidates {
            if out.contains(key) {
                continue;
            }
            if self.get_at(key, self.window, now).needs_refresh() {
                out.push(key.clone());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let cache: Cache<String, u32> = Cache::new(Duration::from_secs(5));
        let lookup = cache.get_at(&"x".to_string(), Duration::from_secs(5), at(0));
        assert!(!lookup.found);
        assert!(!lookup.stale);
        assert!(lookup.needs_refresh());
    }

    #[test]
    fn test_entry_goes_stale_after_window() {
        let mut cache = Cache::new(Duration::from_secs(10));
        cache.set_at("dir", Ok(7), at(100));

        let fresh = cache.get_at(&"dir", Duration::from_secs(10), at(109));
        assert!(fresh.found);
        assert!(!fresh.stale);
        assert_eq!(fresh.value, Some(&7));

        let boundary = cache.get_at(&"dir", Duration::from_secs(10), at(110));
        assert!(!boundary.stale, "an entry exactly at its window is still fresh");

        let stale = cache.get_at(&"dir", Duration::from_secs(10), at(111));
        assert!(stale.stale);
        assert_eq!(stale.value, Some(&7), "stale values are still served");

        assert!(cache.get_at(&"dir", Duration::from_secs(10), at(500)).stale);
    }

    #[test]
    fn test_epoch_entry_is_stale() {
        let mut cache = Cache::new(Duration::from_secs(30));
        cache.set_at("remote", Ok(()), SystemTime::UNIX_EPOCH);
        assert!(cache.lookup(&"remote").stale);
    }

    #[test]
    fn test_error_is_remembered_without_value() {
        let mut cache: Cache<&str, u32> = Cache::new(Duration::from_secs(30));
        cache.set_at("proj", Err("no provider".to_string()), at(0));

        let lookup = cache.get_at(&"proj", Duration::from_secs(30), at(1));
        assert!(lookup.found);
        assert_eq!(lookup.value, None);
        assert_eq!(lookup.error, Some("no provider"));
        assert!(!lookup.needs_refresh());
    }

    #[test]
    fn test_set_overwrites_error_with_value() {
        let mut cache: Cache<&str, u32> = Cache::new(Duration::from_secs(30));
        cache.set_at("proj", Err("boom".to_string()), at(0));
        cache.set_at("proj", Ok(3), at(1));
        let lookup = cache.get_at(&"proj", Duration::from_secs(30), at(2));
        assert_eq!(lookup.value, Some(&3));
        assert_eq!(lookup.error, None);
    }

    #[test]
    fn test_invalidate_forgets_entry() {
        let mut cache = Cache::new(Duration::from_secs(30));
        cache.set_at("a", Ok(1), at(0));
        cache.set_at("b", Ok(2), at(0));
        cache.invalidate(&"a");
        assert!(!cache.get_at(&"a", Duration::from_secs(30), at(1)).found);
        assert_eq!(cache.len(), 1);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_needing_refresh_dedupes_and_skips_fresh() {
        let mut cache = Cache::new(Duration::from_secs(10));
        cache.set_at("fresh", Ok(()), at(95));
        cache.set_at("old", Ok(()), at(0));
        let keys = ["fresh", "old", "new", "old", "new"];
        let refresh = cache.keys_needing_refresh(keys.iter(), at(100));
        assert_eq!(refresh, vec!["old", "new"]);
    }
}
