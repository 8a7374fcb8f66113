//! In-memory flag cache with a fixed freshness window.
//!
//! Uses DashMap for concurrent access with per-key sharding, so the change-feed
//! task and request handlers can touch the cache at the same time.
//! Staleness is checked lazily on lookup; there is no sweeper.

use crate::record::FlagRecord;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Default freshness window: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cached answer for one flag name.
///
/// `record == None` is a definitive "not in the store" answer, cached the same
/// way as a record so repeated lookups of unknown flags stay off the store.
struct CachedFlag {
    record: Option<FlagRecord>,
    stored_at: Instant,
}

impl CachedFlag {
    fn new(record: Option<FlagRecord>) -> Self {
        CachedFlag {
            record,
            stored_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Thread-safe TTL cache of flag records keyed by flag name.
///
/// # Example
///
/// ```
/// use flag_kit::cache::FlagCache;
/// use flag_kit::FlagRecord;
/// use std::time::Duration;
///
/// let cache = FlagCache::new(Duration::from_secs(300));
/// cache.put("dark_mode", FlagRecord::new("dark_mode", true, 50));
///
/// assert!(cache.is_fresh("dark_mode"));
/// assert_eq!(cache.get("dark_mode").map(|r| r.rollout_percentage), Some(50));
///
/// cache.invalidate("dark_mode");
/// assert!(cache.get("dark_mode").is_none());
/// ```
pub struct FlagCache {
    entries: DashMap<String, CachedFlag>,
    ttl: Duration,
}

impl FlagCache {
    pub fn new(ttl: Duration) -> Self {
        FlagCache {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh lookup.
    ///
    /// - `None` - nothing usable cached, caller must go to the store
    /// - `Some(None)` - the store said the flag does not exist
    /// - `Some(Some(record))` - cached record
    ///
    /// Stale entries are dropped on the way out.
    pub fn lookup(&self, name: &str) -> Option<Option<FlagRecord>> {
        if let Some(entry) = self.entries.get(name) {
            if entry.is_fresh(self.ttl) {
                debug!("✓ FlagCache GET {} -> HIT", name);
                return Some(entry.record.clone());
            }
        }

        // Guard dropped above; remove_if re-checks so a concurrent fresh put survives.
        self.entries.remove_if(name, |_, entry| !entry.is_fresh(self.ttl));
        debug!("✓ FlagCache GET {} -> MISS", name);
        None
    }

    /// Fresh record for `name`, if one is cached.
    pub fn get(&self, name: &str) -> Option<FlagRecord> {
        self.lookup(name).flatten()
    }

    /// Store a record, restarting its freshness window.
    pub fn put(&self, name: &str, record: FlagRecord) {
        self.entries
            .insert(name.to_string(), CachedFlag::new(Some(record)));
        debug!("✓ FlagCache PUT {} (TTL: {:?})", name, self.ttl);
    }

    /// Remember that the store has no record for `name`.
    pub fn put_absent(&self, name: &str) {
        self.entries.insert(name.to_string(), CachedFlag::new(None));
        debug!("✓ FlagCache PUT {} -> ABSENT", name);
    }

    /// Drop the entry so the next read goes to the store.
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
        debug!("✓ FlagCache INVALIDATE {}", name);
    }

    /// False when nothing is stored for `name` or `now - stored_at >= ttl`.
    pub fn is_fresh(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entry| entry.is_fresh(self.ttl))
    }

    /// Every cached record, fresh or not. Cached absences are skipped.
    pub fn snapshot(&self) -> HashMap<String, FlagRecord> {
        self.entries
            .iter()
            .filter_map(|entry| {
                entry
                    .record
                    .as_ref()
                    .map(|record| (entry.key().clone(), record.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        debug!("✓ FlagCache CLEAR");
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in self.entries.iter() {
            stats.total_entries += 1;
            if !entry.is_fresh(self.ttl) {
                stats.stale_entries += 1;
            }
            if entry.record.is_none() {
                stats.absent_entries += 1;
            }
        }
        stats
    }
}

impl Default for FlagCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub stale_entries: usize,
    /// Entries recording that the store has no such flag.
    pub absent_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, enabled: bool) -> FlagRecord {
        FlagRecord::new(name, enabled, 100)
    }

    #[test]
    fn test_put_get() {
        let cache = FlagCache::default();
        cache.put("a", record("a", true));

        let cached = cache.get("a").expect("Record should be cached");
        assert!(cached.enabled);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss() {
        let cache = FlagCache::default();
        assert!(cache.lookup("missing").is_none());
        assert!(!cache.is_fresh("missing"));
    }

    #[test]
    fn test_absent_entry_is_a_hit() {
        let cache = FlagCache::default();
        cache.put_absent("ghost");

        assert_eq!(cache.lookup("ghost"), Some(None));
        assert!(cache.get("ghost").is_none());
        assert!(cache.is_fresh("ghost"));
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache = FlagCache::default();
        cache.put("a", record("a", true));
        cache.invalidate("a");

        assert!(cache.lookup("a").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = FlagCache::new(Duration::from_secs(60));
        cache.put("a", record("a", true));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.is_fresh("a"));

        // Exactly at the TTL boundary the entry is already stale.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.is_fresh("a"));
        assert_eq!(cache.stats().stale_entries, 1);

        assert!(cache.lookup("a").is_none());
        assert!(cache.is_empty(), "Stale entry should be dropped on lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_restarts_window() {
        let cache = FlagCache::new(Duration::from_secs(60));
        cache.put("a", record("a", true));

        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put("a", record("a", false));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get("a").map(|r| r.enabled), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_includes_stale_records() {
        let cache = FlagCache::new(Duration::from_secs(10));
        cache.put("a", record("a", true));
        cache.put("b", record("b", false));
        cache.put_absent("c");

        tokio::time::advance(Duration::from_secs(30)).await;

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("a"));
        assert!(snapshot.contains_key("b"));
    }

    #[test]
    fn test_stats() {
        let cache = FlagCache::default();
        cache.put("a", record("a", true));
        cache.put_absent("b");

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.stale_entries, 0);
        assert_eq!(stats.absent_entries, 1);
    }

    #[test]
    fn test_clear() {
        let cache = FlagCache::default();
        cache.put("a", record("a", true));
        cache.put("b", record("b", true));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_puts() {
        use std::sync::Arc;

        let cache = Arc::new(FlagCache::default());
        let mut handles = vec![];

        for i in 0..10 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let name = format!("flag_{}", i);
                cache.put(&name, record(&name, i % 2 == 0));
            }));
        }

        for handle in handles {
            handle.await.expect("Task failed");
        }

        assert_eq!(cache.len(), 10);
    }
}
