//! Single-tier cache store with TTL expiry and value-weighted eviction

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    eviction,
    invalidation::{InvalidationEvent, InvalidationReason, InvalidationRegistry},
    size::{json_estimator, SharedEstimator},
    types::{CacheKey, CacheMetrics, Counters},
};
use crate::task::BackgroundTask;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// How a pool picks its victim when the entry limit is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvictionPolicy {
    /// Lowest `priority * (hits + 1) / age`
    Weighted,
    /// Oldest write first
    Oldest,
}

/// An entry pushed out by `TierPool::insert`
#[derive(Debug)]
pub(crate) struct Evicted<V> {
    pub key: CacheKey,
    pub entry: CacheEntry<V>,
    pub reason: InvalidationReason,
}

/// Outcome of a pool lookup
pub(crate) enum Lookup<'a, V> {
    Hit(&'a mut CacheEntry<V>),
    Expired,
    Absent,
}

/// One pool of entries with its own limits
///
/// Pure bookkeeping: callers provide the locking.
#[derive(Debug)]
pub(crate) struct TierPool<V> {
    config: CacheConfig,
    entries: HashMap<CacheKey, CacheEntry<V>>,
    memory_bytes: usize,
    evictions: u64,
    next_sequence: u64,
}

impl<V> TierPool<V> {
    pub(crate) fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            memory_bytes: 0,
            evictions: 0,
            next_sequence: 0,
        }
    }

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    pub(crate) fn has_spare_capacity(&self) -> bool {
        self.entries.len() < self.config.max_entries
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&CacheKey, &CacheEntry<V>)> {
        self.entries.iter()
    }

    /// Look up a live entry, dropping it if it has outlived `ttl`
    ///
    /// `ttl` defaults to the TTL the entry was written with.
    pub(crate) fn lookup(&mut self, key: &str, ttl: Option<Duration>) -> Lookup<'_, V> {
        let expired = match self.entries.get(key) {
            None => return Lookup::Absent,
            Some(entry) => entry.is_older_than(ttl.unwrap_or(entry.ttl)),
        };

        if expired {
            self.remove(key);
            return Lookup::Expired;
        }

        match self.entries.get_mut(key) {
            Some(entry) => Lookup::Hit(entry),
            None => Lookup::Absent,
        }
    }

    /// Insert or overwrite, evicting first so the limits hold afterwards
    ///
    /// An entry larger than the memory target is not stored, and any previous
    /// value under `key` is dropped.
    pub(crate) fn insert(
        &mut self,
        key: CacheKey,
        mut entry: CacheEntry<V>,
        policy: EvictionPolicy,
    ) -> Vec<Evicted<V>> {
        self.remove(&key);

        let mut evicted = Vec::new();

        let target = self.config.memory_target_bytes();
        if entry.size_estimate > target {
            warn!(
                "Not caching {}: {} bytes exceeds the memory target of {} bytes",
                key, entry.size_estimate, target
            );
            return evicted;
        }

        if self.memory_bytes + entry.size_estimate > self.config.max_memory_bytes {
            self.evict_by_memory(entry.size_estimate, &mut evicted);
        }

        while self.entries.len() >= self.config.max_entries {
            let victim = match policy {
                EvictionPolicy::Weighted => eviction::least_valuable(&self.entries),
                EvictionPolicy::Oldest => eviction::oldest(&self.entries),
            };
            let Some(victim) = victim else { break };
            if let Some(removed) = self.remove(&victim) {
                debug!("Evicting entry due to max_entries limit: {}", victim);
                self.evictions += 1;
                evicted.push(Evicted {
                    key: victim,
                    entry: removed,
                    reason: InvalidationReason::Capacity,
                });
            }
        }

        entry.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.memory_bytes += entry.size_estimate;
        self.entries.insert(key, entry);

        evicted
    }

    /// Evict worst size-to-value entries until usage, counting the incoming
    /// entry, is at or below the memory target
    fn evict_by_memory(&mut self, incoming: usize, evicted: &mut Vec<Evicted<V>>) {
        let target = self.config.memory_target_bytes();

        while self.memory_bytes + incoming > target {
            let Some(victim) = eviction::worst_size_ratio(&self.entries) else {
                break;
            };
            if let Some(removed) = self.remove(&victim) {
                debug!(
                    "Evicting entry due to memory budget: {} ({} bytes)",
                    victim, removed.size_estimate
                );
                self.evictions += 1;
                evicted.push(Evicted {
                    key: victim,
                    entry: removed,
                    reason: InvalidationReason::Memory,
                });
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_estimate);
        Some(entry)
    }

    /// Remove every entry whose key satisfies `predicate`
    pub(crate) fn remove_matching(&mut self, predicate: impl Fn(&str) -> bool) -> Vec<CacheKey> {
        let keys: Vec<CacheKey> = self
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();

        for key in &keys {
            self.remove(key);
        }

        keys
    }

    /// Drop entries older than the configured sweep age, regardless of use
    pub(crate) fn sweep(&mut self) -> Vec<CacheKey> {
        let max_age = self.config.sweep_age();
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.age() > max_age)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.remove(key);
        }

        keys
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.memory_bytes = 0;
        self.evictions = 0;
    }
}

struct StoreState<T> {
    pool: TierPool<T>,
    counters: Counters,
}

impl<T> StoreState<T> {
    fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits,
            misses: self.counters.misses,
            hit_rate: CacheMetrics::ratio(self.counters.hits, self.counters.misses),
            entries: self.pool.len(),
            l1_entries: self.pool.len(),
            l2_entries: 0,
            memory_usage_bytes: self.pool.memory_bytes(),
            evictions: self.pool.evictions(),
            l2_hits: 0,
            promotions: 0,
            demotions: 0,
            compressed_entries: self.pool.entries().filter(|(_, e)| e.compressed).count(),
        }
    }

    fn sweep(&mut self) -> Vec<CacheKey> {
        let removed = self.pool.sweep();
        if !removed.is_empty() {
            debug!("Swept {} stale entries", removed.len());
        }
        removed
    }
}

/// Single-tier TTL cache
///
/// This implementation provides:
/// - TTL expiry checked on read
/// - Priority- and frequency-weighted eviction at the entry limit
/// - Memory-budget eviction by size-to-value ratio
/// - Group and pattern invalidation through an [`InvalidationRegistry`]
/// - A periodic sweep task, stopped by [`CacheStore::shutdown`] or on drop
///
/// Every operation takes the state lock once and never awaits anything else
/// while holding it, so operations are atomic with respect to each other.
pub struct CacheStore<T> {
    config: CacheConfig,
    state: Arc<RwLock<StoreState<T>>>,
    registry: Arc<InvalidationRegistry>,
    estimator: SharedEstimator<T>,
    sweeper: Option<BackgroundTask>,
}

impl<T> CacheStore<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Create a store with JSON-length size estimation and no groups
    pub fn new(config: CacheConfig) -> Self {
        Self::with_parts(config, InvalidationRegistry::new(), json_estimator())
    }

    /// Create a store with a group registry
    pub fn with_registry(config: CacheConfig, registry: InvalidationRegistry) -> Self {
        Self::with_parts(config, registry, json_estimator())
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a store from explicit parts
    pub fn with_parts(
        config: CacheConfig,
        registry: InvalidationRegistry,
        estimator: SharedEstimator<T>,
    ) -> Self {
        info!("Initializing cache store with config: {:?}", config);

        let state = Arc::new(RwLock::new(StoreState {
            pool: TierPool::new(config.clone()),
            counters: Counters::default(),
        }));

        let sweeper = if config.enable_auto_cleanup {
            BackgroundTask::spawn_periodic(
                "cache sweep",
                config.cleanup_interval,
                Arc::downgrade(&state),
                |state: Arc<RwLock<StoreState<T>>>| async move {
                    state.write().await.sweep();
                },
            )
        } else {
            None
        };

        Self {
            config,
            state,
            registry: Arc::new(registry),
            estimator,
            sweeper,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert with the default TTL and priority 1
    pub async fn set(&self, key: impl Into<CacheKey>, data: T) {
        self.set_with(key, data, None, 1).await
    }

    /// Insert or overwrite an entry
    ///
    /// `ttl` of `None` uses the configured default. The entry gets a fresh
    /// timestamp and a zero hit count.
    pub async fn set_with(
        &self,
        key: impl Into<CacheKey>,
        data: T,
        ttl: Option<Duration>,
        priority: u8,
    ) {
        let key = key.into();
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_with_jitter());
        let size = self.estimator.estimate(&data);
        let entry = CacheEntry::new(data, ttl, priority, size);

        let mut state = self.state.write().await;
        let evicted = state.pool.insert(key.clone(), entry, EvictionPolicy::Weighted);
        debug!(
            "Stored cache entry: {} ({} bytes, priority {}, {} evicted)",
            key,
            size,
            priority,
            evicted.len()
        );
    }

    /// Read an entry, checking it against the TTL it was written with
    pub async fn get(&self, key: &str) -> Option<T> {
        self.get_with_ttl(key, None).await
    }

    /// Read an entry, checking it against `ttl` instead of its own TTL
    pub async fn get_with_ttl(&self, key: &str, ttl: Option<Duration>) -> Option<T> {
        let mut state = self.state.write().await;

        let found = match state.pool.lookup(key, ttl) {
            Lookup::Hit(entry) => {
                entry.mark_hit();
                Some(entry.data.clone())
            }
            Lookup::Expired => {
                debug!("Cache entry expired: {}", key);
                None
            }
            Lookup::Absent => None,
        };

        match found {
            Some(data) => {
                state.counters.hits += 1;
                debug!("Cache hit: {}", key);
                Some(data)
            }
            None => {
                state.counters.misses += 1;
                debug!("Cache miss: {}", key);
                None
            }
        }
    }

    /// Check presence without touching counters or expiring anything
    pub async fn contains_key(&self, key: &str) -> bool {
        self.state.read().await.pool.contains_key(key)
    }

    /// Remove a single key
    pub async fn remove(&self, key: &str) -> Option<T> {
        let mut state = self.state.write().await;
        state.pool.remove(key).map(|entry| entry.data)
    }

    /// Invalidate a registered group, or treat `name` as an ad hoc pattern
    pub async fn invalidate(&self, name: &str) -> usize {
        self.invalidate_with_report(name).await.count()
    }

    /// Like [`invalidate`](Self::invalidate) but returns the removed keys
    pub async fn invalidate_with_report(&self, name: &str) -> InvalidationEvent {
        let matcher = self.registry.resolve(name);

        let removed = {
            let mut state = self.state.write().await;
            state.pool.remove_matching(|key| matcher.matches(key))
        };

        info!("Invalidated {} entries ({})", removed.len(), matcher.reason());
        InvalidationEvent::new(matcher.reason().clone(), removed)
    }

    /// Invalidate every key satisfying `predicate`
    pub async fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.invalidate_where_with_report(predicate).await.count()
    }

    /// Like [`invalidate_where`](Self::invalidate_where) but returns the removed keys
    pub async fn invalidate_where_with_report<F>(&self, predicate: F) -> InvalidationEvent
    where
        F: Fn(&str) -> bool,
    {
        let removed = {
            let mut state = self.state.write().await;
            state.pool.remove_matching(predicate)
        };

        info!("Invalidated {} entries by predicate", removed.len());
        InvalidationEvent::new(InvalidationReason::Predicate, removed)
    }

    /// Drop all entries and reset counters
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let count = state.pool.len();
        state.pool.clear();
        state.counters = Counters::default();

        info!("Cleared {} entries from cache", count);
    }

    /// Run the periodic sweep now
    pub async fn sweep(&self) -> InvalidationEvent {
        let removed = self.state.write().await.sweep();
        let count = removed.len();
        InvalidationEvent::new(InvalidationReason::Swept, removed)
            .with_context(format!("Swept {} entries older than {:?}", count, self.config.sweep_age()))
    }

    /// Snapshot of counters and occupancy
    pub async fn metrics(&self) -> CacheMetrics {
        self.state.read().await.metrics()
    }

    /// Get number of entries in cache
    pub async fn len(&self) -> usize {
        self.state.read().await.pool.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the periodic sweep task is active
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.as_ref().is_some_and(BackgroundTask::is_running)
    }

    /// Stop the periodic sweep task
    pub fn shutdown(&mut self) {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn config(max_entries: usize) -> CacheConfig {
        CacheConfig::builder()
            .default_ttl(Duration::from_secs(60))
            .max_entries(max_entries)
            .enable_auto_cleanup(false)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_set_and_get() {
        let cache = CacheStore::new(config(100));

        cache.set("key1", "value1".to_string()).await;

        assert_eq!(cache.get("key1").await, Some("value1".to_string()));

        let metrics = cache.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 0);
        assert_eq!(metrics.entries, 1);
        assert!(metrics.memory_usage_bytes > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_miss() {
        let cache: CacheStore<String> = CacheStore::new(config(100));

        assert_eq!(cache.get("nonexistent").await, None);
        assert_eq!(cache.metrics().await.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = CacheStore::new(config(100));
        cache
            .set_with("a", json!({"x": 1}), Some(Duration::from_millis(100)), 1)
            .await;

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.get("a").await, Some(json!({"x": 1})));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.len().await, 0);

        let metrics = cache.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_with_explicit_ttl() {
        let cache = CacheStore::new(config(100));
        cache.set("a", 1u32).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_with_ttl("a", Some(Duration::from_secs(5))).await, Some(1));
        assert_eq!(cache.get_with_ttl("a", Some(Duration::from_secs(1))).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_does_not_refresh_timestamp() {
        let cache = CacheStore::new(config(100));
        cache
            .set_with("a", 1u32, Some(Duration::from_millis(100)), 1)
            .await;

        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(20)).await;
            assert!(cache.get("a").await.is_some());
        }

        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_eviction_removes_oldest_unread() {
        let cache = CacheStore::new(config(2));

        cache.set("a", 1u32).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("b", 2u32).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("c", 3u32).await;

        assert_eq!(cache.len().await, 2);
        assert!(!cache.contains_key("a").await);
        assert!(cache.contains_key("b").await);
        assert!(cache.contains_key("c").await);
        assert_eq!(cache.metrics().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_and_priority_resist_eviction() {
        let cache = CacheStore::new(config(3));

        cache.set_with("pinned", 0u32, None, 10).await;
        cache.set("read", 1u32).await;
        cache.set("cold", 2u32).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        for _ in 0..5 {
            cache.get("read").await;
        }

        cache.set("new", 3u32).await;

        assert!(cache.contains_key("pinned").await);
        assert!(cache.contains_key("read").await);
        assert!(!cache.contains_key("cold").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict() {
        let cache = CacheStore::new(config(2));
        cache.set("a", 1u32).await;
        cache.set("b", 2u32).await;
        cache.set("a", 10u32).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await, Some(10));
        assert_eq!(cache.metrics().await.evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_eviction_drains_to_target() {
        let config = CacheConfig::builder()
            .max_entries(100)
            .max_memory_bytes(1000)
            .enable_auto_cleanup(false)
            .build();
        let cache = CacheStore::new(config);

        for i in 0..4 {
            cache.set(format!("k{}", i), "v".repeat(198)).await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.metrics().await.memory_usage_bytes, 800);

        cache.set("k4", "v".repeat(298)).await;

        let metrics = cache.metrics().await;
        assert!(metrics.evictions >= 1);
        assert!(metrics.memory_usage_bytes <= 1000);
        assert!(!cache.contains_key("k0").await);
        assert!(cache.contains_key("k4").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_invalidation() {
        let registry = InvalidationRegistry::new()
            .with_patterns("suppliers", &["^suppliers", "^home-suppliers"])
            .unwrap();
        let cache = CacheStore::with_registry(config(100), registry);

        cache.set("suppliers-page-1", json!([1, 2])).await;
        cache.set("home-suppliers-featured", json!([3])).await;
        cache.set("articles-1", json!({"title": "x"})).await;

        let event = cache.invalidate_with_report("suppliers").await;
        assert_eq!(event.count(), 2);
        assert!(matches!(event.reason, InvalidationReason::Group { .. }));

        assert!(cache.contains_key("articles-1").await);
        assert!(!cache.contains_key("suppliers-page-1").await);
        assert!(!cache.contains_key("home-suppliers-featured").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ad_hoc_and_predicate_invalidation() {
        let cache: CacheStore<Value> = CacheStore::new(config(100));
        cache.set("articles-1", json!(1)).await;
        cache.set("articles-2", json!(2)).await;
        cache.set("profile-1", json!(3)).await;

        assert_eq!(cache.invalidate("^articles-1$").await, 1);

        let event = cache
            .invalidate_where_with_report(|key| key.starts_with("profile"))
            .await;
        assert_eq!(event.keys, vec!["profile-1".to_string()]);
        assert_eq!(event.reason, InvalidationReason::Predicate);

        assert_eq!(cache.len().await, 1);
        assert!(cache.contains_key("articles-2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_old_entries_regardless_of_reads() {
        let cache = CacheStore::new(config(100));
        cache
            .set_with("long", 1u32, Some(Duration::from_secs(3600)), 1)
            .await;
        tokio::time::advance(Duration::from_secs(100)).await;
        cache.set("fresh", 2u32).await;
        tokio::time::advance(Duration::from_secs(21)).await;

        let event = cache.sweep().await;
        assert_eq!(event.keys, vec!["long".to_string()]);
        assert!(cache.contains_key("fresh").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_and_shutdown() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(1))
            .cleanup_interval(Duration::from_secs(1))
            .build();
        let mut cache = CacheStore::new(config);
        assert!(cache.is_sweeping());

        cache.set("a", 1u32).await;
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(cache.len().await, 0);

        cache.shutdown();
        assert!(!cache.is_sweeping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_counters() {
        let cache = CacheStore::new(config(100));
        cache.set("key1", 1u32).await;
        cache.get("key1").await;
        cache.get("missing").await;

        cache.clear().await;

        assert!(cache.is_empty().await);
        let metrics = cache.metrics().await;
        assert_eq!(metrics, CacheMetrics::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove() {
        let cache = CacheStore::new(config(100));
        cache.set("key1", "value1".to_string()).await;

        assert_eq!(cache.remove("key1").await, Some("value1".to_string()));
        assert!(cache.get("key1").await.is_none());
    }
}
