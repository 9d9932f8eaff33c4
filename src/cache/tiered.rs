//! Two-tier cache: a small short-lived pool in front of a large long-lived one
//!
//! - `set` always writes tier 1 and mirrors into tier 2 when the priority is
//!   above the configured threshold.
//! - `get` checks tier 1, then tier 2; a tier-2 hit is copied back into tier 1
//!   when tier 1 has room (promotion).
//! - Tier-1 capacity victims that were read at least once move to tier 2
//!   instead of being dropped (demotion).
//! - Values above the compaction threshold are stored compressed.

use crate::cache::{
    compaction::{compact, Payload},
    config::TieredConfig,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason, InvalidationRegistry},
    size::{json_estimator, SharedEstimator},
    store::{EvictionPolicy, Evicted, Lookup, TierPool},
    types::{CacheKey, CacheMetrics, CacheTier, Counters},
};
use crate::task::BackgroundTask;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct TieredState<T> {
    l1: TierPool<Payload<T>>,
    l2: TierPool<Payload<T>>,
    counters: Counters,
    enable_demotion: bool,
}

impl<T> TieredState<T> {
    /// Move tier-1 capacity victims with at least one hit into tier 2
    fn demote(&mut self, evicted: Vec<Evicted<Payload<T>>>) {
        if !self.enable_demotion {
            return;
        }

        for Evicted { key, mut entry, reason } in evicted {
            if reason != InvalidationReason::Capacity || entry.hit_count == 0 {
                continue;
            }

            entry.ttl = entry.ttl.max(self.l2.config().default_ttl);
            debug!("Demoting {} to l2 ({} hits)", key, entry.hit_count);
            self.l2.insert(key, entry, EvictionPolicy::Oldest);
            self.counters.demotions += 1;
        }
    }

    /// Sweep both tiers, reporting keys that are now gone from both
    fn sweep(&mut self) -> Vec<CacheKey> {
        let mut removed: BTreeSet<CacheKey> = self.l1.sweep().into_iter().collect();
        removed.extend(self.l2.sweep());
        removed.retain(|key| !self.l1.contains_key(key) && !self.l2.contains_key(key));
        if !removed.is_empty() {
            debug!("Swept {} stale entries", removed.len());
        }
        removed.into_iter().collect()
    }

    fn remove_matching(&mut self, predicate: impl Fn(&str) -> bool) -> Vec<CacheKey> {
        let mut removed: BTreeSet<CacheKey> =
            self.l1.remove_matching(&predicate).into_iter().collect();
        removed.extend(self.l2.remove_matching(&predicate));
        removed.into_iter().collect()
    }

    fn distinct_len(&self) -> usize {
        self.l1.len()
            + self
                .l2
                .entries()
                .filter(|(key, _)| !self.l1.contains_key(key))
                .count()
    }

    fn metrics(&self) -> CacheMetrics {
        let compressed = self
            .l1
            .entries()
            .chain(self.l2.entries())
            .filter(|(_, entry)| entry.compressed)
            .count();

        CacheMetrics {
            hits: self.counters.hits,
            misses: self.counters.misses,
            hit_rate: CacheMetrics::ratio(self.counters.hits, self.counters.misses),
            entries: self.distinct_len(),
            l1_entries: self.l1.len(),
            l2_entries: self.l2.len(),
            memory_usage_bytes: self.l1.memory_bytes() + self.l2.memory_bytes(),
            evictions: self.l1.evictions() + self.l2.evictions(),
            l2_hits: self.counters.l2_hits,
            promotions: self.counters.promotions,
            demotions: self.counters.demotions,
            compressed_entries: compressed,
        }
    }
}

/// Two-tier TTL cache with promotion, demotion and payload compaction
pub struct TieredCacheStore<T> {
    config: TieredConfig,
    state: Arc<RwLock<TieredState<T>>>,
    registry: Arc<InvalidationRegistry>,
    estimator: SharedEstimator<T>,
    sweeper: Option<BackgroundTask>,
}

impl<T> TieredCacheStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a tiered store with JSON-length size estimation and no groups
    pub fn new(config: TieredConfig) -> Self {
        Self::with_parts(config, InvalidationRegistry::new(), json_estimator())
    }

    /// Create a tiered store with a group registry
    pub fn with_registry(config: TieredConfig, registry: InvalidationRegistry) -> Self {
        Self::with_parts(config, registry, json_estimator())
    }

    /// Create a tiered store from explicit parts
    pub fn with_parts(
        config: TieredConfig,
        registry: InvalidationRegistry,
        estimator: SharedEstimator<T>,
    ) -> Self {
        info!("Initializing tiered cache with config: {:?}", config);

        let state = Arc::new(RwLock::new(TieredState {
            l1: TierPool::new(config.l1.clone()),
            l2: TierPool::new(config.l2.clone()),
            counters: Counters::default(),
            enable_demotion: config.enable_demotion,
        }));

        let sweeper = if config.l1.enable_auto_cleanup {
            BackgroundTask::spawn_periodic(
                "tiered cache sweep",
                config.l1.cleanup_interval,
                Arc::downgrade(&state),
                |state: Arc<RwLock<TieredState<T>>>| async move {
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

    pub fn config(&self) -> &TieredConfig {
        &self.config
    }

    /// Insert with the tier-1 default TTL and priority 1
    pub async fn set(&self, key: impl Into<CacheKey>, data: T) {
        self.set_with(key, data, None, 1).await
    }

    /// Insert or overwrite an entry
    ///
    /// A key that is not mirrored loses any older tier-2 copy, so a stale
    /// value can never resurface after the tier-1 copy expires.
    pub async fn set_with(
        &self,
        key: impl Into<CacheKey>,
        data: T,
        ttl: Option<Duration>,
        priority: u8,
    ) {
        let key = key.into();
        let ttl = ttl.unwrap_or_else(|| self.config.l1.ttl_with_jitter());
        let size = self.estimator.estimate(&data);
        let (payload, stored_size) = self.prepare(&key, data, size);
        let compressed = payload.is_compacted();
        let entry = CacheEntry::new(payload, ttl, priority, stored_size).with_compressed(compressed);
        let mirror = priority > self.config.l2_priority_threshold;

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if mirror {
            let mut copy = entry.clone();
            copy.ttl = copy.ttl.max(self.config.l2.default_ttl);
            state.l2.insert(key.clone(), copy, EvictionPolicy::Oldest);
        } else {
            state.l2.remove(&key);
        }

        let evicted = state.l1.insert(key.clone(), entry, EvictionPolicy::Weighted);
        state.demote(evicted);

        debug!(
            "Stored tiered entry: {} ({} bytes{}, priority {}, mirrored: {})",
            key,
            stored_size,
            if compressed { ", compacted" } else { "" },
            priority,
            mirror
        );
    }

    fn prepare(&self, key: &str, data: T, size: usize) -> (Payload<T>, usize) {
        if self.config.enable_compression && size > self.config.compression_threshold_bytes {
            match compact(&data) {
                Ok(bytes) => {
                    let stored = bytes.len();
                    return (Payload::Compacted(bytes), stored);
                }
                Err(e) => warn!("Storing {} uncompacted: {}", key, e),
            }
        }
        (Payload::Plain(data), size)
    }

    /// Read through both tiers
    pub async fn get(&self, key: &str) -> Option<T> {
        self.get_with_ttl(key, None).await
    }

    /// Read through both tiers, checking tier 1 against `ttl`
    ///
    /// Tier 2 always applies the (longer) TTL its copy was stored with.
    pub async fn get_with_ttl(&self, key: &str, ttl: Option<Duration>) -> Option<T> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let l1_result = match state.l1.lookup(key, ttl) {
            Lookup::Hit(entry) => {
                entry.mark_hit();
                Some(entry.data.load())
            }
            Lookup::Expired => {
                debug!("L1 entry expired: {}", key);
                None
            }
            Lookup::Absent => None,
        };

        match l1_result {
            Some(Ok(value)) => {
                state.counters.hits += 1;
                debug!("L1 hit: {}", key);
                return Some(value);
            }
            Some(Err(e)) => {
                warn!("Dropping undecodable l1 entry {}: {}", key, e);
                state.l1.remove(key);
            }
            None => {}
        }

        let can_promote = state.l1.has_spare_capacity();
        let l2_result = match state.l2.lookup(key, None) {
            Lookup::Hit(entry) => {
                entry.mark_hit();
                Some((entry.data.load(), can_promote.then(|| entry.clone())))
            }
            Lookup::Expired => {
                debug!("L2 entry expired: {}", key);
                None
            }
            Lookup::Absent => None,
        };

        match l2_result {
            Some((Ok(value), promoted)) => {
                state.counters.hits += 1;
                state.counters.l2_hits += 1;
                debug!("L2 hit: {}", key);

                if let Some(mut promoted) = promoted {
                    promoted.refresh();
                    promoted.ttl = self.config.l1.default_ttl;
                    let evicted = state.l1.insert(key.to_string(), promoted, EvictionPolicy::Weighted);
                    state.demote(evicted);
                    state.counters.promotions += 1;
                    debug!("Promoted {} to l1", key);
                }

                Some(value)
            }
            Some((Err(e), _)) => {
                warn!("Dropping undecodable l2 entry {}: {}", key, e);
                state.l2.remove(key);
                state.counters.misses += 1;
                None
            }
            None => {
                state.counters.misses += 1;
                debug!("Cache miss: {}", key);
                None
            }
        }
    }

    /// Which tier would serve `key` right now, without touching counters
    pub async fn tier_of(&self, key: &str) -> Option<CacheTier> {
        let state = self.state.read().await;
        if state.l1.contains_key(key) {
            Some(CacheTier::Fast)
        } else if state.l2.contains_key(key) {
            Some(CacheTier::Capacity)
        } else {
            None
        }
    }

    /// Check presence in either tier without touching counters
    pub async fn contains_key(&self, key: &str) -> bool {
        self.tier_of(key).await.is_some()
    }

    /// Remove a key from both tiers
    pub async fn remove(&self, key: &str) -> Option<T> {
        let mut state = self.state.write().await;
        let l1 = state.l1.remove(key);
        let l2 = state.l2.remove(key);
        l1.or(l2).and_then(|entry| entry.data.load().ok())
    }

    /// Invalidate a registered group, or treat `name` as an ad hoc pattern
    ///
    /// Returns the number of distinct keys removed across both tiers.
    pub async fn invalidate(&self, name: &str) -> usize {
        self.invalidate_with_report(name).await.count()
    }

    /// Like [`invalidate`](Self::invalidate) but returns the removed keys
    pub async fn invalidate_with_report(&self, name: &str) -> InvalidationEvent {
        let matcher = self.registry.resolve(name);

        let removed = {
            let mut state = self.state.write().await;
            state.remove_matching(|key| matcher.matches(key))
        };

        info!("Invalidated {} entries ({})", removed.len(), matcher.reason());
        InvalidationEvent::new(matcher.reason().clone(), removed)
    }

    /// Invalidate every key satisfying `predicate` in both tiers
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
            state.remove_matching(predicate)
        };

        info!("Invalidated {} entries by predicate", removed.len());
        InvalidationEvent::new(InvalidationReason::Predicate, removed)
    }

    /// Drop all entries in both tiers and reset counters
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let count = state.l1.len() + state.l2.len();
        state.l1.clear();
        state.l2.clear();
        state.counters = Counters::default();

        info!("Cleared {} entries from tiered cache", count);
    }

    /// Run the periodic sweep on both tiers now
    pub async fn sweep(&self) -> InvalidationEvent {
        let removed = self.state.write().await.sweep();
        let count = removed.len();
        InvalidationEvent::new(InvalidationReason::Swept, removed)
            .with_context(format!("Swept {} entries", count))
    }

    /// Snapshot of counters and occupancy across both tiers
    pub async fn metrics(&self) -> CacheMetrics {
        self.state.read().await.metrics()
    }

    /// Number of distinct keys held
    pub async fn len(&self) -> usize {
        self.state.read().await.distinct_len()
    }

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
