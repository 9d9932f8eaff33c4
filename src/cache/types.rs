//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cache key type - an opaque string as far as the store is concerned
pub type CacheKey = String;

/// Structured form of a page key: `(domain, filter_hash, page)`
///
/// Renders to the conventional `"<domain>-page-<n>-<filterhash>"` string so
/// that regex invalidation patterns keep working, and parses back so that
/// invalidation rules can match on fields instead of raw text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    /// Semantic family, e.g. `suppliers` or `home-suppliers`
    pub domain: String,

    /// Hash of every active filter and sort parameter
    pub filter_hash: String,

    /// Zero-based page index
    pub page: u32,
}

impl QueryKey {
    pub fn new(domain: impl Into<String>, filter_hash: impl Into<String>, page: u32) -> Self {
        Self {
            domain: domain.into(),
            filter_hash: filter_hash.into(),
            page,
        }
    }

    /// Parse a rendered key; returns `None` for keys not in page form
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.rsplitn(4, '-');
        let filter_hash = parts.next()?;
        let page = parts.next()?.parse::<u32>().ok()?;
        if parts.next()? != "page" {
            return None;
        }
        let domain = parts.next()?;
        if domain.is_empty() || filter_hash.is_empty() {
            return None;
        }
        Some(Self::new(domain, filter_hash, page))
    }

    pub fn to_cache_key(&self) -> CacheKey {
        self.to_string()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-page-{}-{}", self.domain, self.page, self.filter_hash)
    }
}

impl FromStr for QueryKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryKey::parse(s).ok_or_else(|| format!("not a page key: {}", s))
    }
}

/// Which pool of a tiered cache holds an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// Tier 1: small, fast, short TTL
    Fast,

    /// Tier 2: larger, long TTL
    Capacity,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Fast => write!(f, "l1"),
            CacheTier::Capacity => write!(f, "l2"),
        }
    }
}

/// Snapshot of cache counters
///
/// Counters only grow until `clear()`; `hit_rate` is derived from them when
/// the snapshot is taken.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheMetrics {
    /// Total number of cache hits (both tiers)
    pub hits: u64,

    /// Total number of full misses
    pub misses: u64,

    /// `hits / (hits + misses)`, 0.0 before the first lookup
    pub hit_rate: f64,

    /// Number of entries currently stored (all tiers)
    pub entries: usize,

    /// Entries held in tier 1 (equal to `entries` for a single-tier store)
    pub l1_entries: usize,

    /// Entries held in tier 2
    pub l2_entries: usize,

    /// Estimated bytes held by all entries
    pub memory_usage_bytes: usize,

    /// Entries removed by capacity or memory pressure
    pub evictions: u64,

    /// Hits served by tier 2
    pub l2_hits: u64,

    /// Tier-2 entries copied back into tier 1
    pub promotions: u64,

    /// Tier-1 eviction victims moved into tier 2
    pub demotions: u64,

    /// Entries currently stored in compacted form
    pub compressed_entries: usize,
}

impl CacheMetrics {
    /// Exact hit ratio for the given counters
    pub fn ratio(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Hit rate as a percentage
    pub fn hit_rate_percent(&self) -> f64 {
        self.hit_rate * 100.0
    }
}

impl fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheMetrics {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {} (l1: {}, l2: {}), memory: {} bytes, evictions: {}, l2_hits: {} }}",
            self.hits,
            self.misses,
            self.hit_rate_percent(),
            self.entries,
            self.l1_entries,
            self.l2_entries,
            self.memory_usage_bytes,
            self.evictions,
            self.l2_hits
        )
    }
}

/// Hit/miss counters shared by both store flavours
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub l2_hits: u64,
    pub promotions: u64,
    pub demotions: u64,
}
