//! Cache entry management with TTL support

use std::time::Duration;
use tokio::time::Instant;

/// A cached value with the bookkeeping the store needs for expiry and eviction
///
/// `timestamp` is set when the entry is written and is never touched by a
/// read; reads only bump `hit_count`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached value
    pub data: T,

    /// Creation/refresh time
    pub timestamp: Instant,

    /// Time-to-live chosen at `set`
    pub ttl: Duration,

    /// Number of reads served from this entry
    pub hit_count: u32,

    /// Caller-supplied weight, default 1
    pub priority: u8,

    /// Estimated size in bytes
    pub size_estimate: usize,

    /// Whether `data` holds a compacted payload
    pub compressed: bool,

    /// Insertion order, breaks ties between otherwise equal entries
    pub(crate) sequence: u64,
}

impl<T> CacheEntry<T> {
    /// Create a fresh entry stamped with the current time
    pub fn new(data: T, ttl: Duration, priority: u8, size_estimate: usize) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            ttl,
            hit_count: 0,
            priority,
            size_estimate,
            compressed: false,
            sequence: 0,
        }
    }

    /// Mark the payload as compacted
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Time since the entry was written
    pub fn age(&self) -> Duration {
        self.age_at(Instant::now())
    }

    pub(crate) fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    /// Check expiry against the entry's own TTL
    pub fn is_expired(&self) -> bool {
        self.is_older_than(self.ttl)
    }

    /// Check expiry against an explicit TTL; an entry is live while `age < ttl`
    pub fn is_older_than(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        self.ttl
            .checked_sub(self.age())
            .filter(|left| !left.is_zero())
    }

    /// Record a read
    pub fn mark_hit(&mut self) {
        self.hit_count = self.hit_count.saturating_add(1);
    }

    /// Reset the write time, used when an entry is promoted between tiers
    pub fn refresh(&mut self) {
        self.timestamp = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_creation() {
        let entry = CacheEntry::new("value".to_string(), Duration::from_secs(60), 1, 5);

        assert_eq!(entry.data, "value");
        assert_eq!(entry.hit_count, 0);
        assert_eq!(entry.priority, 1);
        assert!(!entry.compressed);
        assert!(!entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiration() {
        let entry = CacheEntry::new(1u32, Duration::from_millis(100), 1, 4);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!entry.is_expired());
        assert_eq!(entry.time_until_expiration(), Some(Duration::from_millis(50)));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(entry.is_expired());
        assert!(entry.time_until_expiration().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_does_not_touch_timestamp() {
        let mut entry = CacheEntry::new(1u32, Duration::from_secs(1), 1, 4);
        let written = entry.timestamp;

        tokio::time::advance(Duration::from_millis(10)).await;
        entry.mark_hit();
        entry.mark_hit();

        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.timestamp, written);

        entry.refresh();
        assert!(entry.timestamp > written);
    }
}
