//! Victim selection for capacity and memory pressure
//!
//! Every entry gets a value
//!
//! ```text
//! value = priority * (hit_count + 1) / age_secs
//! ```
//!
//! which grows with priority and hits and shrinks with age. Capacity overflow
//! evicts the single entry with the lowest value; memory pressure evicts the
//! entry with the highest `size / value`. Ties go to the older write, then to
//! the earlier insertion.

use crate::cache::entry::CacheEntry;
use crate::cache::types::CacheKey;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::time::Instant;

/// Floor for entry age so brand-new entries do not divide by zero
const MIN_AGE_SECS: f64 = 0.001;

/// Retention value of an entry at `now`
pub fn entry_value<T>(entry: &CacheEntry<T>, now: Instant) -> f64 {
    let age_secs = entry.age_at(now).as_secs_f64().max(MIN_AGE_SECS);
    f64::from(entry.priority) * (f64::from(entry.hit_count) + 1.0) / age_secs
}

/// Bytes held per unit of value; larger means a worse deal
pub fn size_to_value_ratio<T>(entry: &CacheEntry<T>, now: Instant) -> f64 {
    entry.size_estimate as f64 / entry_value(entry, now).max(f64::MIN_POSITIVE)
}

fn older_first<T>(a: &CacheEntry<T>, b: &CacheEntry<T>) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then(a.sequence.cmp(&b.sequence))
}

/// Entry with the lowest retention value
pub fn least_valuable<T>(entries: &HashMap<CacheKey, CacheEntry<T>>) -> Option<CacheKey> {
    let now = Instant::now();
    entries
        .iter()
        .min_by(|(_, a), (_, b)| {
            entry_value(a, now)
                .total_cmp(&entry_value(b, now))
                .then_with(|| older_first(a, b))
        })
        .map(|(key, _)| key.clone())
}

/// Entry with the worst size-to-value ratio
pub fn worst_size_ratio<T>(entries: &HashMap<CacheKey, CacheEntry<T>>) -> Option<CacheKey> {
    let now = Instant::now();
    entries
        .iter()
        .max_by(|(_, a), (_, b)| {
            size_to_value_ratio(a, now)
                .total_cmp(&size_to_value_ratio(b, now))
                // max_by keeps the later of equals, so reverse to prefer the older write
                .then_with(|| older_first(b, a))
        })
        .map(|(key, _)| key.clone())
}

/// Entry with the oldest write time
pub fn oldest<T>(entries: &HashMap<CacheKey, CacheEntry<T>>) -> Option<CacheKey> {
    entries
        .iter()
        .min_by(|(_, a), (_, b)| older_first(a, b))
        .map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(priority: u8, hits: u32, size: usize, sequence: u64) -> CacheEntry<()> {
        let mut entry = CacheEntry::new((), Duration::from_secs(60), priority, size);
        entry.hit_count = hits;
        entry.sequence = sequence;
        entry
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_is_monotonic() {
        let base = entry(1, 0, 10, 0);
        let weighted = entry(2, 0, 10, 1);
        let popular = entry(1, 3, 10, 2);
        tokio::time::advance(Duration::from_secs(1)).await;
        let now = Instant::now();
        tokio::time::advance(Duration::from_secs(1)).await;
        let later = Instant::now();

        assert!(entry_value(&weighted, now) > entry_value(&base, now));
        assert!(entry_value(&popular, now) > entry_value(&base, now));
        assert!(entry_value(&base, later) < entry_value(&base, now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_least_valuable_prefers_older_then_lower_priority() {
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), entry(1, 0, 10, 0));
        tokio::time::advance(Duration::from_millis(10)).await;
        entries.insert("b".to_string(), entry(1, 0, 10, 1));
        assert_eq!(least_valuable(&entries), Some("a".to_string()));

        entries.get_mut("a").unwrap().priority = 20;
        assert_eq!(least_valuable(&entries), Some("b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ties_break_on_insertion_order() {
        let mut entries = HashMap::new();
        entries.insert("second".to_string(), entry(1, 0, 10, 2));
        entries.insert("first".to_string(), entry(1, 0, 10, 1));
        assert_eq!(least_valuable(&entries), Some("first".to_string()));
        assert_eq!(worst_size_ratio(&entries), Some("first".to_string()));
        assert_eq!(oldest(&entries), Some("first".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worst_size_ratio_picks_big_cold_entry() {
        let mut entries = HashMap::new();
        entries.insert("big".to_string(), entry(1, 0, 10_000, 0));
        entries.insert("small".to_string(), entry(1, 0, 10, 1));
        entries.insert("hot_big".to_string(), entry(3, 50, 10_000, 2));
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(worst_size_ratio(&entries), Some("big".to_string()));
    }

    #[test]
    fn test_empty_map_has_no_victim() {
        let entries: HashMap<CacheKey, CacheEntry<()>> = HashMap::new();
        assert!(least_valuable(&entries).is_none());
        assert!(worst_size_ratio(&entries).is_none());
        assert!(oldest(&entries).is_none());
    }
}
