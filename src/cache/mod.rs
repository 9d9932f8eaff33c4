//! # Query Result Cache
//!
//! In-process caching for paginated query results.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: entries are checked against their TTL on every read
//! - **Weighted Eviction**: at the entry limit the least valuable entry goes,
//!   valued by `priority * (hits + 1) / age`
//! - **Memory Budget**: oversized pools drain by size-to-value ratio down to a target
//! - **Two Tiers**: a short-lived fast pool in front of a long-lived capacity pool,
//!   with promotion on tier-2 hits and demotion of read tier-1 victims
//! - **Compaction**: large values are stored LZ4-compressed and expanded on read
//! - **Group Invalidation**: named groups of key patterns purged together
//! - **Periodic Sweep**: a background task removes entries nobody reads anymore
//!
//! ## Example
//!
//! ```rust
//! use tiered_query_cache::cache::{CacheConfig, CacheStore, InvalidationRegistry};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(120))
//!     .max_entries(500)
//!     .build();
//!
//! let cache = CacheStore::with_registry(config, InvalidationRegistry::supplier_directory()?);
//!
//! cache.set("suppliers-page-0-9f2c", vec!["Acme".to_string()]).await;
//!
//! if let Some(page) = cache.get("suppliers-page-0-9f2c").await {
//!     println!("Cache hit: {:?}", page);
//! }
//!
//! // A category change also drops supplier listings
//! let removed = cache.invalidate("categories").await;
//! println!("Invalidated {} entries", removed);
//! # Ok(())
//! # }
//! ```

pub mod compaction;
pub mod config;
pub mod entry;
pub mod eviction;
pub mod invalidation;
pub mod size;
pub mod store;
pub mod tiered;
pub mod types;

pub use compaction::Payload;
pub use config::{CacheConfig, CacheConfigBuilder, TieredConfig, TieredConfigBuilder};
pub use entry::CacheEntry;
pub use invalidation::{
    InvalidationEvent, InvalidationGroup, InvalidationReason, InvalidationRegistry,
    InvalidationRule, KeyMatcher,
};
pub use size::{
    json_estimator, FnSizeEstimator, JsonSizeEstimator, ShallowSizeEstimator, SharedEstimator,
    SizeEstimator,
};
pub use store::CacheStore;
pub use tiered::TieredCacheStore;
pub use types::{CacheKey, CacheMetrics, CacheTier, QueryKey};
