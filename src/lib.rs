//! # Tiered Query Cache (tiered-query-cache)
//!
//! An in-process cache for paginated query results, with fetch monitoring.
//!
//! ## Features
//!
//! - Single-tier [`CacheStore`] with TTL expiry, weighted eviction and a memory budget
//! - Two-tier [`TieredCacheStore`] with promotion, demotion and LZ4 payload compaction
//! - Named invalidation groups through an [`InvalidationRegistry`]
//! - [`PerformanceMonitor`]: query metrics ring buffer, retry wrapper, health status
//! - [`PaginatedFetcher`]: page caching with request coalescing for "load more" lists
//!
//! Background maintenance (cache sweeps, metric pruning) runs on the ambient
//! tokio runtime and stops on `shutdown()` or when the owner is dropped.
//!
//! ## Caching Pages
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiered_query_cache::{
//!     FetchError, FilterState, InvalidationRegistry, PageRequest, PageResult,
//!     PaginatedFetcher, PaginationConfig, PerformanceMonitor, TieredCacheStore, TieredConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Arc::new(TieredCacheStore::with_registry(
//!         TieredConfig::from_env()?,
//!         InvalidationRegistry::supplier_directory()?,
//!     ));
//!     let monitor = Arc::new(PerformanceMonitor::default());
//!
//!     let fetcher = PaginatedFetcher::new(
//!         PaginationConfig::default(),
//!         cache.clone(),
//!         monitor.clone(),
//!         |request: PageRequest| async move {
//!             let items = vec![format!("supplier {}", request.page)];
//!             Ok::<_, FetchError>(PageResult::new(items, request.page < 4, Some(5)))
//!         },
//!     );
//!
//!     let filter = FilterState::new("suppliers").with("category", "packaging");
//!     let page = fetcher.fetch_page(&filter, 0).await?;
//!     println!("{} items, next page: {:?}", page.items.len(), page.next_page_token);
//!
//!     // A category change purges supplier listings too
//!     cache.invalidate("categories").await;
//!
//!     println!("{}", monitor.report(5).await);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod monitor;
pub mod pagination;

mod task;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheMetrics, CacheStore, CacheTier,
    InvalidationEvent, InvalidationGroup, InvalidationReason, InvalidationRegistry,
    InvalidationRule, QueryKey, SizeEstimator, TieredCacheStore, TieredConfig,
    TieredConfigBuilder,
};
pub use error::{CacheError, FetchError, Result};
pub use monitor::{
    HealthStatus, MonitorConfig, PerformanceMonitor, PerformanceReport, QueryMetric, RetryPolicy,
    Severity,
};
pub use pagination::{
    CursorState, FilterState, PageCursor, PageRequest, PageResult, PageSource, PaginatedFetcher,
    PaginationConfig,
};
