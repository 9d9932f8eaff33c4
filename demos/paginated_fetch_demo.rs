//! Paginated Fetch Demo Application
//!
//! Walks a simulated supplier directory through the tiered cache, showing
//! request coalescing, cache hits, group invalidation and the performance
//! report.
//!
//! Usage:
//!   cargo run --example paginated_fetch_demo
//!
//! Environment variables (all optional, also read from `.env`):
//!   QUERY_CACHE_L1_TTL_SECS        - tier-1 TTL (default: 300)
//!   QUERY_CACHE_L2_TTL_SECS        - tier-2 TTL (default: 900)
//!   QUERY_CACHE_L2_PRIORITY_THRESHOLD - mirror into tier 2 above this priority (default: 2)
//!   QUERY_CACHE_SLOW_QUERY_MS      - slow query threshold (default: 1000)
//!   RUST_LOG                       - log filter (default: info)

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tiered_query_cache::{
    FetchError, FilterState, InvalidationRegistry, MonitorConfig, PageRequest, PageResult,
    PaginatedFetcher, PaginationConfig, PerformanceMonitor, TieredCacheStore, TieredConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TOTAL_SUPPLIERS: u32 = 47;

/// Simulated backend: variable latency, occasional transient failure
async fn fetch_suppliers(request: PageRequest) -> Result<PageResult<String>, FetchError> {
    let (latency_ms, fail) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(50..700), rng.gen_bool(0.15))
    };
    tokio::time::sleep(Duration::from_millis(latency_ms)).await;

    if fail {
        return Err(FetchError::Upstream {
            status: 503,
            message: "directory service busy".to_string(),
        });
    }

    let start = request.page * request.page_size;
    let end = (start + request.page_size).min(TOTAL_SUPPLIERS);
    let items = (start..end)
        .map(|id| format!("Supplier #{} [{}]", id, request.filter.canonical()))
        .collect();

    Ok(PageResult::new(items, end < TOTAL_SUPPLIERS, Some(TOTAL_SUPPLIERS as u64)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("=== Paginated Fetch Demo ===");

    let cache = Arc::new(TieredCacheStore::with_registry(
        TieredConfig::from_env()?,
        InvalidationRegistry::supplier_directory()?,
    ));
    let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig::from_env()?));
    let fetcher = PaginatedFetcher::new(
        PaginationConfig::default(),
        cache.clone(),
        monitor.clone(),
        fetch_suppliers,
    );

    let filter = FilterState::new("suppliers")
        .with("category", "packaging")
        .sorted_by("name");

    info!("\n--- Coalesced first page ---");
    let (a, b) = tokio::join!(fetcher.fetch_page(&filter, 0), fetcher.fetch_page(&filter, 0));
    info!(
        "Two callers, same result: {}",
        matches!((&a, &b), (Ok(x), Ok(y)) if x == y)
    );

    info!("\n--- Load more ---");
    let mut cursor = fetcher.cursor(filter.clone());
    loop {
        match cursor.fetch_next().await {
            Ok(Some(page)) => info!(
                "Loaded {} items, next page token: {:?}",
                page.items.len(),
                page.next_page_token
            ),
            Ok(None) => break,
            Err(e) => {
                info!("✗ Page {:?} failed: {}", cursor.next_page_token(), e);
                break;
            }
        }
    }
    info!("Cursor state: {:?}", cursor.state());

    info!("\n--- Second pass (cached) ---");
    cursor.reset();
    while let Ok(Some(_)) = cursor.fetch_next().await {}
    info!("Cache: {}", cache.metrics().await);

    info!("\n--- Category change ---");
    let event = cache.invalidate_with_report("categories").await;
    info!("Invalidated {} entries ({})", event.count(), event.reason);

    info!("\n--- Performance report ---");
    let report = monitor.report(5).await;
    info!("{}", report);
    for query in &report.top_queries {
        info!("  {} x{} (avg {:.0}ms)", query.key, query.count, query.average_ms);
    }
    info!(
        "Health: {} (HTTP {})",
        report.status,
        report.status.to_http_status_code()
    );

    monitor.shutdown();
    info!("\n=== Demo Complete ===");

    Ok(())
}
