//! Page-level caching for paginated queries
//!
//! [`PaginatedFetcher`] sits between a "load more" style consumer and the
//! upstream data source. Each page is cached under a key derived from the
//! full filter state plus the page index, so changing any filter yields a
//! disjoint key space.
//!
//! Concurrent requests for the same uncached page share one upstream fetch.
//! Every fetch takes a generation number when it starts; a result is only
//! written to the cache if no newer fetch or invalidation for that page has
//! happened in the meantime.

use crate::cache::{tiered::TieredCacheStore, types::QueryKey, CacheKey};
use crate::error::FetchError;
use crate::monitor::PerformanceMonitor;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for page caching
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginationConfig {
    /// TTL of a cached page
    pub page_ttl: Duration,

    /// Items requested per page
    pub page_size: u32,

    /// Fetches faster than this are cached with priority 3
    pub high_priority_latency: Duration,

    /// Fetches faster than this are cached with priority 2, slower ones with 1
    pub medium_priority_latency: Duration,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_ttl: Duration::from_secs(120),
            page_size: 20,
            high_priority_latency: Duration::from_millis(500),
            medium_priority_latency: Duration::from_millis(1000),
        }
    }
}

impl PaginationConfig {
    /// Cache priority for a page that took `latency` to fetch
    pub fn priority_for(&self, latency: Duration) -> u8 {
        if latency < self.high_priority_latency {
            3
        } else if latency < self.medium_priority_latency {
            2
        } else {
            1
        }
    }
}

/// The active filters and sort order of a paginated query
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterState {
    pub domain: String,
    pub params: BTreeMap<String, String>,
    pub sort: Option<String>,
}

impl FilterState {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Add or replace a filter parameter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn sorted_by(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// All parameters and the sort order in a fixed order, for display
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        if let Some(sort) = &self.sort {
            parts.push(format!("sort={}", sort));
        }
        parts.join("&")
    }

    /// Hex digest of the parameters and sort order, used in cache keys
    ///
    /// Hashes the fields themselves rather than the joined string, so values
    /// containing `&` or `=` cannot collide with other parameter sets.
    pub fn filter_hash(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.params.hash(&mut hasher);
        self.sort.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    pub fn page_key(&self, page: u32) -> QueryKey {
        QueryKey::new(self.domain.clone(), self.filter_hash(), page)
    }

    /// Whether `key` is a page of this filter state
    pub fn owns_key(&self, key: &str) -> bool {
        QueryKey::parse(key).is_some_and(|parsed| {
            parsed.domain == self.domain && parsed.filter_hash == self.filter_hash()
        })
    }
}

/// What the upstream source is asked for
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub filter: FilterState,
    pub page: u32,
    pub page_size: u32,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub total_count: Option<u64>,
    /// Page index to request next, set by the fetcher when `has_more`
    pub next_page_token: Option<u32>,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, has_more: bool, total_count: Option<u64>) -> Self {
        Self {
            items,
            has_more,
            total_count,
            next_page_token: None,
        }
    }
}

/// Upstream data source for pages
pub trait PageSource<T>: Send + Sync {
    fn fetch(&self, request: PageRequest) -> BoxFuture<'static, Result<PageResult<T>, FetchError>>;
}

impl<T, F, Fut> PageSource<T> for F
where
    F: Fn(PageRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PageResult<T>, FetchError>> + Send + 'static,
{
    fn fetch(&self, request: PageRequest) -> BoxFuture<'static, Result<PageResult<T>, FetchError>> {
        Box::pin(self(request))
    }
}

type PageFuture<T> = Shared<BoxFuture<'static, Result<PageResult<T>, FetchError>>>;

/// Write ordering for page fetches
///
/// Entries in `written` and `barriers` only live while a fetch they could
/// reject is still in flight.
#[derive(Debug, Default)]
struct Generations {
    issued: u64,
    /// Started but unsettled fetches: generation -> (key, filter hash)
    in_flight: HashMap<u64, (CacheKey, String)>,
    /// Newest generation written per key
    written: HashMap<CacheKey, u64>,
    /// Generation issued when a filter was last invalidated
    barriers: HashMap<String, u64>,
}

impl Generations {
    fn start(&mut self, key: &str, filter_hash: &str) -> u64 {
        self.issued += 1;
        self.in_flight
            .insert(self.issued, (key.to_string(), filter_hash.to_string()));
        self.issued
    }

    /// Reject writes from fetches of `filter_hash` started before now
    fn raise_barrier(&mut self, filter_hash: &str) {
        if self.in_flight.values().any(|(_, hash)| hash == filter_hash) {
            self.barriers.insert(filter_hash.to_string(), self.issued);
        }
    }

    fn settle(&mut self, generation: u64) {
        let Some((key, _)) = self.in_flight.remove(&generation) else {
            return;
        };

        if !self.in_flight.values().any(|(other, _)| *other == key) {
            self.written.remove(&key);
        }

        let in_flight = &self.in_flight;
        self.barriers.retain(|hash, barrier| {
            in_flight
                .iter()
                .any(|(started, (_, other))| other == hash && *started <= *barrier)
        });
    }

    fn claim(&mut self, key: &str, filter_hash: &str, generation: u64) -> bool {
        let barrier = self.barriers.get(filter_hash).copied().unwrap_or(0);
        let written = self.written.get(key).copied().unwrap_or(0);
        if generation <= barrier || generation <= written {
            return false;
        }
        self.written.insert(key.to_string(), generation);
        true
    }
}

struct Inner<T> {
    config: PaginationConfig,
    cache: Arc<TieredCacheStore<PageResult<T>>>,
    monitor: Arc<PerformanceMonitor>,
    source: Arc<dyn PageSource<T>>,
    pending: Mutex<HashMap<CacheKey, (u64, PageFuture<T>)>>,
    generations: std::sync::Mutex<Generations>,
}

impl<T> Inner<T> {
    fn lock_generations(&self) -> MutexGuard<'_, Generations> {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles a fetch's generation once its future completes or is dropped
struct InFlight<T> {
    inner: Arc<Inner<T>>,
    generation: u64,
}

impl<T> InFlight<T> {
    fn start(inner: Arc<Inner<T>>, key: &str, filter_hash: &str) -> Self {
        let generation = inner.lock_generations().start(key, filter_hash);
        Self { inner, generation }
    }
}

impl<T> Drop for InFlight<T> {
    fn drop(&mut self) {
        self.inner.lock_generations().settle(self.generation);
    }
}

impl<T> Inner<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(
        self: Arc<Self>,
        key: CacheKey,
        request: PageRequest,
        generation: u64,
    ) -> Result<PageResult<T>, FetchError> {
        let start = Instant::now();
        let source = self.source.clone();
        let mut page = self
            .monitor
            .with_retry(&key, || source.fetch(request.clone()))
            .await?;
        let latency = start.elapsed();

        page.next_page_token = page.has_more.then(|| request.page + 1);

        let filter_hash = request.filter.filter_hash();
        let fresh = self
            .lock_generations()
            .claim(&key, &filter_hash, generation);

        if fresh {
            let priority = self.config.priority_for(latency);
            self.cache
                .set_with(key.clone(), page.clone(), Some(self.config.page_ttl), priority)
                .await;
            debug!(
                "Cached page {} ({} items, {:?}, priority {})",
                key,
                page.items.len(),
                latency,
                priority
            );
        } else {
            debug!(
                "Discarding out-of-order result for {} (generation {})",
                key, generation
            );
        }

        Ok(page)
    }
}

/// Cached, coalescing page loader
pub struct PaginatedFetcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for PaginatedFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PaginatedFetcher<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        config: PaginationConfig,
        cache: Arc<TieredCacheStore<PageResult<T>>>,
        monitor: Arc<PerformanceMonitor>,
        source: impl PageSource<T> + 'static,
    ) -> Self {
        info!("Initializing paginated fetcher with config: {:?}", config);

        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                monitor,
                source: Arc::new(source),
                pending: Mutex::new(HashMap::new()),
                generations: std::sync::Mutex::new(Generations::default()),
            }),
        }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<TieredCacheStore<PageResult<T>>> {
        &self.inner.cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.inner.monitor
    }

    /// Load one page, from cache when possible
    ///
    /// Callers asking for the same uncached page while a fetch is in flight
    /// wait for that fetch and get the same result or error.
    pub async fn fetch_page(
        &self,
        filter: &FilterState,
        page: u32,
    ) -> Result<PageResult<T>, FetchError> {
        let key = filter.page_key(page).to_cache_key();

        if let Some(cached) = self.inner.cache.get(&key).await {
            self.inner.monitor.record_cache_hit(&key).await;
            return Ok(cached);
        }

        let (generation, fetch) = {
            let mut pending = self.inner.pending.lock().await;
            match pending.get(&key) {
                Some((generation, fetch)) => {
                    debug!("Joining in-flight fetch for {}", key);
                    (*generation, fetch.clone())
                }
                None => {
                    let in_flight =
                        InFlight::start(self.inner.clone(), &key, &filter.filter_hash());
                    let generation = in_flight.generation;
                    let request = PageRequest {
                        filter: filter.clone(),
                        page,
                        page_size: self.inner.config.page_size,
                    };
                    let load = self.inner.clone().load(key.clone(), request, generation);
                    let fetch = async move {
                        let _in_flight = in_flight;
                        load.await
                    }
                    .boxed()
                    .shared();
                    pending.insert(key.clone(), (generation, fetch.clone()));
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut pending = self.inner.pending.lock().await;
        if pending
            .get(&key)
            .is_some_and(|(current, _)| *current == generation)
        {
            pending.remove(&key);
        }

        result
    }

    /// Start a "load more" sequence over `filter`
    pub fn cursor(&self, filter: FilterState) -> PageCursor<T> {
        PageCursor {
            fetcher: self.clone(),
            filter,
            state: CursorState::Idle { next_page: 0 },
        }
    }

    /// Drop every cached page of `filter`
    ///
    /// Fetches for this filter that are still in flight complete for their
    /// callers but no longer write to the cache.
    pub async fn invalidate_filter(&self, filter: &FilterState) -> usize {
        self.inner
            .lock_generations()
            .raise_barrier(&filter.filter_hash());

        self.inner
            .pending
            .lock()
            .await
            .retain(|key, _| !filter.owns_key(key));

        let removed = self
            .inner
            .cache
            .invalidate_where(|key| filter.owns_key(key))
            .await;

        info!(
            "Invalidated {} cached pages for {} [{}]",
            removed,
            filter.domain,
            filter.canonical()
        );
        removed
    }
}

/// Where a [`PageCursor`] stands
#[derive(Debug, Clone, PartialEq)]
pub enum CursorState {
    /// Waiting for a request for `next_page`
    Idle { next_page: u32 },

    /// A fetch for `page` is running (or was abandoned mid-flight)
    Loading { page: u32 },

    /// `page` was loaded; the next request loads `page + 1`
    Success { page: u32 },

    /// Loading `page` failed; the next request retries it
    Error { page: u32, error: FetchError },

    /// The last page has been loaded
    NoMorePages,
}

impl CursorState {
    /// Page the next request would load
    pub fn pending_page(&self) -> Option<u32> {
        match self {
            CursorState::Idle { next_page } => Some(*next_page),
            CursorState::Loading { page } | CursorState::Error { page, .. } => Some(*page),
            CursorState::Success { page } => Some(page + 1),
            CursorState::NoMorePages => None,
        }
    }
}

/// Incremental loader for one filter state
pub struct PageCursor<T> {
    fetcher: PaginatedFetcher<T>,
    filter: FilterState,
    state: CursorState,
}

impl<T> PageCursor<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// Page index the next `fetch_next` will load, `None` once exhausted
    pub fn next_page_token(&self) -> Option<u32> {
        self.state.pending_page()
    }

    /// Load the next page; `Ok(None)` once there are no more pages
    pub async fn fetch_next(&mut self) -> Result<Option<PageResult<T>>, FetchError> {
        let Some(page) = self.state.pending_page() else {
            debug!("No more pages for {}", self.filter.domain);
            return Ok(None);
        };

        self.state = CursorState::Loading { page };

        match self.fetcher.fetch_page(&self.filter, page).await {
            Ok(result) => {
                self.state = if result.has_more {
                    CursorState::Success { page }
                } else {
                    CursorState::NoMorePages
                };
                Ok(Some(result))
            }
            Err(error) => {
                self.state = CursorState::Error {
                    page,
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }

    /// Retry the page that failed; a no-op in any other state
    pub async fn retry(&mut self) -> Result<Option<PageResult<T>>, FetchError> {
        match self.state {
            CursorState::Error { .. } => self.fetch_next().await,
            _ => Ok(None),
        }
    }

    /// Start over from page 0
    pub fn reset(&mut self) {
        self.state = CursorState::Idle { next_page: 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::{CacheConfig, TieredConfig};
    use crate::monitor::MonitorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> Arc<TieredCacheStore<PageResult<String>>> {
        let tier = |ttl| {
            CacheConfig::builder()
                .default_ttl(Duration::from_secs(ttl))
                .enable_auto_cleanup(false)
                .build()
        };
        Arc::new(TieredCacheStore::new(
            TieredConfig::builder().l1(tier(60)).l2(tier(180)).build(),
        ))
    }

    fn monitor() -> Arc<PerformanceMonitor> {
        Arc::new(PerformanceMonitor::new(MonitorConfig {
            enable_auto_prune: false,
            ..MonitorConfig::default()
        }))
    }

    /// Three pages of two items each, counting upstream calls
    fn counting_source(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl PageSource<String> + 'static {
        move |request: PageRequest| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                let items = (0..2)
                    .map(|i| format!("{}-{}", request.filter.domain, request.page * 2 + i))
                    .collect();
                Ok::<_, FetchError>(PageResult::new(items, request.page < 2, Some(6)))
            }
        }
    }

    #[test]
    fn test_filter_hash_is_order_independent() {
        let a = FilterState::new("suppliers")
            .with("category", "packaging")
            .with("city", "Lyon");
        let b = FilterState::new("suppliers")
            .with("city", "Lyon")
            .with("category", "packaging");
        let c = a.clone().sorted_by("name");

        assert_eq!(a.filter_hash(), b.filter_hash());
        assert_ne!(a.filter_hash(), c.filter_hash());
        assert_eq!(c.canonical(), "category=packaging&city=Lyon&sort=name");
    }

    #[test]
    fn test_separators_in_values_do_not_collide() {
        let joined = FilterState::new("suppliers").with("city", "Lyon&region=North");
        let split = FilterState::new("suppliers")
            .with("city", "Lyon")
            .with("region", "North");

        assert_eq!(joined.canonical(), split.canonical());
        assert_ne!(joined.filter_hash(), split.filter_hash());
        assert!(!joined.owns_key(&split.page_key(0).to_cache_key()));

        let sorted = FilterState::new("suppliers").sorted_by("name");
        let param = FilterState::new("suppliers").with("sort", "name");
        assert_ne!(sorted.filter_hash(), param.filter_hash());
    }

    #[test]
    fn test_page_keys_round_trip() {
        let filter = FilterState::new("suppliers").with("city", "Lyon");
        let key = filter.page_key(3).to_cache_key();

        assert!(key.starts_with("suppliers-page-3-"));
        assert!(filter.owns_key(&key));
        assert!(!FilterState::new("suppliers").owns_key(&key));
        assert!(!FilterState::new("articles").with("city", "Lyon").owns_key(&key));
    }

    #[test]
    fn test_priority_bands() {
        let config = PaginationConfig::default();
        assert_eq!(config.priority_for(Duration::from_millis(120)), 3);
        assert_eq!(config.priority_for(Duration::from_millis(500)), 2);
        assert_eq!(config.priority_for(Duration::from_millis(999)), 2);
        assert_eq!(config.priority_for(Duration::from_millis(1000)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = monitor();
        let fetcher = PaginatedFetcher::new(
            PaginationConfig::default(),
            cache(),
            monitor.clone(),
            counting_source(calls.clone(), Duration::from_millis(50)),
        );
        let filter = FilterState::new("suppliers");

        let first = fetcher.fetch_page(&filter, 0).await.unwrap();
        let second = fetcher.fetch_page(&filter, 0).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.next_page_token, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let report = monitor.report(5).await;
        assert_eq!(report.total_queries, 2);
        assert_eq!(report.cache_hit_rate, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = PaginatedFetcher::new(
            PaginationConfig::default(),
            cache(),
            monitor(),
            counting_source(calls.clone(), Duration::from_millis(200)),
        );
        let filter = FilterState::new("suppliers").with("city", "Lyon");

        let (a, b) = tokio::join!(fetcher.fetch_page(&filter, 0), fetcher.fetch_page(&filter, 0));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(fetcher.inner.pending.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_pages_are_mirrored_into_l2() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache();
        let fetcher = PaginatedFetcher::new(
            PaginationConfig::default(),
            cache.clone(),
            monitor(),
            counting_source(calls.clone(), Duration::from_millis(10)),
        );
        let fast = FilterState::new("suppliers");
        fetcher.fetch_page(&fast, 0).await.unwrap();

        let metrics = cache.metrics().await;
        assert_eq!(metrics.l1_entries, 1);
        assert_eq!(metrics.l2_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_result_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = {
            let calls = calls.clone();
            move |_request: PageRequest| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let (delay, label) = if call == 0 { (500, "old") } else { (10, "new") };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok::<_, FetchError>(PageResult::new(vec![label.to_string()], false, Some(1)))
                }
            }
        };
        let fetcher = PaginatedFetcher::new(PaginationConfig::default(), cache(), monitor(), source);
        let filter = FilterState::new("articles");

        let (stale, fresh) = tokio::join!(fetcher.fetch_page(&filter, 0), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            fetcher.invalidate_filter(&filter).await;
            fetcher.fetch_page(&filter, 0).await
        });

        assert_eq!(stale.unwrap().items, vec!["old".to_string()]);
        assert_eq!(fresh.unwrap().items, vec!["new".to_string()]);

        let cached = fetcher.fetch_page(&filter, 0).await.unwrap();
        assert_eq!(cached.items, vec!["new".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_walks_to_last_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = PaginatedFetcher::new(
            PaginationConfig::default(),
            cache(),
            monitor(),
            counting_source(calls.clone(), Duration::from_millis(10)),
        );
        let mut cursor = fetcher.cursor(FilterState::new("articles"));

        let mut items = Vec::new();
        while let Some(page) = cursor.fetch_next().await.unwrap() {
            items.extend(page.items);
        }

        assert_eq!(items.len(), 6);
        assert_eq!(items[5], "articles-5");
        assert_eq!(cursor.state(), &CursorState::NoMorePages);
        assert_eq!(cursor.next_page_token(), None);

        assert!(cursor.fetch_next().await.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_error_then_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = {
            let calls = calls.clone();
            move |request: PageRequest| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 1 {
                        return Err(FetchError::InvalidIdentifier("bad cursor".into()));
                    }
                    Ok(PageResult::new(
                        vec![format!("item-{}", request.page)],
                        request.page < 1,
                        None,
                    ))
                }
            }
        };
        let fetcher = PaginatedFetcher::new(PaginationConfig::default(), cache(), monitor(), source);
        let mut cursor = fetcher.cursor(FilterState::new("notifications"));

        assert!(cursor.fetch_next().await.unwrap().is_some());
        assert_eq!(cursor.state(), &CursorState::Success { page: 0 });
        assert_eq!(cursor.next_page_token(), Some(1));

        assert!(cursor.fetch_next().await.is_err());
        assert!(matches!(cursor.state(), CursorState::Error { page: 1, .. }));
        assert_eq!(cursor.next_page_token(), Some(1));

        let page = cursor.retry().await.unwrap().unwrap();
        assert_eq!(page.items, vec!["item-1".to_string()]);
        assert_eq!(cursor.state(), &CursorState::NoMorePages);
        assert!(cursor.retry().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_filter_only_touches_that_filter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = PaginatedFetcher::new(
            PaginationConfig::default(),
            cache(),
            monitor(),
            counting_source(calls.clone(), Duration::from_millis(10)),
        );
        let lyon = FilterState::new("suppliers").with("city", "Lyon");
        let paris = FilterState::new("suppliers").with("city", "Paris");

        fetcher.fetch_page(&lyon, 0).await.unwrap();
        fetcher.fetch_page(&lyon, 1).await.unwrap();
        fetcher.fetch_page(&paris, 0).await.unwrap();

        assert_eq!(fetcher.invalidate_filter(&lyon).await, 2);

        fetcher.fetch_page(&paris, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        fetcher.fetch_page(&lyon, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_bookkeeping_is_released() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = PaginatedFetcher::new(
            PaginationConfig::default(),
            cache(),
            monitor(),
            counting_source(calls.clone(), Duration::from_millis(100)),
        );
        let lyon = FilterState::new("suppliers").with("city", "Lyon");
        for page in 0..3 {
            fetcher.fetch_page(&lyon, page).await.unwrap();
        }

        // A caller that gives up leaves its fetch pending
        let by_name = lyon.clone().sorted_by("name");
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), fetcher.fetch_page(&by_name, 0)).await;
        assert!(abandoned.is_err());

        // An invalidation racing an in-flight fetch
        let articles = FilterState::new("articles");
        let (result, _) = tokio::join!(fetcher.fetch_page(&articles, 0), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fetcher.invalidate_filter(&articles).await
        });
        result.unwrap();
        assert!(!fetcher.cache().contains_key(&articles.page_key(0).to_cache_key()).await);

        fetcher.invalidate_filter(&by_name).await;

        let generations = fetcher.inner.lock_generations();
        assert!(generations.in_flight.is_empty());
        assert!(generations.written.is_empty());
        assert!(generations.barriers.is_empty());
    }
}
