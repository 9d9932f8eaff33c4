//! Query performance monitoring
//!
//! This module provides:
//! - A bounded ring buffer of [`QueryMetric`]s, pruned by age on an interval
//! - Slow and critical query classification with log output
//! - A retry wrapper for fetch functions that records one metric per call
//! - On-demand aggregate reports and a health status derived from them

use crate::cache::config::env_parse;
use crate::error::{CacheError, FetchError, Result};
use crate::task::BackgroundTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Linear backoff retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before retry `n` is `n * backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Configuration for the performance monitor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Maximum number of metrics kept; the oldest are dropped first
    pub capacity: usize,

    /// Metrics older than this are pruned
    pub max_age: Duration,

    /// Enable the periodic age pruning task
    pub enable_auto_prune: bool,

    /// Interval of the pruning task
    pub prune_interval: Duration,

    /// Queries slower than this are slow
    pub slow_threshold: Duration,

    /// Queries slower than this are critical (and still slow)
    pub critical_threshold: Duration,

    /// Error rate (percent) from which health is degraded
    pub degraded_error_rate: f64,

    /// Error rate (percent) from which health is unhealthy
    pub unhealthy_error_rate: f64,

    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_age: Duration::from_secs(3600),
            enable_auto_prune: true,
            prune_interval: Duration::from_secs(30),
            slow_threshold: Duration::from_millis(1000),
            critical_threshold: Duration::from_millis(3000),
            degraded_error_rate: 10.0,
            unhealthy_error_rate: 50.0,
            retry: RetryPolicy::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::ConfigError(
                "capacity must be greater than 0".to_string(),
            ));
        }

        if self.critical_threshold < self.slow_threshold {
            return Err(CacheError::ConfigError(
                "critical_threshold must not be below slow_threshold".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(CacheError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.prune_interval.is_zero() {
            return Err(CacheError::ConfigError(
                "prune_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from `QUERY_CACHE_*` environment variables
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Some(capacity) = env_parse::<usize>("QUERY_CACHE_MONITOR_CAPACITY")? {
            config.capacity = capacity;
        }
        if let Some(secs) = env_parse::<u64>("QUERY_CACHE_MONITOR_MAX_AGE_SECS")? {
            config.max_age = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("QUERY_CACHE_SLOW_QUERY_MS")? {
            config.slow_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("QUERY_CACHE_CRITICAL_QUERY_MS")? {
            config.critical_threshold = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse::<u32>("QUERY_CACHE_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = env_parse::<u64>("QUERY_CACHE_RETRY_BACKOFF_MS")? {
            config.retry.backoff_step = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

/// One completed fetch, successful or not
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetric {
    pub id: Uuid,
    pub key: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
    pub error: Option<String>,
    pub retries: u32,
    #[serde(skip)]
    recorded_at: Instant,
}

impl QueryMetric {
    pub fn new(key: impl Into<String>, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
            cached: false,
            error: None,
            retries: 0,
            recorded_at: Instant::now(),
        }
    }

    /// Mark as served from cache
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn age(&self) -> Duration {
        self.recorded_at.elapsed()
    }
}

/// Latency class of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Slow,
    Critical,
}

/// Health status derived from recent queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Queries are fast and mostly succeed
    Healthy,
    /// Queries are slow on average or fail noticeably often
    Degraded,
    /// Most queries fail or average latency is critical
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Call count for one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFrequency {
    pub key: String,
    pub count: usize,
    pub average_ms: f64,
}

/// Aggregates over the metrics currently buffered
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub total_queries: usize,
    pub average_response_time_ms: f64,
    /// Percentage of queries that failed
    pub error_rate: f64,
    /// Percentage of queries served from cache
    pub cache_hit_rate: f64,
    pub slow_query_count: usize,
    pub critical_query_count: usize,
    /// Most frequent keys first
    pub top_queries: Vec<QueryFrequency>,
    /// Slow queries, longest first
    pub slow_queries: Vec<QueryMetric>,
    /// Failed queries, most recent first
    pub error_queries: Vec<QueryMetric>,
    pub status: HealthStatus,
}

impl PerformanceReport {
    fn percentage(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            part as f64 * 100.0 / total as f64
        }
    }
}

impl std::fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} queries, avg {:.1}ms, {:.1}% errors, {:.1}% cached, {} slow ({} critical), {}",
            self.total_queries,
            self.average_response_time_ms,
            self.error_rate,
            self.cache_hit_rate,
            self.slow_query_count,
            self.critical_query_count,
            self.status
        )
    }
}

fn prune_buffer(buffer: &mut VecDeque<QueryMetric>, max_age: Duration) -> usize {
    let mut pruned = 0;
    while buffer.front().is_some_and(|metric| metric.age() > max_age) {
        buffer.pop_front();
        pruned += 1;
    }
    pruned
}

/// Ring buffer of query metrics with a retry-aware fetch wrapper
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    buffer: Arc<RwLock<VecDeque<QueryMetric>>>,
    pruner: Mutex<Option<BackgroundTask>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        info!("Initializing performance monitor with config: {:?}", config);

        let buffer = Arc::new(RwLock::new(VecDeque::with_capacity(config.capacity)));

        let pruner = if config.enable_auto_prune {
            let max_age = config.max_age;
            BackgroundTask::spawn_periodic(
                "metric prune",
                config.prune_interval,
                Arc::downgrade(&buffer),
                move |buffer: Arc<RwLock<VecDeque<QueryMetric>>>| async move {
                    let pruned = prune_buffer(&mut *buffer.write().await, max_age);
                    if pruned > 0 {
                        debug!("Pruned {} metrics older than {:?}", pruned, max_age);
                    }
                },
            )
        } else {
            None
        };

        Self {
            config,
            buffer,
            pruner: Mutex::new(pruner),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Latency class for a duration
    pub fn classify(&self, duration: Duration) -> Severity {
        if duration > self.config.critical_threshold {
            Severity::Critical
        } else if duration > self.config.slow_threshold {
            Severity::Slow
        } else {
            Severity::Normal
        }
    }

    fn is_slow(&self, metric: &QueryMetric) -> bool {
        self.classify(Duration::from_millis(metric.duration_ms)) != Severity::Normal
    }

    /// Append a metric, dropping the oldest once the buffer is full
    pub async fn record(&self, metric: QueryMetric) {
        match self.classify(Duration::from_millis(metric.duration_ms)) {
            Severity::Critical => error!(
                "Critical query: {} took {}ms ({} retries)",
                metric.key, metric.duration_ms, metric.retries
            ),
            Severity::Slow => warn!(
                "Slow query: {} took {}ms ({} retries)",
                metric.key, metric.duration_ms, metric.retries
            ),
            Severity::Normal => debug!("Query {} took {}ms", metric.key, metric.duration_ms),
        }

        let mut buffer = self.buffer.write().await;
        while buffer.len() >= self.config.capacity {
            buffer.pop_front();
        }
        buffer.push_back(metric);
    }

    /// Record a request answered from cache without a fetch
    pub async fn record_cache_hit(&self, key: &str) {
        self.record(QueryMetric::new(key, Duration::ZERO).cached()).await
    }

    /// Run `fetch` with linear backoff retries and record one metric
    ///
    /// Non-retryable errors are returned after the first attempt. The metric
    /// carries the total elapsed time including backoff and the number of
    /// retries actually used.
    pub async fn with_retry<T, F, Fut>(
        &self,
        key: &str,
        mut fetch: F,
    ) -> std::result::Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchError>>,
    {
        let start = Instant::now();
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match fetch().await {
                Ok(value) => {
                    self.record(QueryMetric::new(key, start.elapsed()).with_retries(attempt - 1))
                        .await;
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                    if e.is_retryable() {
                        error!("Fetch {} failed after {} attempts: {}", key, attempt, e);
                    } else {
                        warn!("Fetch {} failed with non-retryable error: {}", key, e);
                    }
                    self.record(
                        QueryMetric::new(key, start.elapsed())
                            .failed(e.to_string())
                            .with_retries(attempt - 1),
                    )
                    .await;
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.config.retry.backoff(attempt);
                    warn!(
                        "Fetch {} failed (attempt {}/{}), retrying after {:?}: {}",
                        key, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Drop metrics older than `max_age` now
    pub async fn prune(&self) -> usize {
        prune_buffer(&mut *self.buffer.write().await, self.config.max_age)
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn slow_query_count(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.iter().filter(|metric| self.is_slow(metric)).count()
    }

    /// Aggregate the buffered metrics; lists are cut to `top_n`
    pub async fn report(&self, top_n: usize) -> PerformanceReport {
        let buffer = self.buffer.read().await;
        let total = buffer.len();

        let total_ms: u64 = buffer.iter().map(|m| m.duration_ms).sum();
        let average = if total == 0 {
            0.0
        } else {
            total_ms as f64 / total as f64
        };

        let errors = buffer.iter().filter(|m| m.is_error()).count();
        let cached = buffer.iter().filter(|m| m.cached).count();
        let critical = buffer
            .iter()
            .filter(|m| {
                self.classify(Duration::from_millis(m.duration_ms)) == Severity::Critical
            })
            .count();

        let mut frequencies: HashMap<&str, (usize, u64)> = HashMap::new();
        for metric in buffer.iter() {
            let slot = frequencies.entry(metric.key.as_str()).or_default();
            slot.0 += 1;
            slot.1 += metric.duration_ms;
        }
        let mut top_queries: Vec<QueryFrequency> = frequencies
            .into_iter()
            .map(|(key, (count, total_ms))| QueryFrequency {
                key: key.to_string(),
                count,
                average_ms: total_ms as f64 / count as f64,
            })
            .collect();
        top_queries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        top_queries.truncate(top_n);

        let mut slow_queries: Vec<QueryMetric> =
            buffer.iter().filter(|m| self.is_slow(m)).cloned().collect();
        let slow_count = slow_queries.len();
        slow_queries.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        slow_queries.truncate(top_n);

        let error_queries: Vec<QueryMetric> = buffer
            .iter()
            .rev()
            .filter(|m| m.is_error())
            .take(top_n)
            .cloned()
            .collect();

        let error_rate = PerformanceReport::percentage(errors, total);
        let status = self.status_for(total, average, error_rate);

        PerformanceReport {
            generated_at: Utc::now(),
            total_queries: total,
            average_response_time_ms: average,
            error_rate,
            cache_hit_rate: PerformanceReport::percentage(cached, total),
            slow_query_count: slow_count,
            critical_query_count: critical,
            top_queries,
            slow_queries,
            error_queries,
            status,
        }
    }

    fn status_for(&self, total: usize, average_ms: f64, error_rate: f64) -> HealthStatus {
        if total == 0 {
            return HealthStatus::Healthy;
        }

        let slow_ms = self.config.slow_threshold.as_millis() as f64;
        let critical_ms = self.config.critical_threshold.as_millis() as f64;

        if error_rate >= self.config.unhealthy_error_rate || average_ms > critical_ms {
            HealthStatus::Unhealthy
        } else if error_rate >= self.config.degraded_error_rate || average_ms > slow_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Health status over the buffered metrics
    pub async fn health(&self) -> HealthStatus {
        self.report(0).await.status
    }

    /// Drop all buffered metrics
    pub async fn clear(&self) {
        let mut buffer = self.buffer.write().await;
        let count = buffer.len();
        buffer.clear();
        info!("Cleared {} query metrics", count);
    }

    pub fn is_pruning(&self) -> bool {
        self.pruner
            .lock()
            .map(|pruner| pruner.as_ref().is_some_and(BackgroundTask::is_running))
            .unwrap_or(false)
    }

    /// Stop the pruning task
    pub fn shutdown(&self) {
        match self.pruner.lock() {
            Ok(mut pruner) => {
                if let Some(mut task) = pruner.take() {
                    task.stop();
                }
            }
            Err(e) => warn!("Monitor pruner lock poisoned: {}", e),
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
