//! Rate limiting with fixed-window counters.
//!
//! Each (route class, client identity) pair gets a counter that resets when
//! its window elapses. Windows are fixed, not sliding: a burst straddling a
//! window boundary can admit up to twice the nominal limit.
//!
//! Counters live in a [`RateLimitStore`]. The in-memory store keeps limits
//! per instance; the Redis store shares them across instances.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::AppError;

/// Route classes with separate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    ReadOnly,
    Mutation,
    Login,
    Upload,
    Search,
}

impl RateClass {
    pub const ALL: [RateClass; 5] = [
        RateClass::ReadOnly,
        RateClass::Mutation,
        RateClass::Login,
        RateClass::Upload,
        RateClass::Search,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RateClass::ReadOnly => "read_only",
            RateClass::Mutation => "mutation",
            RateClass::Login => "login",
            RateClass::Upload => "upload",
            RateClass::Search => "search",
        }
    }
}

/// Rate limit configuration for different route classes.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// GET/HEAD API calls: (max requests, window duration)
    pub read_only: (u32, Duration),
    /// POST/PUT/PATCH/DELETE API calls
    pub mutation: (u32, Duration),
    /// Login attempts
    pub login: (u32, Duration),
    /// File uploads
    pub upload: (u32, Duration),
    /// Search queries
    pub search: (u32, Duration),
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_only: (200, Duration::from_secs(60)), // 200 per minute
            mutation: (50, Duration::from_secs(60)),   // 50 per minute
            login: (10, Duration::from_secs(900)),     // 10 per 15 minutes
            upload: (10, Duration::from_secs(60)),     // 10 per minute
            search: (60, Duration::from_secs(60)),     // 60 per minute
        }
    }
}

impl RateLimitConfig {
    /// Get the limit for a class.
    pub fn get(&self, class: RateClass) -> (u32, Duration) {
        match class {
            RateClass::ReadOnly => self.read_only,
            RateClass::Mutation => self.mutation,
            RateClass::Login => self.login,
            RateClass::Upload => self.upload,
            RateClass::Search => self.search,
        }
    }

    /// Override the limit for a class.
    pub fn set(&mut self, class: RateClass, limit: (u32, Duration)) {
        match class {
            RateClass::ReadOnly => self.read_only = limit,
            RateClass::Mutation => self.mutation = limit,
            RateClass::Login => self.login = limit,
            RateClass::Upload => self.upload = limit,
            RateClass::Search => self.search = limit,
        }
    }
}

/// Counter state after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the current window closes.
    pub reset_after: Duration,
}

/// Outcome of an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets.
    pub reset_after: u64,
}

/// Backing storage for window counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync + Debug {
    /// Atomically increment the counter for `key`, opening a new window of
    /// length `window` if none is active at `now`.
    async fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>)
    -> Result<WindowCount>;

    /// Drop the counter for `key`.
    async fn reset(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    window_start: DateTime<Utc>,
    window: Duration,
}

impl Bucket {
    fn window_end(&self) -> DateTime<Utc> {
        self.window_start + chrono_duration(self.window)
    }
}

/// In-process counter store.
///
/// Every key is updated under its DashMap shard lock, so concurrent requests
/// from the same identity never undercount.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    buckets: DashMap<String, Bucket>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove buckets whose window has closed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| now < bucket.window_end());
        before.saturating_sub(self.buckets.len())
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Periodically purge expired buckets until the handle is aborted.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        clock: Arc<dyn Clock>,
        every: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let purged = self.purge_expired(clock.now());
                if purged > 0 {
                    debug!(purged, remaining = self.len(), "purged expired rate limit buckets");
                }
            }
        })
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount> {
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
            window,
        });

        if now >= bucket.window_end() {
            bucket.count = 0;
            bucket.window_start = now;
            bucket.window = window;
        }

        bucket.count += 1;

        let reset_after = (bucket.window_end() - now).to_std().unwrap_or_default();
        Ok(WindowCount {
            count: bucket.count,
            reset_after,
        })
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.buckets.remove(key);
        Ok(())
    }
}

/// Counter store in Redis, shared by every instance.
///
/// Windows are timed by Redis key expiry, not by the local clock.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    redis: RedisClient,
}

impl RedisRateLimitStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    /// Connect to `url` and verify the server answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let redis = RedisClient::open(url).context("failed to create Redis client")?;
        let mut conn = redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to Redis")?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(Self::new(redis))
    }
}

impl Debug for RedisRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimitStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    /// Uses a Lua script to atomically INCR + PEXPIRE, preventing a race
    /// where a crash between the two commands creates an immortal counter.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        _now: DateTime<Utc>,
    ) -> Result<WindowCount> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let script = redis::Script::new(
            r"local count = redis.call('INCR', KEYS[1])
              if count == 1 then
                redis.call('PEXPIRE', KEYS[1], ARGV[1])
              end
              return {count, redis.call('PTTL', KEYS[1])}",
        );

        let window_ms = window.as_millis() as i64;
        let (count, ttl_ms): (i64, i64) = script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        let ttl_ms = if ttl_ms > 0 { ttl_ms } else { window_ms };
        Ok(WindowCount {
            count: count.max(0) as u64,
            reset_after: Duration::from_millis(ttl_ms as u64),
        })
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Rate limiter over a pluggable counter store.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Check and consume one request for `identifier` in `class`.
    ///
    /// Returns the decision if allowed, Err with retry-after seconds if limited.
    pub async fn check(&self, class: RateClass, identifier: &str) -> Result<RateDecision, u64> {
        let (limit, window) = self.config.get(class);
        let key = bucket_key(class, identifier);

        let counted = match self.store.increment(&key, window, self.clock.now()).await {
            Ok(c) => c,
            Err(e) => {
                // If the store fails, allow the request (fail open)
                warn!(error = %e, "rate limit check failed, allowing request");
                return Ok(RateDecision {
                    limit,
                    remaining: limit,
                    reset_after: window.as_secs(),
                });
            }
        };

        let reset_after = ceil_secs(counted.reset_after);

        if counted.count > u64::from(limit) {
            debug!(
                class = class.as_str(),
                identifier = identifier,
                count = counted.count,
                limit = limit,
                "rate limit exceeded"
            );
            Err(reset_after.max(1))
        } else {
            let remaining = u64::from(limit) - counted.count;
            Ok(RateDecision {
                limit,
                remaining: remaining as u32,
                reset_after,
            })
        }
    }

    /// Reset the counter for a key (for testing and admin tooling).
    pub async fn reset(&self, class: RateClass, identifier: &str) -> Result<()> {
        self.store.reset(&bucket_key(class, identifier)).await
    }

    /// Configured limit for a class.
    pub fn limit_for(&self, class: RateClass) -> (u32, Duration) {
        self.config.get(class)
    }
}

fn bucket_key(class: RateClass, identifier: &str) -> String {
    format!("rate:{}:{identifier}", class.as_str())
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}

/// Categorize a request for rate limiting.
pub fn categorize(method: &Method, path: &str) -> RateClass {
    let mutating = method != Method::GET && method != Method::HEAD && method != Method::OPTIONS;

    if path.starts_with("/api/auth/login") && method == Method::POST {
        RateClass::Login
    } else if mutating && (path.starts_with("/api/upload") || path.ends_with("/upload")) {
        RateClass::Upload
    } else if path.starts_with("/api/search") {
        RateClass::Search
    } else if mutating {
        RateClass::Mutation
    } else {
        RateClass::ReadOnly
    }
}

/// Get the client identifier (IP address) for rate limiting.
pub fn client_identity(addr: Option<std::net::SocketAddr>, headers: &HeaderMap) -> String {
    // Check X-Forwarded-For header first (for proxied requests)
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
    {
        // Take the first IP in the chain
        if let Some(ip) = value.split(',').next().map(str::trim)
            && !ip.is_empty()
        {
            return ip.to_string();
        }
    }

    // Check X-Real-IP header
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        return value.trim().to_string();
    }

    // Fall back to connection address
    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limit exceeded response.
pub fn rate_limit_response(retry_after: u64) -> Response {
    AppError::RateLimited { retry_after }.into_response()
}

/// Add `x-ratelimit-*` headers describing an admitted request.
pub fn apply_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_after));
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32, window_secs: u64) -> (RateLimiter, Arc<ManualClock>, Arc<MemoryRateLimitStore>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryRateLimitStore::new());
        let mut config = RateLimitConfig::default();
        config.set(RateClass::Mutation, (limit, Duration::from_secs(window_secs)));
        let limiter = RateLimiter::new(store.clone(), config, clock.clone());
        (limiter, clock, store)
    }

    #[test]
    fn test_categorize() {
        assert_eq!(categorize(&Method::POST, "/api/auth/login"), RateClass::Login);
        assert_eq!(categorize(&Method::GET, "/api/auth/login"), RateClass::ReadOnly);
        assert_eq!(categorize(&Method::POST, "/api/upload"), RateClass::Upload);
        assert_eq!(categorize(&Method::POST, "/api/documents/upload"), RateClass::Upload);
        assert_eq!(categorize(&Method::GET, "/api/search"), RateClass::Search);
        assert_eq!(categorize(&Method::DELETE, "/api/tasks/1"), RateClass::Mutation);
        assert_eq!(categorize(&Method::GET, "/api/tasks"), RateClass::ReadOnly);
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert!(config.read_only.0 > config.mutation.0);
        assert_eq!(config.get(RateClass::Login).0, 10);
    }

    #[tokio::test]
    async fn denies_after_limit_within_window() {
        let (limiter, _, _) = limiter(3, 60);
        for remaining in [2, 1, 0] {
            let decision = limiter.check(RateClass::Mutation, "10.0.0.1").await.unwrap();
            assert_eq!(decision.remaining, remaining);
        }
        let retry_after = limiter.check(RateClass::Mutation, "10.0.0.1").await.unwrap_err();
        assert!(retry_after > 0 && retry_after <= 60);
    }

    #[tokio::test]
    async fn window_elapsing_resets_count() {
        let (limiter, clock, _) = limiter(2, 60);
        limiter.check(RateClass::Mutation, "ip").await.unwrap();
        limiter.check(RateClass::Mutation, "ip").await.unwrap();
        assert!(limiter.check(RateClass::Mutation, "ip").await.is_err());

        clock.advance(chrono::Duration::seconds(60));
        let decision = limiter.check(RateClass::Mutation, "ip").await.unwrap();
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn boundary_burst_admits_twice_the_limit() {
        let (limiter, clock, _) = limiter(5, 60);
        let mut admitted = 0;

        // One request opens the window at t=0, four more land at t=59.
        limiter.check(RateClass::Mutation, "burst").await.unwrap();
        admitted += 1;
        clock.advance(chrono::Duration::seconds(59));
        for _ in 0..4 {
            limiter.check(RateClass::Mutation, "burst").await.unwrap();
            admitted += 1;
        }

        // At t=60 a fresh window opens and five more are admitted.
        clock.advance(chrono::Duration::seconds(1));
        for _ in 0..5 {
            limiter.check(RateClass::Mutation, "burst").await.unwrap();
            admitted += 1;
        }
        assert!(limiter.check(RateClass::Mutation, "burst").await.is_err());

        // Nine of those ten landed within a single second.
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn identities_and_classes_are_independent() {
        let (limiter, _, _) = limiter(1, 60);
        limiter.check(RateClass::Mutation, "a").await.unwrap();
        assert!(limiter.check(RateClass::Mutation, "a").await.is_err());
        assert!(limiter.check(RateClass::Mutation, "b").await.is_ok());
        assert!(limiter.check(RateClass::ReadOnly, "a").await.is_ok());
    }

    #[tokio::test]
    async fn reset_clears_counter() {
        let (limiter, _, _) = limiter(1, 60);
        limiter.check(RateClass::Mutation, "a").await.unwrap();
        limiter.reset(RateClass::Mutation, "a").await.unwrap();
        assert!(limiter.check(RateClass::Mutation, "a").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_do_not_undercount() {
        let (limiter, _, _) = limiter(50, 60);
        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check(RateClass::Mutation, "shared").await.is_ok()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }

    #[tokio::test]
    async fn purge_drops_closed_windows() {
        let (limiter, clock, store) = limiter(5, 60);
        limiter.check(RateClass::Mutation, "a").await.unwrap();
        limiter.check(RateClass::ReadOnly, "a").await.unwrap();
        assert_eq!(store.len(), 2);

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(store.purge_expired(clock.now()), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn client_identity_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(client_identity(None, &headers), "1.2.3.4");

        headers.remove("x-forwarded-for");
        assert_eq!(client_identity(None, &headers), "5.6.7.8");

        let addr: std::net::SocketAddr = "9.9.9.9:443".parse().unwrap();
        assert_eq!(client_identity(Some(addr), &HeaderMap::new()), "9.9.9.9");
        assert_eq!(client_identity(None, &HeaderMap::new()), "unknown");
    }

    #[test]
    fn rate_limit_response_is_429() {
        let response = rate_limit_response(30);
        assert_eq!(response.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "30");
    }

    #[derive(Debug)]
    struct UnavailableStore;

    #[async_trait]
    impl RateLimitStore for UnavailableStore {
        async fn increment(&self, _: &str, _: Duration, _: DateTime<Utc>) -> Result<WindowCount> {
            anyhow::bail!("connection refused")
        }

        async fn reset(&self, _: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn store_failure_allows_request() {
        let limiter = RateLimiter::new(
            Arc::new(UnavailableStore),
            RateLimitConfig::default(),
            Arc::new(ManualClock::default()),
        );
        let (limit, _) = limiter.limit_for(RateClass::Login);
        for _ in 0..=limit {
            let decision = limiter.check(RateClass::Login, "ip").await.unwrap();
            assert_eq!(decision.remaining, limit);
        }
        assert!(limiter.reset(RateClass::Login, "ip").await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server at REDIS_URL"]
    async fn redis_store_counts_expires_and_resets() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        let store = RedisRateLimitStore::connect(&url).await.unwrap();
        let key = format!("rate:test:{:016x}", rand::random::<u64>());
        let window = Duration::from_secs(60);

        let first = store.increment(&key, window, Utc::now()).await.unwrap();
        assert_eq!(first.count, 1);
        assert!(first.reset_after > Duration::ZERO && first.reset_after <= window);

        let second = store.increment(&key, window, Utc::now()).await.unwrap();
        assert_eq!(second.count, 2);
        assert!(second.reset_after <= first.reset_after);

        store.reset(&key).await.unwrap();
        let after_reset = store.increment(&key, window, Utc::now()).await.unwrap();
        assert_eq!(after_reset.count, 1);

        store.reset(&key).await.unwrap();
    }
}
