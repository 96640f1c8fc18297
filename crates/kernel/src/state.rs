//! Application state shared across all handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::AuthGate;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, Environment};
use crate::lockout::LockoutService;
use crate::middleware::rate_limit::{
    MemoryRateLimitStore, RateLimitStore, RateLimiter, RedisRateLimitStore,
};
use crate::session::SessionCodec;
use crate::users::{MemoryUserDirectory, UserDirectory};

/// How often expired rate-limit buckets and lockout entries are purged.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,

    /// Signs and verifies session cookies.
    codec: SessionCodec,

    /// Session to user resolution and module checks.
    auth: AuthGate,

    users: Arc<dyn UserDirectory>,

    rate_limiter: RateLimiter,

    /// Set when counters live in process memory, so they can be swept.
    memory_store: Option<Arc<MemoryRateLimitStore>>,

    /// Account lockout service.
    lockout: LockoutService,

    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Loads the user directory from `USERS_FILE` and connects to Redis when
    /// `REDIS_URL` is set.
    pub async fn new(config: &Config) -> Result<Self> {
        let users = MemoryUserDirectory::load(&config.users_file)
            .context("failed to load user directory")?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn RateLimitStore>;
        let mut memory_store = None;
        match &config.redis_url {
            Some(url) => {
                let redis = RedisRateLimitStore::connect(url)
                    .await
                    .context("failed to connect to Redis")?;
                info!("rate limit counters stored in Redis");
                store = Arc::new(redis);
            }
            None => {
                info!("rate limit counters kept in memory; limits apply per instance");
                let memory = Arc::new(MemoryRateLimitStore::new());
                store = memory.clone();
                memory_store = Some(memory);
            }
        }

        Ok(Self::build(
            config.clone(),
            Arc::new(users),
            clock,
            store,
            memory_store,
        ))
    }

    /// Create state over the given services with in-memory rate limiting.
    pub fn with_services(
        config: Config,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let memory = Arc::new(MemoryRateLimitStore::new());
        Self::build(config, users, clock, memory.clone(), Some(memory))
    }

    fn build(
        config: Config,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn RateLimitStore>,
        memory_store: Option<Arc<MemoryRateLimitStore>>,
    ) -> Self {
        let codec = SessionCodec::new(config.session_secret.clone());
        let auth = AuthGate::new(codec.clone(), users.clone(), clock.clone());
        let rate_limiter = RateLimiter::new(store, config.rate_limits.clone(), clock.clone());
        let lockout = LockoutService::new(clock.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                codec,
                auth,
                users,
                rate_limiter,
                memory_store,
                lockout,
                clock,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn environment(&self) -> Environment {
        self.inner.config.environment
    }

    /// Whether cookies must carry the `Secure` flag.
    pub fn secure_cookies(&self) -> bool {
        self.inner.config.secure_cookies()
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.inner.codec
    }

    pub fn auth(&self) -> &AuthGate {
        &self.inner.auth
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.inner.users
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    /// Get the lockout service.
    pub fn lockout(&self) -> &LockoutService {
        &self.inner.lockout
    }

    /// Current time according to the state's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Check if the user directory is reachable.
    pub async fn users_healthy(&self) -> Result<usize> {
        self.inner.users.count().await
    }

    /// Start the periodic sweeps of in-memory rate-limit and lockout state.
    pub fn spawn_maintenance(&self) -> Maintenance {
        let mut handles = Vec::new();

        if let Some(store) = &self.inner.memory_store {
            handles.push(
                store
                    .clone()
                    .spawn_sweeper(self.inner.clock.clone(), MAINTENANCE_INTERVAL),
            );
        }

        let lockout = self.inner.lockout.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                lockout.purge_expired();
                debug!(tracked = lockout.len(), "purged expired lockout entries");
            }
        }));

        Maintenance { handles }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("environment", &self.inner.config.environment)
            .field("rate_limiter", &self.inner.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Background maintenance tasks started by [`AppState::spawn_maintenance`].
#[derive(Debug)]
pub struct Maintenance {
    handles: Vec<JoinHandle<()>>,
}

impl Maintenance {
    /// Stop all tasks.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}
