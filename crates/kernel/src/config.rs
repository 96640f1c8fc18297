//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::middleware::rate_limit::{RateClass, RateLimitConfig};
use crate::session::{MIN_SECRET_LEN, SessionSecret};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    /// Whether the service runs in production.
    ///
    /// Production turns on `Secure` cookies and hides error details.
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" | "test" => Ok(Environment::Development),
            other => bail!("APP_ENV must be 'production' or 'development', got '{other}'"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// Deployment environment (default: development).
    pub environment: Environment,

    /// HMAC key for session cookies.
    pub session_secret: SessionSecret,

    /// TOML file with the user directory (default: ./users.toml).
    pub users_file: PathBuf,

    /// Pre-built UI bundle served behind the route guard (default: ./static).
    pub static_dir: PathBuf,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,

    /// Redis URL for shared rate-limit counters. When None, counters are
    /// kept in process memory and limits apply per instance.
    pub redis_url: Option<String>,

    /// Accept the CSRF cookie as the submitted token when the header is absent.
    pub csrf_cookie_fallback: bool,

    /// Per-class rate limits.
    pub rate_limits: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            environment: Environment::Development,
            session_secret: SessionSecret::generate(),
            users_file: PathBuf::from("./users.toml"),
            static_dir: PathBuf::from("./static"),
            cors_allowed_origins: vec!["*".to_string()],
            redis_url: None,
            csrf_cookie_fallback: true,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let environment = match env::var("APP_ENV") {
            Ok(v) => Environment::parse(&v)?,
            Err(_) => Environment::Development,
        };

        let session_secret = match env::var("SESSION_SECRET") {
            Ok(v) if v.len() >= MIN_SECRET_LEN => SessionSecret::new(v.into_bytes()),
            Ok(_) if environment.is_production() => {
                bail!("SESSION_SECRET must be at least {MIN_SECRET_LEN} bytes in production")
            }
            Err(_) if environment.is_production() => {
                bail!("SESSION_SECRET environment variable is required in production")
            }
            _ => {
                warn!("SESSION_SECRET missing or too short; using a random per-process key");
                SessionSecret::generate()
            }
        };

        let users_file = env::var("USERS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./users.toml"));

        let static_dir = env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./static"));

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let csrf_cookie_fallback = match env::var("CSRF_COOKIE_FALLBACK") {
            Ok(v) => parse_bool(&v).context("CSRF_COOKIE_FALLBACK must be true or false")?,
            Err(_) => true,
        };

        let mut rate_limits = RateLimitConfig::default();
        for class in RateClass::ALL {
            let var = format!("RATE_LIMIT_{}", class.as_str().to_uppercase());
            if let Ok(value) = env::var(&var) {
                let limit = parse_limit(&value).with_context(|| format!("{var} is invalid"))?;
                rate_limits.set(class, limit);
            }
        }

        Ok(Self {
            port,
            environment,
            session_secret,
            users_file,
            static_dir,
            cors_allowed_origins,
            redis_url,
            csrf_cookie_fallback,
            rate_limits,
        })
    }

    /// Whether cookies must carry the `Secure` flag.
    pub fn secure_cookies(&self) -> bool {
        self.environment.is_production()
    }
}

/// Parse a `"<max>/<seconds>"` rate limit.
fn parse_limit(value: &str) -> Result<(u32, Duration)> {
    let Some((max, secs)) = value.split_once('/') else {
        bail!("expected '<max>/<seconds>', got '{value}'");
    };
    let max: u32 = max.trim().parse().context("max must be a number")?;
    let secs: u64 = secs.trim().parse().context("seconds must be a number")?;
    if max == 0 || secs == 0 {
        bail!("max and seconds must both be positive");
    }
    Ok((max, Duration::from_secs(secs)))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: '{other}'"),
    }
}
