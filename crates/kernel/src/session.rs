//! Signed session cookies.
//!
//! A session is `{userId, expire}` serialized as JSON and signed with
//! HMAC-SHA256. The cookie value is `base64url(json).base64url(tag)`. A value
//! that fails to decode, fails verification, or has expired is treated as no
//! session at all.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie holding the signed session.
pub const SESSION_COOKIE: &str = "auth-session";

/// Default session expiry (24 hours).
pub const DEFAULT_SESSION_EXPIRY_HOURS: i64 = 24;

/// Minimum accepted length of a configured session secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub expire: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, expire: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            expire,
        }
    }

    /// A fresh session for `user_id` lasting the default expiry from `now`.
    pub fn starting_at(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(user_id, now + Duration::hours(DEFAULT_SESSION_EXPIRY_HOURS))
    }

    /// True once `now` has reached `expire`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire
    }
}

/// Key material for session signatures.
#[derive(Clone)]
pub struct SessionSecret(Arc<[u8]>);

impl SessionSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }

    /// A random 32-byte key, valid only for the lifetime of this process.
    pub fn generate() -> Self {
        let mut bytes = [0u8; MIN_SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes.to_vec())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret([redacted])")
    }
}

/// Encodes, signs and verifies session cookie values.
#[derive(Clone, Debug)]
pub struct SessionCodec {
    secret: SessionSecret,
}

impl SessionCodec {
    pub fn new(secret: SessionSecret) -> Self {
        Self { secret }
    }

    /// Serialize and sign a session into a cookie value.
    pub fn serialize(&self, session: &Session) -> Result<String> {
        let json = serde_json::to_vec(session).context("failed to encode session")?;
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{tag}"))
    }

    /// Decode a cookie value.
    ///
    /// Returns `None` on any malformed, unsigned or tampered input. Expiry is
    /// not checked here.
    pub fn parse(&self, value: &str) -> Option<Session> {
        let (payload, tag) = value.split_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;

        let mut mac = self.mac().ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag).ok()?;

        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let session: Session = serde_json::from_slice(&json).ok()?;
        if session.user_id.is_empty() {
            return None;
        }
        Some(session)
    }

    /// The unexpired session carried by the request cookies, if any.
    pub fn current_session(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Option<Session> {
        let jar = CookieJar::from_headers(headers);
        let session = self.parse(jar.get(SESSION_COOKIE)?.value())?;
        (!session.is_expired(now)).then_some(session)
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes()).context("invalid session secret")
    }
}

/// `auth-session` cookie carrying `value`.
pub fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::hours(DEFAULT_SESSION_EXPIRY_HOURS))
        .build()
}

/// An empty, immediately expiring `auth-session` cookie.
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}
