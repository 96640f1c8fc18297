#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! This module provides test infrastructure that uses the REAL kernel router
//! and state, not mock implementations. Each test builds its own [`TestApp`]
//! with an in-memory user directory and a [`ManualClock`], so tests never
//! share rate-limit buckets or lockout state.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use kafkasder_kernel::clock::ManualClock;
use kafkasder_kernel::models::UserRecord;
use kafkasder_kernel::users::MemoryUserDirectory;
use kafkasder_kernel::{AppState, Config};
use kafkasder_test_utils::TestUser;

/// Test application wrapper using the REAL kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub users: Arc<MemoryUserDirectory>,
}

impl TestApp {
    /// Create a test application with the default configuration.
    pub fn new(users: &[TestUser]) -> Self {
        Self::with_config(Config::default(), users)
    }

    /// Create a test application with a custom configuration.
    pub fn with_config(config: Config, users: &[TestUser]) -> Self {
        let records = users
            .iter()
            .map(|user| {
                serde_json::from_value::<UserRecord>(user.to_record_json(&cheap_hash(&user.password)))
                    .expect("fixture user should be a valid record")
            })
            .collect();
        let users = Arc::new(MemoryUserDirectory::new(records).expect("unique fixture users"));
        let clock = Arc::new(ManualClock::default());

        let state = AppState::with_services(config, users.clone(), clock.clone());
        let router = kafkasder_kernel::app(state.clone());

        Self {
            router,
            state,
            clock,
            users,
        }
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// Send a request carrying `cookies`, then record the cookies it sets.
    pub async fn send(&self, mut request: Request<Body>, cookies: &mut Cookies) -> Response {
        if !cookies.is_empty() {
            request.headers_mut().insert(
                header::COOKIE,
                cookies.header().parse().expect("Invalid cookie header"),
            );
        }
        let response = self.request(request).await;
        cookies.absorb(&response);
        response
    }

    /// Fetch a CSRF token, storing its cookie in `cookies`.
    pub async fn csrf_token(&self, cookies: &mut Cookies) -> String {
        let response = self
            .send(Request::get("/api/csrf").body(Body::empty()).unwrap(), cookies)
            .await;
        assert!(response.status().is_success(), "csrf endpoint failed");
        let body = response_json(response).await;
        body["token"].as_str().expect("token in body").to_string()
    }

    /// POST /api/auth/login with `body`, CSRF token included.
    ///
    /// Uses `identity` as the `X-Forwarded-For` address so each test picks
    /// its own login rate-limit bucket.
    pub async fn login_with(&self, body: &Value, identity: &str, cookies: &mut Cookies) -> Response {
        let token = self.csrf_token(cookies).await;
        self.send(
            Request::post("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-csrf-token", token)
                .header("x-forwarded-for", identity)
                .body(Body::from(body.to_string()))
                .unwrap(),
            cookies,
        )
        .await
    }

    /// Log `user` in and return the cookies of the session.
    ///
    /// # Panics
    ///
    /// Panics if the login response is not 200 OK.
    pub async fn login(&self, user: &TestUser) -> Cookies {
        let mut cookies = Cookies::default();
        let response = self
            .login_with(&user.login_body(), &test_ip_for(&user.email), &mut cookies)
            .await;
        assert_eq!(
            response.status(),
            axum::http::StatusCode::OK,
            "login failed for {}",
            user.email
        );
        assert!(cookies.get("auth-session").is_some(), "no session cookie set");
        cookies
    }

    /// GET `uri` with `cookies`.
    pub async fn get(&self, uri: &str, cookies: &mut Cookies) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap(), cookies)
            .await
    }
}

/// Hash a password with minimal argon2 cost so tests stay fast.
///
/// Verification reads the cost parameters from the PHC string, so the kernel
/// accepts these hashes as-is.
pub fn cheap_hash(password: &str) -> String {
    let params = Params::new(1024, 1, 1, None).unwrap();
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

/// Derive a stable fake client address from a name.
pub fn test_ip_for(name: &str) -> String {
    let sum: u32 = name.bytes().map(u32::from).sum();
    format!("10.{}.{}.{}", (sum >> 16) & 0xff, (sum >> 8) & 0xff, sum & 0xff)
}

/// A minimal browser cookie store.
#[derive(Debug, Default, Clone)]
pub struct Cookies(BTreeMap<String, String>);

impl Cookies {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) {
        self.0.remove(name);
    }

    /// `Cookie` request header value.
    pub fn header(&self) -> String {
        self.0
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Apply every `Set-Cookie` of `response`. Cleared cookies are removed.
    pub fn absorb(&mut self, response: &Response) {
        for set_cookie in set_cookies(response) {
            let Some((name, value)) = set_cookie
                .split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
            else {
                continue;
            };
            if value.is_empty() || set_cookie.contains("Max-Age=0") {
                self.remove(name.trim());
            } else {
                self.set(name.trim(), value.trim());
            }
        }
    }
}

/// All `Set-Cookie` header values of a response.
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// The `Set-Cookie` header for cookie `name`, if the response sets it.
pub fn set_cookie_for(response: &Response, name: &str) -> Option<String> {
    set_cookies(response)
        .into_iter()
        .find(|c| c.starts_with(&format!("{name}=")))
}

pub async fn response_json(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap_or_else(|_| {
        let text = String::from_utf8_lossy(&body);
        panic!("Failed to parse JSON: {text}");
    })
}

pub async fn response_text(response: Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&body).to_string()
}
