//! HTTP middleware components.
//!
//! Provides rate limiting and the edge route guard.

pub mod rate_limit;
pub mod route_guard;

pub use rate_limit::{RateClass, RateLimitConfig, RateLimiter, categorize, client_identity};
pub use route_guard::{guard_routes, is_public_path};
