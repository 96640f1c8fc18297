//! KafkasDer Panel Kernel Library
//!
//! The request-gating pipeline of the KafkasDer panel: session codec, CSRF
//! tokens, rate limiting, the auth gate and the route guard.
//! The main entry point for running the server is the `kafkasder` binary.

pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod csrf;
pub mod error;
pub mod gate;
pub mod lockout;
pub mod middleware;
pub mod models;
pub mod permissions;
pub mod routes;
pub mod session;
pub mod state;
pub mod users;

pub use config::Config;
pub use routes::app;
pub use state::AppState;
