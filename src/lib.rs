//! SPV Distributions Backend Library
//!
//! Exposes the distribution engine, HTTP API and auth for use by binaries and tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod distribution;
pub mod middleware;
pub mod models;

pub use config::AppConfig;
