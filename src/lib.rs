//! keycheck - License issuing and challenge/response validation
//!
//! Clients prove possession of a license secret by hashing
//! `key-timestamp-secret` with SHA-256. The server checks the hash and
//! timestamp freshness, evaluates the license state, and consumes one unit of
//! the license's daily quota atomically.
//!
//! # Features
//!
//! - `server` - HTTP server components (handlers, routes, sqlx database). Enabled by default.
//! - `sqlite` - SQLite database backend. Enabled by default.
//! - `postgres` - PostgreSQL database backend.
//! - `background-jobs` - Scheduled usage retention (implies `server`).
//!
//! # Example
//!
//! ```toml
//! # Use defaults (server + sqlite)
//! keycheck = "0.1"
//!
//! # Client and core only
//! keycheck = { version = "0.1", default-features = false }
//!
//! # Server with PostgreSQL and scheduled jobs
//! keycheck = { version = "0.1", features = ["postgres", "background-jobs"] }
//! ```

// Core modules (always available)
pub mod admin;
pub mod audit;
pub mod cache;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod errors;
pub mod license;
pub mod params;
pub mod quota;
pub mod store;
pub mod validation;

// Revalidation client (always available)
pub mod client;

// Server-related modules (requires "server" feature)
#[cfg(feature = "server")]
pub mod server;

// Scheduled jobs (requires "background-jobs" feature)
#[cfg(feature = "background-jobs")]
pub mod jobs;

pub use errors::{LicenseError, LicenseResult};
