//! EventHub - media cache and background job service
//!
//! ## Components
//!
//! - **Cache**: bounded in-memory media cache with per-kind TTLs, LRU
//!   eviction under a byte budget, and ETag/metadata companion stores
//! - **Cache policy**: HTTP cache headers per content category and the
//!   `If-None-Match` check
//! - **Jobs**: job tracker with lifecycle events, and a batch dispatcher
//!   that drives bulk operations with per-batch progress
//! - **Server**: thin HTTP surface over the above

pub mod cache;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{EventHubError, Result};
