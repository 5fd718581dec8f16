//! Health, version and cache statistics endpoints
//!
//! - `/health` - liveness plus a short summary of cache and job state
//! - `/version` - build info stamped by build.rs
//! - `/cache/stats` - full cache statistics, cached briefly by clients

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::json_response;
use crate::cache::policy::set_metadata_cache_headers;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub timestamp: String,
    pub cache: CacheSummary,
    pub jobs: JobSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub items: usize,
    pub current_size: String,
    pub utilization: f64,
    pub hit_rate: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub active: usize,
    pub live_listeners: usize,
}

pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let stats = state.cache.stats();
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        cache: CacheSummary {
            items: stats.item_count,
            current_size: stats.current_size,
            utilization: stats.utilization,
            hit_rate: stats.hit_rate,
        },
        jobs: JobSummary {
            active: state.tracker.active_jobs().len(),
            live_listeners: state.live.listener_count(),
        },
    };

    let mut resp = json_response(StatusCode::OK, &response);
    resp.headers_mut()
        .insert(hyper::header::CACHE_CONTROL, hyper::header::HeaderValue::from_static("no-store"));
    resp
}

/// Build information
#[derive(Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_time: &'static str,
}

pub fn version_info() -> Response<Full<Bytes>> {
    let info = VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
    };
    json_response(StatusCode::OK, &info)
}

pub fn cache_stats(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let stats = state.cache.stats();
    let mut resp = json_response(StatusCode::OK, &stats);
    set_metadata_cache_headers(resp.headers_mut(), None);
    resp
}
