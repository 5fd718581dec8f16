//! Job inspection endpoints
//!
//! - `GET /jobs` - active jobs, oldest first
//! - `GET /jobs/history?limit=n` - finished jobs, newest first
//! - `GET /jobs/{id}` - one job, active or finished

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use super::{error_response, json_response};
use crate::jobs::JobError;
use crate::server::AppState;
use crate::types::EventHubError;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

pub fn handle_list_jobs(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let jobs = state.tracker.active_jobs();
    json_response(StatusCode::OK, &serde_json::json!({ "jobs": jobs, "count": jobs.len() }))
}

pub fn handle_job_history(state: Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let query: HistoryQuery = match serde_urlencoded::from_str(query.unwrap_or("")) {
        Ok(q) => q,
        Err(e) => {
            return error_response(EventHubError::BadRequest(format!("Invalid query: {}", e)))
        }
    };

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let jobs = state.tracker.history(limit);
    json_response(StatusCode::OK, &serde_json::json!({ "jobs": jobs, "count": jobs.len() }))
}

pub fn handle_get_job(state: Arc<AppState>, job_id: &str) -> Response<Full<Bytes>> {
    match state.tracker.get_job(job_id) {
        Some(job) => json_response(StatusCode::OK, &job),
        None => error_response(JobError::NotFound(job_id.to_string()).into()),
    }
}
