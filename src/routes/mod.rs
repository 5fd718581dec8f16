//! HTTP routes for EventHub

pub mod health;
pub mod jobs;
pub mod media;

pub use health::{cache_stats, health_check, version_info};
pub use jobs::{handle_get_job, handle_job_history, handle_list_jobs};
pub use media::{
    handle_get_media, handle_invalidate_group, handle_invalidate_media, handle_warm_cache,
};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;

use crate::types::EventHubError;

/// JSON response with the given status
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(json)))
            .unwrap(),
        Err(e) => error_response(EventHubError::Internal(e.to_string())),
    }
}

/// JSON error body `{ "error": ... }` with the error's status code
pub fn error_response(err: EventHubError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    let body = serde_json::json!({ "error": message });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
