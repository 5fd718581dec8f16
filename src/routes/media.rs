//! Media endpoints backed by the bounded content cache
//!
//! - `GET /media/{name}` - cached bytes, fetched from the origin on a miss
//! - `DELETE /media/{name}` - drop one entry
//! - `DELETE /events/{group}/media` - drop every entry of an event
//! - `POST /cache/warm` - background warm-up job over a list of names
//!
//! `GET` honours `If-None-Match` against the cached ETag and always sets the
//! cache-policy headers for the media kind.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap};
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info};

use super::{error_response, json_response};
use crate::cache::{
    is_client_cache_valid, CacheDirectives, CacheError, CacheWarmer, ContentCategory, MediaKind,
};
use crate::jobs::DispatchProfile;
use crate::server::AppState;
use crate::types::EventHubError;

/// Largest accepted warm-up request body
const MAX_WARM_BODY: usize = 1024 * 1024;

fn decode_name(raw: &str) -> Result<Cow<'_, str>, EventHubError> {
    let name = urlencoding::decode(raw)
        .map_err(|_| EventHubError::BadRequest("Media name is not valid UTF-8".into()))?;
    if name.is_empty() {
        return Err(EventHubError::BadRequest("Empty media name".into()));
    }
    Ok(name)
}

/// Content-Type from the file extension
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ogv" => "video/ogg",
        _ => "application/octet-stream",
    }
}

pub async fn handle_get_media(
    state: Arc<AppState>,
    headers: &HeaderMap,
    raw_name: &str,
) -> Response<Full<Bytes>> {
    let name = match decode_name(raw_name) {
        Ok(name) => name,
        Err(e) => return error_response(e),
    };
    let category = ContentCategory::from(MediaKind::from_name(&name));
    let directives = |etag: Option<&str>| CacheDirectives::for_category(category, etag);

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    let cached_etag = state.cache.get_etag(&name);
    if is_client_cache_valid(if_none_match, cached_etag.as_deref()) {
        debug!(name = %name, "Client copy still valid");
        let mut resp = Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .body(Full::new(Bytes::new()))
            .unwrap();
        directives(cached_etag.as_deref()).apply(resp.headers_mut());
        return resp;
    }

    let payload = match &state.origin {
        Some(origin) => state.cache.get_or_fetch(&name, origin.as_ref()).await,
        None => state
            .cache
            .get(&name)
            .ok_or_else(|| CacheError::NotFound(name.to_string())),
    };
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => return error_response(e.into()),
    };

    // The fetch may have just stored an ETag
    let etag = state.cache.get_etag(&name);
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&name))
        .header(header::CONTENT_LENGTH, payload.len())
        .body(Full::new(payload))
        .unwrap();
    directives(etag.as_deref()).apply(resp.headers_mut());
    resp
}

pub fn handle_invalidate_media(state: Arc<AppState>, raw_name: &str) -> Response<Full<Bytes>> {
    let name = match decode_name(raw_name) {
        Ok(name) => name,
        Err(e) => return error_response(e),
    };
    state.cache.invalidate(&name);
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

pub fn handle_invalidate_group(state: Arc<AppState>, raw_group: &str) -> Response<Full<Bytes>> {
    let group = match decode_name(raw_group) {
        Ok(group) => group,
        Err(e) => return error_response(e),
    };
    let removed = state.cache.invalidate_by_event_group(&group);
    info!(group = %group, removed = removed, "Invalidated event media");
    json_response(StatusCode::OK, &serde_json::json!({ "removed": removed }))
}

#[derive(Debug, Deserialize)]
struct WarmRequest {
    names: Vec<String>,
    #[serde(default)]
    room: Option<String>,
}

/// Start a warm-up job; progress is visible under `/jobs`.
pub async fn handle_warm_cache(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let Some(origin) = state.origin.clone() else {
        return error_response(EventHubError::Unavailable("No media origin configured".into()));
    };

    let body = match http_body_util::Limited::new(req.into_body(), MAX_WARM_BODY)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(EventHubError::BadRequest(format!("Body read failed: {}", e))),
    };
    let request: WarmRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(e.into()),
    };

    let accepted = request.names.len();
    let dispatcher = Arc::clone(&state.dispatcher);
    let warmer = CacheWarmer::new(Arc::clone(&state.cache), origin);
    tokio::spawn(async move {
        let mut options = dispatcher.options_for(DispatchProfile::CacheWarmup);
        options.room = request.room;
        let outcome = dispatcher.dispatch(&request.names, &(), &warmer, options).await;
        debug!(job_id = %outcome.job_id, status = %outcome.status, "Warm-up finished");
    });

    json_response(StatusCode::ACCEPTED, &serde_json::json!({ "accepted": accepted }))
}
