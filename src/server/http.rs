//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::{format_bytes, spawn_maintenance_task, HttpMediaSource, MediaCache, MediaCacheConfig};
use crate::config::Args;
use crate::jobs::{
    spawn_job_event_relay, BatchDispatcher, BroadcastLiveChannel, DispatchConfig, JobTracker,
    TrackerConfig, JOBS_ROOM,
};
use crate::routes;
use crate::types::EventHubError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Buffered live messages per listener
const LIVE_CHANNEL_CAPACITY: usize = 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Bounded media cache
    pub cache: Arc<MediaCache>,
    /// Registry of running and finished jobs
    pub tracker: Arc<JobTracker>,
    /// Bulk operation driver, reporting into `tracker`
    pub dispatcher: Arc<BatchDispatcher>,
    /// Live-update rooms (job relay, per-user progress)
    pub live: Arc<BroadcastLiveChannel>,
    /// Origin consulted on cache misses, when configured
    pub origin: Option<Arc<HttpMediaSource>>,
    pub started_at: Instant,
    /// Stops the accept loop and background tasks
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(args: Args) -> Self {
        let cache = Arc::new(MediaCache::new(MediaCacheConfig::from(&args.cache)));
        let tracker = Arc::new(JobTracker::new(TrackerConfig::from(&args.jobs)));
        let live = Arc::new(BroadcastLiveChannel::new(LIVE_CHANNEL_CAPACITY));
        let dispatcher = Arc::new(
            BatchDispatcher::new(Arc::clone(&tracker), DispatchConfig::from(&args.jobs))
                .with_live_channel(live.clone()),
        );
        let origin = args
            .media_origin_url
            .as_deref()
            .map(|url| Arc::new(HttpMediaSource::new(url)));

        Self {
            args,
            cache,
            tracker,
            dispatcher,
            live,
            origin,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Run the HTTP server until `state.shutdown` is cancelled
pub async fn run(state: Arc<AppState>) -> Result<(), EventHubError> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("EventHub listening on {}", state.args.listen);

    let config = state.cache.config();
    let maintenance = spawn_maintenance_task(
        Arc::clone(&state.cache),
        config.health_check_interval,
        state.shutdown.clone(),
    );
    info!(
        "Media cache enabled (budget {}, item ceiling {}, max {} items)",
        format_bytes(config.max_bytes),
        format_bytes(config.max_item_bytes),
        config.max_items
    );

    let relay = spawn_job_event_relay(
        state.tracker.subscribe(),
        Arc::clone(&state.live),
        JOBS_ROOM.to_string(),
        state.shutdown.clone(),
    );

    match &state.origin {
        Some(_) => info!(
            "Media origin: {}",
            state.args.media_origin_url.as_deref().unwrap_or_default()
        ),
        None => info!("No media origin configured; misses return 404"),
    }

    loop {
        let accepted = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }

    info!("Shutting down");
    let _ = maintenance.await;
    let _ = relay.await;
    Ok(())
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }
        (Method::GET, "/version") => routes::version_info(),
        (Method::GET, "/cache/stats") => routes::cache_stats(Arc::clone(&state)),
        (Method::POST, "/cache/warm") => routes::handle_warm_cache(Arc::clone(&state), req).await,
        (Method::GET, "/jobs") => routes::handle_list_jobs(Arc::clone(&state)),
        (Method::GET, "/jobs/history") => {
            routes::handle_job_history(Arc::clone(&state), query.as_deref())
        }
        (Method::GET, p) if p.starts_with("/jobs/") => {
            routes::handle_get_job(Arc::clone(&state), &p["/jobs/".len()..])
        }
        (Method::GET, p) if p.starts_with("/media/") => {
            let headers = req.headers().clone();
            routes::handle_get_media(Arc::clone(&state), &headers, &p["/media/".len()..]).await
        }
        (Method::DELETE, p) if p.starts_with("/media/") => {
            routes::handle_invalidate_media(Arc::clone(&state), &p["/media/".len()..])
        }
        (Method::DELETE, p) if event_group(p).is_some() => {
            routes::handle_invalidate_group(Arc::clone(&state), event_group(p).unwrap_or_default())
        }
        (_, p) => not_found_response(p),
    };

    Ok(to_boxed(response))
}

/// `{group}` from `/events/{group}/media`
fn event_group(path: &str) -> Option<&str> {
    path.strip_prefix("/events/")?
        .strip_suffix("/media")
        .filter(|group| !group.is_empty() && !group.contains('/'))
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
