//! Live-update channel
//!
//! Pushes named events into rooms (`user_<id>`, `jobs`, ...). The transport
//! behind a room is not our concern; [`BroadcastLiveChannel`] fans messages
//! out over a tokio broadcast channel and lets any number of listeners
//! filter by room.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::JobEvent;

/// Room that receives every tracker lifecycle event
pub const JOBS_ROOM: &str = "jobs";

/// Room for a single user's notifications
pub fn user_room(user_id: impl std::fmt::Display) -> String {
    format!("user_{user_id}")
}

/// Push mechanism for named events keyed by room.
///
/// Emission is fire-and-forget; a channel with no listeners drops the event.
pub trait LiveChannel: Send + Sync {
    fn emit(&self, room: &str, event: &str, body: Value);
}

/// One emitted event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveMessage {
    pub room: String,
    pub event: String,
    pub body: Value,
}

/// Live channel over a tokio broadcast channel
pub struct BroadcastLiveChannel {
    tx: broadcast::Sender<LiveMessage>,
}

impl BroadcastLiveChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveMessage> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastLiveChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LiveChannel for BroadcastLiveChannel {
    fn emit(&self, room: &str, event: &str, body: Value) {
        debug!(room = room, event = event, "Live event");
        // Ignore send errors (no receivers)
        let _ = self.tx.send(LiveMessage {
            room: room.to_string(),
            event: event.to_string(),
            body,
        });
    }
}

/// Forward tracker lifecycle events into `room` until shutdown.
///
/// A lagging receiver skips the missed events and keeps relaying.
pub fn spawn_job_event_relay<L>(
    mut events: broadcast::Receiver<JobEvent>,
    live: std::sync::Arc<L>,
    room: String,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    L: LiveChannel + ?Sized + 'static,
{
    tokio::spawn(async move {
        info!(room = %room, "Job event relay started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        let body = serde_json::to_value(&event).unwrap_or(Value::Null);
                        live.emit(&room, event.name(), body);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room = %room, skipped = skipped, "Job event relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        info!(room = %room, "Job event relay stopped");
    })
}
