//! Batch Dispatcher - drives bulk operations over a list of targets
//!
//! ```text
//!   dispatch(targets)
//!        │ create_job + set_total            ──► JobTracker
//!        ▼
//!   ┌── batch 0 ──┐  join_all(execute(item))      settle all, then count
//!   └─────────────┘  update_progress(cumulative)  ──► progress event
//!        │ batch_delay (skipped after the last batch)
//!   ┌── batch 1 ──┐  ...
//!        ▼
//!   complete_job(completed | partial | failed)    ──► completion event
//! ```
//!
//! Batches run strictly in order; items within a batch run concurrently and
//! may settle in any order. One item failing never aborts its batch or the
//! job. Cancellation is only observed between batches.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{Job, JobStatus};
use super::live::LiveChannel;
use super::tracker::JobTracker;

// ============================================================================
// Per-item operation
// ============================================================================

/// The unit of work applied to each target.
///
/// `payload` is shared by every item of a dispatch (the email body, the
/// notification text). An `Err` marks the item failed; its message lands in
/// the job's error list.
#[async_trait]
pub trait ItemOperation<T, P>: Send + Sync {
    async fn execute(&self, item: &T, payload: &P) -> anyhow::Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Batch sizes per use case and the pacing delay between batches
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub email_batch_size: usize,
    pub notification_batch_size: usize,
    pub warmup_batch_size: usize,
    /// Pause between batches, easing pressure on rate-limited transports
    pub batch_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            email_batch_size: 10,
            notification_batch_size: 50,
            warmup_batch_size: 5,
            batch_delay: Duration::from_millis(100),
        }
    }
}

/// Built-in bulk operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchProfile {
    Email,
    Notification,
    CacheWarmup,
}

impl DispatchProfile {
    /// Job type label
    pub fn job_type(&self) -> &'static str {
        match self {
            DispatchProfile::Email => "bulk_email",
            DispatchProfile::Notification => "notification",
            DispatchProfile::CacheWarmup => "cache_warmup",
        }
    }

    pub fn batch_size(&self, config: &DispatchConfig) -> usize {
        match self {
            DispatchProfile::Email => config.email_batch_size,
            DispatchProfile::Notification => config.notification_batch_size,
            DispatchProfile::CacheWarmup => config.warmup_batch_size,
        }
    }
}

/// Per-dispatch settings
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub job_type: String,
    pub metadata: Map<String, Value>,
    pub batch_size: usize,
    /// Falls back to [`DispatchConfig::batch_delay`]
    pub batch_delay: Option<Duration>,
    /// Live-update room; no live pushes when unset
    pub room: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl DispatchOptions {
    pub fn new(job_type: impl Into<String>, batch_size: usize) -> Self {
        Self {
            job_type: job_type.into(),
            metadata: Map::new(),
            batch_size,
            batch_delay: None,
            room: None,
            cancel: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Result handed back to the caller once a dispatch finishes
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub job_id: String,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub status: JobStatus,
    /// Stopped early at a batch boundary
    pub cancelled: bool,
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct BatchDispatcher {
    tracker: Arc<JobTracker>,
    live: Option<Arc<dyn LiveChannel>>,
    config: DispatchConfig,
}

impl BatchDispatcher {
    pub fn new(tracker: Arc<JobTracker>, config: DispatchConfig) -> Self {
        Self {
            tracker,
            live: None,
            config,
        }
    }

    /// Attach a live-update channel used when a dispatch names a room
    pub fn with_live_channel(mut self, live: Arc<dyn LiveChannel>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Options preset for a built-in profile
    pub fn options_for(&self, profile: DispatchProfile) -> DispatchOptions {
        DispatchOptions::new(profile.job_type(), profile.batch_size(&self.config))
    }

    fn push_live(&self, room: Option<&str>, job_type: &str, stage: &str, body: Value) {
        if let (Some(live), Some(room)) = (&self.live, room) {
            live.emit(room, &format!("{job_type}:{stage}"), body);
        }
    }

    /// Run `operation` over every target and wait for the job to finish.
    pub async fn dispatch<T, P, O>(
        &self,
        targets: &[T],
        payload: &P,
        operation: &O,
        options: DispatchOptions,
    ) -> DispatchOutcome
    where
        T: Sync,
        P: Sync,
        O: ItemOperation<T, P> + ?Sized,
    {
        let DispatchOptions {
            job_type,
            metadata,
            batch_size,
            batch_delay,
            room,
            cancel,
        } = options;
        let batch_size = batch_size.max(1);
        let batch_delay = batch_delay.unwrap_or(self.config.batch_delay);
        let room = room.as_deref();

        let total = targets.len() as u64;
        let job = self.tracker.create_job(&job_type, metadata);
        self.tracker.set_total(&job.id, total);

        let total_batches = targets.len().div_ceil(batch_size);
        info!(
            job_id = %job.id,
            job_type = %job_type,
            total = total,
            batch_size = batch_size,
            total_batches = total_batches,
            "Dispatching batch job"
        );
        self.push_live(
            room,
            &job_type,
            "started",
            json!({
                "jobId": job.id,
                "total": total,
                "message": format!("Started {job_type} for {total} targets"),
            }),
        );

        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut cancelled = false;

        for (batch_index, batch) in targets.chunks(batch_size).enumerate() {
            if cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                let remaining = total - completed - failed;
                warn!(
                    job_id = %job.id,
                    batch_index = batch_index,
                    remaining = remaining,
                    "Dispatch cancelled"
                );
                self.tracker.add_error(
                    &job.id,
                    format!("cancelled: {remaining} items not attempted"),
                );
                cancelled = true;
                break;
            }

            let offset = batch_index * batch_size;
            let outcomes = join_all(batch.iter().map(|item| operation.execute(item, payload))).await;

            for (i, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    Ok(()) => completed += 1,
                    Err(e) => {
                        let position = offset + i;
                        debug!(job_id = %job.id, item = position, error = %e, "Item failed");
                        self.tracker
                            .add_error(&job.id, format!("item {position}: {e:#}"));
                        failed += 1;
                    }
                }
            }

            if let Err(e) = self.tracker.update_progress(&job.id, completed, failed) {
                warn!(job_id = %job.id, error = %e, "Progress update rejected");
            }
            let progress = Job::percent(completed, total);
            debug!(
                job_id = %job.id,
                batch_index = batch_index,
                completed = completed,
                failed = failed,
                "Batch settled"
            );
            self.push_live(
                room,
                &job_type,
                "progress",
                json!({
                    "jobId": job.id,
                    "progress": progress,
                    "completed": completed,
                    "failed": failed,
                    "total": total,
                    "message": format!("Processed {} of {}", completed + failed, total),
                }),
            );

            let is_final = batch_index + 1 == total_batches;
            if !is_final {
                match &cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = tokio::time::sleep(batch_delay) => {}
                        }
                    }
                    None => tokio::time::sleep(batch_delay).await,
                }
            }
        }

        let status = JobStatus::from_outcome(completed, failed, cancelled);
        if let Err(e) = self.tracker.complete_job(&job.id, status) {
            warn!(job_id = %job.id, error = %e, "Job completion rejected");
        }

        let summary = if failed == 0 && !cancelled {
            format!("{job_type} finished: {completed} of {total} succeeded")
        } else {
            format!("{job_type} finished: {completed} succeeded, {failed} failed, {total} total")
        };
        self.push_live(
            room,
            &job_type,
            "complete",
            json!({
                "jobId": job.id,
                "status": status,
                "completed": completed,
                "failed": failed,
                "total": total,
                "message": summary,
            }),
        );

        DispatchOutcome {
            job_id: job.id,
            completed,
            failed,
            total,
            status,
            cancelled,
        }
    }
}
