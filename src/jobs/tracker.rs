//! Job Tracker - registry of running and recently finished jobs
//!
//! The tracker owns every [`Job`]: an active map for jobs still running and
//! a bounded history ring for finished ones. Other components hold only a
//! job id and mutate through the methods here.
//!
//! Lifecycle events go out on a broadcast channel. Each event is sent while
//! the registry lock is still held, so subscribers see events in exactly the
//! order the mutations happened.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::job::{Job, JobError, JobErrorEntry, JobEvent, JobStatus};

/// Buffered events per subscriber before a slow one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the job tracker
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Finished jobs retained, oldest dropped first (default: 100)
    pub history_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
        }
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<String, Job>,
    /// Oldest at the front
    history: VecDeque<Job>,
}

/// In-memory job registry with lifecycle events
pub struct JobTracker {
    registry: Mutex<Registry>,
    events: broadcast::Sender<JobEvent>,
    config: TrackerConfig,
}

impl JobTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: Mutex::new(Registry::default()),
            events,
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TrackerConfig::default())
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Register a new pending job
    pub fn create_job(&self, job_type: &str, metadata: Map<String, Value>) -> Job {
        let job = Job::new(job_type, metadata);

        let mut registry = self.registry();
        registry.active.insert(job.id.clone(), job.clone());
        self.emit(JobEvent::Created {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            metadata: job.metadata.clone(),
        });
        drop(registry);

        info!(job_id = %job.id, job_type = %job.job_type, "Job created");
        job
    }

    /// Set the number of items and move the job to running.
    ///
    /// Ignored for unknown or already finished jobs.
    pub fn set_total(&self, job_id: &str, total: u64) {
        let mut registry = self.registry();
        let Some(job) = registry.active.get_mut(job_id) else {
            debug!(job_id = job_id, "set_total for inactive job ignored");
            return;
        };

        job.total = total;
        job.status = JobStatus::Running;
        job.progress = Job::percent(job.completed, total);
        job.updated_at = Utc::now();
        debug!(job_id = job_id, total = total, "Job running");
    }

    /// Record cumulative counts and broadcast a progress event.
    ///
    /// `completed` and `failed` are running totals, not deltas. Updates for
    /// unknown or finished jobs are ignored; an update that accounts for
    /// fewer items than the previous one is rejected.
    pub fn update_progress(&self, job_id: &str, completed: u64, failed: u64) -> Result<(), JobError> {
        let mut registry = self.registry();
        let Some(job) = registry.active.get_mut(job_id) else {
            debug!(job_id = job_id, "update_progress for inactive job ignored");
            return Ok(());
        };

        let previous = job.completed + job.failed;
        let attempted = completed + failed;
        if attempted < previous {
            warn!(
                job_id = job_id,
                previous = previous,
                attempted = attempted,
                "Rejected progress update that goes backwards"
            );
            return Err(JobError::ProgressRegressed {
                id: job_id.to_string(),
                previous,
                attempted,
            });
        }

        job.completed = completed;
        job.failed = failed;
        job.progress = Job::percent(completed, job.total);
        job.updated_at = Utc::now();

        let event = JobEvent::Progress {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            progress: job.progress,
            completed,
            failed,
            total: job.total,
            metadata: job.metadata.clone(),
        };
        debug!(
            job_id = job_id,
            progress = job.progress,
            completed = completed,
            failed = failed,
            "Job progress"
        );
        self.emit(event);
        Ok(())
    }

    /// Append an error to the job's error list. Ignored for inactive jobs.
    pub fn add_error(&self, job_id: &str, message: impl Into<String>) {
        let mut registry = self.registry();
        if let Some(job) = registry.active.get_mut(job_id) {
            let now = Utc::now();
            job.errors.push(JobErrorEntry {
                message: message.into(),
                timestamp: now,
            });
            job.updated_at = now;
        } else {
            debug!(job_id = job_id, "add_error for inactive job ignored");
        }
    }

    /// Finish a job: set its terminal status, move it to history and
    /// broadcast a completion event.
    ///
    /// Completing a job twice is rejected with
    /// [`JobError::AlreadyCompleted`] and leaves history untouched.
    pub fn complete_job(&self, job_id: &str, status: JobStatus) -> Result<Job, JobError> {
        if !status.is_terminal() {
            return Err(JobError::NotTerminal {
                id: job_id.to_string(),
                status,
            });
        }

        let mut registry = self.registry();
        let Some(mut job) = registry.active.remove(job_id) else {
            return Err(if registry.history.iter().any(|j| j.id == job_id) {
                JobError::AlreadyCompleted(job_id.to_string())
            } else {
                JobError::NotFound(job_id.to_string())
            });
        };

        let now = Utc::now();
        job.status = status;
        job.progress = 100;
        job.completed_at = Some(now);
        job.updated_at = now;
        let duration_ms = job.duration_ms().unwrap_or_default();

        registry.history.push_back(job.clone());
        while registry.history.len() > self.config.history_capacity {
            registry.history.pop_front();
        }

        self.emit(JobEvent::Completed {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            status,
            completed: job.completed,
            failed: job.failed,
            total: job.total,
            duration_ms,
            metadata: job.metadata.clone(),
        });
        drop(registry);

        info!(
            job_id = %job.id,
            status = %status,
            completed = job.completed,
            failed = job.failed,
            total = job.total,
            duration_ms = duration_ms,
            "Job completed"
        );
        Ok(job)
    }

    /// Look up a job, active first, then history.
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        let registry = self.registry();
        registry
            .active
            .get(job_id)
            .or_else(|| registry.history.iter().rev().find(|j| j.id == job_id))
            .cloned()
    }

    /// Snapshot of running jobs, oldest first
    pub fn active_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.registry().active.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Most recently finished jobs, newest first
    pub fn history(&self, limit: usize) -> Vec<Job> {
        self.registry()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str, value: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), Value::from(value));
        map
    }

    #[test]
    fn test_create_job_is_pending_and_visible() {
        let tracker = JobTracker::with_defaults();
        let job = tracker.create_job("bulk_email", meta("eventId", "e1"));

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!((job.completed, job.failed, job.total), (0, 0, 0));

        let fetched = tracker.get_job(&job.id).expect("job visible");
        assert_eq!(fetched.metadata["eventId"], "e1");
        assert_eq!(tracker.active_jobs().len(), 1);
    }

    #[test]
    fn test_set_total_moves_to_running() {
        let tracker = JobTracker::with_defaults();
        let job = tracker.create_job("notification", Map::new());
        tracker.set_total(&job.id, 40);

        let job = tracker.get_job(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.total, 40);

        // Unknown ids are ignored
        tracker.set_total("nope", 10);
        assert!(tracker.get_job("nope").is_none());
    }

    #[test]
    fn test_update_progress_cumulative() {
        let tracker = JobTracker::with_defaults();
        let job = tracker.create_job("notification", Map::new());
        tracker.set_total(&job.id, 20);

        tracker.update_progress(&job.id, 5, 0).unwrap();
        tracker.update_progress(&job.id, 9, 1).unwrap();
        let snapshot = tracker.get_job(&job.id).unwrap();
        assert_eq!(snapshot.completed, 9);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.progress, 45);

        let err = tracker.update_progress(&job.id, 3, 0).unwrap_err();
        assert!(matches!(err, JobError::ProgressRegressed { previous: 10, attempted: 3, .. }));
        assert_eq!(tracker.get_job(&job.id).unwrap().completed, 9);

        assert!(tracker.update_progress("nope", 1, 0).is_ok());
    }

    #[test]
    fn test_add_error_keeps_status() {
        let tracker = JobTracker::with_defaults();
        let job = tracker.create_job("bulk_email", Map::new());
        tracker.set_total(&job.id, 2);
        tracker.add_error(&job.id, "smtp timeout");
        tracker.add_error(&job.id, "mailbox full");

        let job = tracker.get_job(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        let messages: Vec<&str> = job.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["smtp timeout", "mailbox full"]);
    }

    #[test]
    fn test_complete_moves_to_history() {
        let tracker = JobTracker::with_defaults();
        let job = tracker.create_job("bulk_email", Map::new());
        tracker.set_total(&job.id, 4);
        tracker.update_progress(&job.id, 3, 1).unwrap();

        let done = tracker.complete_job(&job.id, JobStatus::Partial).unwrap();
        assert_eq!(done.status, JobStatus::Partial);
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
        assert!(done.duration_ms().unwrap() >= 0);

        assert!(tracker.active_jobs().is_empty());
        assert_eq!(tracker.history(10).len(), 1);
        assert_eq!(tracker.get_job(&job.id).unwrap().status, JobStatus::Partial);

        // Finished jobs are immutable
        tracker.add_error(&job.id, "late");
        tracker.set_total(&job.id, 99);
        let job = tracker.get_job(&job.id).unwrap();
        assert!(job.errors.is_empty());
        assert_eq!(job.total, 4);
    }

    #[test]
    fn test_double_completion_rejected() {
        let tracker = JobTracker::with_defaults();
        let job = tracker.create_job("bulk_email", Map::new());
        tracker.complete_job(&job.id, JobStatus::Completed).unwrap();

        let err = tracker.complete_job(&job.id, JobStatus::Failed).unwrap_err();
        assert_eq!(err, JobError::AlreadyCompleted(job.id.clone()));
        assert_eq!(tracker.history(10).len(), 1);
        assert_eq!(tracker.get_job(&job.id).unwrap().status, JobStatus::Completed);

        assert_eq!(
            tracker.complete_job("nope", JobStatus::Completed).unwrap_err(),
            JobError::NotFound("nope".to_string())
        );
    }

    #[test]
    fn test_non_terminal_completion_rejected() {
        let tracker = JobTracker::with_defaults();
        let job = tracker.create_job("bulk_email", Map::new());
        assert!(matches!(
            tracker.complete_job(&job.id, JobStatus::Running),
            Err(JobError::NotTerminal { .. })
        ));
        assert_eq!(tracker.active_jobs().len(), 1);
    }

    #[test]
    fn test_history_bounded_newest_first() {
        let tracker = JobTracker::new(TrackerConfig { history_capacity: 3 });
        let mut ids = Vec::new();
        for i in 0..5 {
            let job = tracker.create_job(&format!("job{i}"), Map::new());
            tracker.complete_job(&job.id, JobStatus::Completed).unwrap();
            ids.push(job.id);
        }

        let history = tracker.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, ids[4]);
        assert_eq!(history[2].id, ids[2]);
        assert!(tracker.get_job(&ids[0]).is_none());
        assert_eq!(tracker.history(1).len(), 1);
    }

    #[tokio::test]
    async fn test_events_in_mutation_order() {
        let tracker = JobTracker::with_defaults();
        let mut events = tracker.subscribe();

        let job = tracker.create_job("notification", meta("room", "user_7"));
        tracker.set_total(&job.id, 2);
        tracker.update_progress(&job.id, 1, 0).unwrap();
        tracker.update_progress(&job.id, 1, 1).unwrap();
        tracker.complete_job(&job.id, JobStatus::Partial).unwrap();

        let created = events.recv().await.unwrap();
        assert!(matches!(created, JobEvent::Created { .. }));
        assert_eq!(created.job_id(), job.id);
        match events.recv().await.unwrap() {
            JobEvent::Progress { progress, completed, .. } => {
                assert_eq!(progress, 50);
                assert_eq!(completed, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            JobEvent::Progress { failed: 1, .. }
        ));
        match events.recv().await.unwrap() {
            event @ JobEvent::Completed { .. } => {
                assert_eq!(event.job_id(), job.id);
                let JobEvent::Completed { status, total, metadata, .. } = event else {
                    unreachable!()
                };
                assert_eq!(status, JobStatus::Partial);
                assert_eq!(total, 2);
                assert_eq!(metadata["room"], "user_7");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
