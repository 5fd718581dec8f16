//! Job records, lifecycle events and tracker errors

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Job lifecycle: `pending -> running -> {completed | partial | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Finished with some items failed
    Partial,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Partial | JobStatus::Failed)
    }

    /// Terminal status for a finished run.
    ///
    /// A run that was cut short counts as partial even if every attempted
    /// item succeeded.
    pub fn from_outcome(completed: u64, failed: u64, cancelled: bool) -> Self {
        if failed == 0 && !cancelled {
            JobStatus::Completed
        } else if completed == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorEntry {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A tracked background operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    /// Percent complete, 0-100
    pub progress: u8,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub errors: Vec<JobErrorEntry>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(job_type: &str, metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_job_id(job_type, now),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            completed: 0,
            failed: 0,
            total: 0,
            errors: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// `completed / total` as a rounded percentage; 0 while total is 0.
    pub fn percent(completed: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        let percent = (completed as f64 / total as f64 * 100.0).round();
        percent.min(100.0) as u8
    }

    /// Wall-clock run time, once completed
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds())
    }
}

/// `{type}_{unix millis}_{9 random chars}`. Unique enough for an in-process
/// registry; not a security token.
fn generate_job_id(job_type: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", job_type, now.timestamp_millis(), suffix)
}

/// Lifecycle events broadcast by the tracker
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobEvent {
    Created {
        job_id: String,
        job_type: String,
        metadata: Map<String, Value>,
    },
    Progress {
        job_id: String,
        job_type: String,
        progress: u8,
        completed: u64,
        failed: u64,
        total: u64,
        metadata: Map<String, Value>,
    },
    Completed {
        job_id: String,
        job_type: String,
        status: JobStatus,
        completed: u64,
        failed: u64,
        total: u64,
        duration_ms: i64,
        metadata: Map<String, Value>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Created { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. } => job_id,
        }
    }

    /// Event name as relayed to live-update rooms
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Created { .. } => "job:created",
            JobEvent::Progress { .. } => "job:progress",
            JobEvent::Completed { .. } => "job:completed",
        }
    }
}

/// Caller-contract violations reported by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already completed: {0}")]
    AlreadyCompleted(String),

    #[error("Job {id}: {status} is not a terminal status")]
    NotTerminal { id: String, status: JobStatus },

    #[error("Job {id}: progress went backwards ({previous} -> {attempted} items accounted)")]
    ProgressRegressed {
        id: String,
        previous: u64,
        attempted: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_shape() {
        let job = Job::new("notification", Map::new());
        let parts: Vec<&str> = job.id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "notification");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(Job::new("x", Map::new()).id, Job::new("x", Map::new()).id);
    }

    #[test]
    fn test_percent() {
        assert_eq!(Job::percent(0, 0), 0);
        assert_eq!(Job::percent(5, 0), 0);
        assert_eq!(Job::percent(1, 3), 33);
        assert_eq!(Job::percent(2, 3), 67);
        assert_eq!(Job::percent(25, 25), 100);
        assert_eq!(Job::percent(30, 25), 100);
    }

    #[test]
    fn test_status_from_outcome() {
        assert_eq!(JobStatus::from_outcome(10, 0, false), JobStatus::Completed);
        assert_eq!(JobStatus::from_outcome(0, 0, false), JobStatus::Completed);
        assert_eq!(JobStatus::from_outcome(8, 2, false), JobStatus::Partial);
        assert_eq!(JobStatus::from_outcome(0, 10, false), JobStatus::Failed);
        assert_eq!(JobStatus::from_outcome(5, 0, true), JobStatus::Partial);
        assert_eq!(JobStatus::from_outcome(0, 0, true), JobStatus::Failed);
    }

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::Progress {
            job_id: "notification_1_abc".to_string(),
            job_type: "notification".to_string(),
            progress: 40,
            completed: 4,
            failed: 0,
            total: 10,
            metadata: Map::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["jobId"], "notification_1_abc");
        assert_eq!(json["progress"], 40);
        assert_eq!(event.name(), "job:progress");
    }

    #[test]
    fn test_job_serialization_uses_type_key() {
        let job = Job::new("bulk_email", Map::new());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "bulk_email");
        assert_eq!(json["status"], "pending");
        assert!(json["completedAt"].is_null());
    }
}
