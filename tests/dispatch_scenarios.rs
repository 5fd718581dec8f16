//! Batch dispatcher and job tracker integration tests

use async_trait::async_trait;
use eventhub::jobs::{
    BatchDispatcher, DispatchConfig, DispatchOptions, DispatchProfile, ItemOperation, JobEvent,
    JobStatus, JobTracker,
};
use serde_json::Map;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Target of a notification push
struct Recipient {
    index: usize,
}

/// Push that fails for a fixed set of recipients
struct FlakyPush {
    failing: HashSet<usize>,
}

#[async_trait]
impl ItemOperation<Recipient, String> for FlakyPush {
    async fn execute(&self, item: &Recipient, message: &String) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        if self.failing.contains(&item.index) {
            anyhow::bail!("push of {:?} to recipient {} failed", message, item.index);
        }
        Ok(())
    }
}

fn recipients(n: usize) -> Vec<Recipient> {
    (0..n).map(|index| Recipient { index }).collect()
}

fn dispatcher() -> BatchDispatcher {
    BatchDispatcher::new(Arc::new(JobTracker::with_defaults()), DispatchConfig::default())
}

async fn run(k: usize, failing: &[usize], batch_size: usize) -> (BatchDispatcher, eventhub::jobs::DispatchOutcome) {
    let dispatcher = dispatcher();
    let op = FlakyPush {
        failing: failing.iter().copied().collect(),
    };
    let outcome = dispatcher
        .dispatch(
            &recipients(k),
            &"doors open at 7".to_string(),
            &op,
            DispatchOptions::new("notification", batch_size),
        )
        .await;
    (dispatcher, outcome)
}

/// 25 targets in one batch of 50, indices 5 and 17 fail.
#[tokio::test(start_paused = true)]
async fn test_single_batch_partial_failure() {
    let dispatcher = dispatcher();
    let op = FlakyPush {
        failing: [5, 17].into_iter().collect(),
    };
    let options = dispatcher.options_for(DispatchProfile::Notification);
    assert_eq!(options.batch_size, 50);

    let outcome = dispatcher
        .dispatch(&recipients(25), &"reminder".to_string(), &op, options)
        .await;

    assert_eq!(outcome.completed, 23);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.total, 25);
    assert_eq!(outcome.status, JobStatus::Partial);

    let job = dispatcher.tracker().get_job(&outcome.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Partial);
    assert_eq!((job.completed, job.failed, job.total), (23, 2, 25));
    assert_eq!(job.errors.len(), 2);
    assert!(job.completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_all_fail_reports_failed() {
    let failing: Vec<usize> = (0..12).collect();
    let (_, outcome) = run(12, &failing, 5).await;
    assert_eq!(outcome.completed, 0);
    assert_eq!(outcome.failed, 12);
    assert_eq!(outcome.status, JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_none_fail_reports_completed() {
    let (dispatcher, outcome) = run(12, &[], 5).await;
    assert_eq!(outcome.completed, 12);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.status, JobStatus::Completed);
    assert!(dispatcher.tracker().get_job(&outcome.job_id).unwrap().errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failures_across_batches_are_all_counted() {
    let (dispatcher, outcome) = run(23, &[0, 9, 10, 22], 10).await;
    assert_eq!(outcome.completed, 19);
    assert_eq!(outcome.failed, 4);

    let job = dispatcher.tracker().get_job(&outcome.job_id).unwrap();
    let messages: Vec<&str> = job.errors.iter().map(|e| e.message.as_str()).collect();
    assert!(messages[0].starts_with("item 0:"));
    assert!(messages[3].starts_with("item 22:"));
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic() {
    let dispatcher = dispatcher();
    let mut events = dispatcher.tracker().subscribe();
    let op = FlakyPush {
        failing: [1, 8, 9].into_iter().collect(),
    };

    dispatcher
        .dispatch(&recipients(20), &String::new(), &op, DispatchOptions::new("bulk_email", 3))
        .await;

    let mut last_attempted = 0;
    let mut progress_events = 0;
    let mut completed_seen = false;
    while let Ok(event) = events.try_recv() {
        match event {
            JobEvent::Progress { completed, failed, progress, .. } => {
                assert!(completed + failed >= last_attempted);
                assert!(progress <= 100);
                last_attempted = completed + failed;
                progress_events += 1;
            }
            JobEvent::Completed { status, .. } => {
                assert_eq!(status, JobStatus::Partial);
                completed_seen = true;
            }
            JobEvent::Created { .. } => {}
        }
    }
    assert_eq!(progress_events, 7);
    assert_eq!(last_attempted, 20);
    assert!(completed_seen);
}

#[test]
fn test_tracker_rejects_regressing_progress() {
    let tracker = JobTracker::with_defaults();
    let job = tracker.create_job("bulk_email", Map::new());
    tracker.set_total(&job.id, 10);

    tracker.update_progress(&job.id, 4, 1).unwrap();
    assert!(tracker.update_progress(&job.id, 2, 1).is_err());
    tracker.update_progress(&job.id, 5, 1).unwrap();

    let job = tracker.get_job(&job.id).unwrap();
    assert_eq!(job.completed + job.failed, 6);
}

/// Push whose latency shrinks with the recipient index
struct SlowPush {
    n: usize,
    failing: HashSet<usize>,
    settled: Mutex<Vec<usize>>,
}

#[async_trait]
impl ItemOperation<Recipient, String> for SlowPush {
    async fn execute(&self, item: &Recipient, _message: &String) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(100 * (self.n - item.index) as u64)).await;
        self.settled.lock().unwrap().push(item.index);
        if self.failing.contains(&item.index) {
            anyhow::bail!("recipient {} timed out", item.index);
        }
        Ok(())
    }
}

/// Items inside a batch overlap and settle out of order; batches stay in
/// sequence with the pacing delay between them.
#[tokio::test(start_paused = true)]
async fn test_batches_sequential_items_concurrent() {
    let dispatcher = dispatcher();
    let op = SlowPush {
        n: 6,
        failing: [1, 4].into_iter().collect(),
        settled: Mutex::new(Vec::new()),
    };
    let options = DispatchOptions::new("bulk_email", 3).with_batch_delay(Duration::from_millis(100));

    let start = tokio::time::Instant::now();
    let outcome = dispatcher
        .dispatch(&recipients(6), &String::new(), &op, options)
        .await;

    // 600ms batch + 100ms delay + 300ms batch; sequential would take 2.1s
    assert_eq!(start.elapsed(), Duration::from_millis(1000));
    assert_eq!(*op.settled.lock().unwrap(), vec![2, 1, 0, 5, 4, 3]);

    assert_eq!(outcome.completed, 4);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.status, JobStatus::Partial);
    let job = dispatcher.tracker().get_job(&outcome.job_id).unwrap();
    assert_eq!(job.errors.len(), 2);
}
