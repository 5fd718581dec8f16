//! Background jobs: tracker, batch dispatcher and live-update relay

pub mod dispatcher;
pub mod job;
pub mod live;
pub mod tracker;

pub use dispatcher::{
    BatchDispatcher, DispatchConfig, DispatchOptions, DispatchOutcome, DispatchProfile,
    ItemOperation,
};
pub use job::{Job, JobError, JobErrorEntry, JobEvent, JobStatus};
pub use live::{
    spawn_job_event_relay, user_room, BroadcastLiveChannel, LiveChannel, LiveMessage, JOBS_ROOM,
};
pub use tracker::{JobTracker, TrackerConfig};
