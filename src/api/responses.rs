//! API response types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::controller::{ControllerState, QueueStats};
use crate::core::cronjob::CronJob;
use crate::core::job::{FinishedState, Job, JobStatus};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Controller state response.
#[derive(Debug, Serialize)]
pub struct ControllerStateResponse {
    pub state: String,
    pub is_running: bool,
    pub is_paused: bool,
    /// Absent once the controller has stopped.
    pub queue: Option<QueueStats>,
}

impl ControllerStateResponse {
    pub fn new(state: ControllerState, queue: Option<QueueStats>) -> Self {
        Self {
            state: format!("{:?}", state).to_lowercase(),
            is_running: state == ControllerState::Running,
            is_paused: state == ControllerState::Paused,
            queue,
        }
    }
}

/// A CronJob together with its next firing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobResponse {
    #[serde(flatten)]
    pub cronjob: CronJob,
    /// Next firing after now, or None when the schedule is invalid or exhausted.
    pub next_schedule_time: Option<DateTime<Utc>>,
}

impl CronJobResponse {
    pub fn new(cronjob: CronJob, now: DateTime<Utc>) -> Self {
        let next_schedule_time = cronjob
            .schedule()
            .ok()
            .and_then(|schedule| schedule.next_after(now).ok());
        Self {
            cronjob,
            next_schedule_time,
        }
    }
}

/// List of CronJobs response.
#[derive(Debug, Serialize)]
pub struct CronJobListResponse {
    pub cronjobs: Vec<CronJobResponse>,
    pub count: usize,
}

/// Job summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub namespace: String,
    pub name: String,
    pub state: &'static str,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let state = match job.finished_state() {
            None => "active",
            Some(FinishedState::Succeeded) => "succeeded",
            Some(FinishedState::Failed) => "failed",
        };
        let scheduled_at = job.scheduled_at().and_then(Result::ok);
        Self {
            namespace: job.metadata.namespace,
            name: job.metadata.name,
            state,
            scheduled_at,
            status: job.status,
        }
    }
}

/// List of jobs response.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub count: usize,
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
