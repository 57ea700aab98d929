//! Partition owned jobs by state.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::core::job::{FinishedState, Job};

/// Owned jobs grouped by state.
#[derive(Debug, Default)]
pub struct Classification {
    pub active: Vec<Job>,
    pub successful: Vec<Job>,
    pub failed: Vec<Job>,
    /// Latest parseable scheduled-at annotation across all jobs.
    pub latest_scheduled_at: Option<DateTime<Utc>>,
}

/// Split jobs into running, succeeded and failed.
///
/// Jobs with a malformed scheduled-at annotation are still classified; only
/// their firing instant is ignored.
pub fn classify(jobs: Vec<Job>) -> Classification {
    let mut classification = Classification::default();

    for job in jobs {
        match job.scheduled_at() {
            Some(Ok(at)) => {
                if classification.latest_scheduled_at.is_none_or(|latest| at > latest) {
                    classification.latest_scheduled_at = Some(at);
                }
            }
            Some(Err(e)) => {
                warn!(
                    job = %job.key(),
                    annotation = job.scheduled_at_annotation().unwrap_or_default(),
                    error = %e,
                    "ignoring unparseable scheduled-at annotation"
                );
            }
            None => {}
        }

        match job.finished_state() {
            None => classification.active.push(job),
            Some(FinishedState::Succeeded) => classification.successful.push(job),
            Some(FinishedState::Failed) => classification.failed.push(job),
        }
    }

    classification
}
