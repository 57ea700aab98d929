//! Job construction from a CronJob template.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::core::cronjob::CronJob;
use crate::core::job::{Job, SCHEDULED_AT_ANNOTATION};
use crate::core::types::ObjectMeta;

/// Errors that can occur when building a job.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The CronJob has no uid to point an owner reference at.
    #[error("cronjob {0} has no uid; cannot build owner reference")]
    MissingOwnerIdentity(String),
}

/// Name of the job for a firing. Same inputs always give the same name.
pub fn job_name(cronjob_name: &str, scheduled_at: DateTime<Utc>) -> String {
    format!("{}-{}", cronjob_name, scheduled_at.timestamp())
}

/// Build the job for a firing of `cronjob` at `scheduled_at`.
pub fn build_job(cronjob: &CronJob, scheduled_at: DateTime<Utc>) -> Result<Job, FactoryError> {
    let owner = cronjob
        .owner_reference()
        .ok_or_else(|| FactoryError::MissingOwnerIdentity(cronjob.key().to_string()))?;

    let template = &cronjob.spec.job_template;
    let mut metadata = ObjectMeta::new(
        &cronjob.metadata.namespace,
        job_name(&cronjob.metadata.name, scheduled_at),
    );
    metadata.labels = template.metadata.labels.clone();
    metadata.annotations = template.metadata.annotations.clone();
    metadata.annotations.insert(
        SCHEDULED_AT_ANNOTATION.to_string(),
        scheduled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    metadata.owner_references.push(owner);

    Ok(Job::new(metadata, template.spec.clone()))
}
