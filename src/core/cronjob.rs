//! The CronJob declaration.
//!
//! A CronJob is the user-authored object: a schedule, a job template, a
//! concurrency policy and history limits. Its status is written only by the
//! reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schedule::{Schedule, ScheduleError};
use super::types::{ObjectKey, ObjectMeta, ObjectReference, OwnerReference};

/// API group/version of CronJob declarations.
pub const API_VERSION: &str = "batch.cronlet.dev/v1";

/// Kind of CronJob declarations.
pub const KIND: &str = "CronJob";

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// How to treat a firing while earlier jobs are still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyPolicy {
    /// Run concurrently with whatever is active.
    #[default]
    Allow,
    /// Skip the firing if anything is active.
    Forbid,
    /// Delete active jobs, then run.
    Replace,
}

/// Structured alternative to a cron string. Missing fields mean `*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
}

impl CronFields {
    /// Render as a 5-field cron expression.
    pub fn expression(&self) -> String {
        let field = |f: &Option<String>| f.as_deref().unwrap_or("*").trim().to_string();
        format!(
            "{} {} {} {} {}",
            field(&self.minute),
            field(&self.hour),
            field(&self.day_of_month),
            field(&self.month),
            field(&self.day_of_week)
        )
    }
}

/// The `schedule` field: a cron string or structured fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    Expression(String),
    Fields(CronFields),
}

impl ScheduleSpec {
    /// The cron expression this schedule resolves to.
    pub fn expression(&self) -> String {
        match self {
            ScheduleSpec::Expression(expr) => expr.clone(),
            ScheduleSpec::Fields(fields) => fields.expression(),
        }
    }
}

impl From<&str> for ScheduleSpec {
    fn from(expr: &str) -> Self {
        ScheduleSpec::Expression(expr.to_string())
    }
}

/// Labels and annotations copied onto every spawned job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Template for spawned jobs. The spec body is opaque to the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTemplateSpec {
    #[serde(default)]
    pub metadata: TemplateMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Desired state of a CronJob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobSpec {
    pub schedule: ScheduleSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default)]
    pub job_template: JobTemplateSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_jobs_history_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_jobs_history_limit: Option<u32>,
}

impl CronJobSpec {
    /// Spec with the given schedule and every other field defaulted.
    pub fn new(schedule: impl Into<ScheduleSpec>) -> Self {
        Self {
            schedule: schedule.into(),
            time_zone: None,
            starting_deadline_seconds: None,
            concurrency_policy: ConcurrencyPolicy::default(),
            suspend: false,
            job_template: JobTemplateSpec::default(),
            successful_jobs_history_limit: None,
            failed_jobs_history_limit: None,
        }
    }
}

/// Observed state of a CronJob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active: Vec<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<DateTime<Utc>>,
}

/// A CronJob declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: CronJobSpec,
    #[serde(default)]
    pub status: CronJobStatus,
}

impl CronJob {
    /// Create a declaration that has not been stored yet.
    pub fn new(metadata: ObjectMeta, spec: CronJobSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec,
            status: CronJobStatus::default(),
        }
    }

    /// Store key of this declaration.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Parse the declared schedule in its time zone.
    pub fn schedule(&self) -> Result<Schedule, ScheduleError> {
        Schedule::with_timezone(
            self.spec.schedule.expression(),
            self.spec.time_zone.as_deref().unwrap_or("UTC"),
        )
    }

    /// Starting deadline as a duration.
    pub fn starting_deadline(&self) -> Option<chrono::Duration> {
        self.spec
            .starting_deadline_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
    }

    /// Controller owner reference for children. `None` until the store has
    /// assigned a uid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let uid = self.metadata.uid?;
        Some(OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            uid,
            controller: true,
            block_owner_deletion: true,
        })
    }
}
