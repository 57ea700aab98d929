//! Job instances spawned by a CronJob.
//!
//! A Job is opaque to the controller apart from its metadata, start time and
//! terminal condition. Running it is somebody else's problem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ObjectKey, ObjectMeta, ObjectReference};

/// API group/version of job instances.
pub const API_VERSION: &str = "batch/v1";

/// Kind of job instances.
pub const KIND: &str = "Job";

/// Annotation recording the firing instant a job was created for (RFC 3339).
pub const SCHEDULED_AT_ANNOTATION: &str = "batch.cronlet.dev/scheduled-at";

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// Kind of a job condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobConditionType {
    Complete,
    Failed,
    Suspended,
}

/// Truth value of a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// One observed condition of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub condition_type: JobConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobCondition {
    /// A condition that holds as of `at`.
    pub fn holding(condition_type: JobConditionType, at: DateTime<Utc>) -> Self {
        Self {
            condition_type,
            status: ConditionStatus::True,
            last_transition_time: Some(at),
            reason: None,
            message: None,
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedState {
    Succeeded,
    Failed,
}

/// Observed state of a job, reported by whatever executes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JobCondition>,
}

/// A job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    /// Create a job that has not been stored yet.
    pub fn new(metadata: ObjectMeta, spec: serde_json::Value) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec,
            status: JobStatus::default(),
        }
    }

    /// Store key of this job.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Name of this job.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Terminal state, if a Complete or Failed condition holds.
    pub fn finished_state(&self) -> Option<FinishedState> {
        self.status
            .conditions
            .iter()
            .filter(|c| c.status == ConditionStatus::True)
            .find_map(|c| match c.condition_type {
                JobConditionType::Complete => Some(FinishedState::Succeeded),
                JobConditionType::Failed => Some(FinishedState::Failed),
                JobConditionType::Suspended => None,
            })
    }

    /// Whether the job has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished_state().is_some()
    }

    /// Raw scheduled-at annotation.
    pub fn scheduled_at_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(SCHEDULED_AT_ANNOTATION)
            .map(String::as_str)
    }

    /// Parse the scheduled-at annotation. `None` if absent, `Err` if
    /// malformed.
    pub fn scheduled_at(&self) -> Option<Result<DateTime<Utc>, chrono::ParseError>> {
        self.scheduled_at_annotation().map(|raw| {
            DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
        })
    }

    /// Reference suitable for a CronJob's active list.
    pub fn reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid,
            resource_version: self.metadata.resource_version,
        }
    }

    /// Record a successful completion at `at`.
    pub fn mark_complete(&mut self, at: DateTime<Utc>) {
        self.status.completion_time = Some(at);
        self.status
            .conditions
            .push(JobCondition::holding(JobConditionType::Complete, at));
    }

    /// Record a failure at `at`.
    pub fn mark_failed(&mut self, at: DateTime<Utc>, reason: impl Into<String>) {
        let mut condition = JobCondition::holding(JobConditionType::Failed, at);
        condition.reason = Some(reason.into());
        self.status.conditions.push(condition);
    }
}
