//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::controller::ControllerHandle;
use crate::core::clock::Clock;
use crate::core::cronjob::CronJob;
use crate::core::job::JobStatus;
use crate::core::types::ObjectKey;
use crate::store::{DeletePropagation, ObjectStore, apply_cronjob};

use super::errors::ApiError;
use super::responses::{
    ControllerStateResponse, CronJobListResponse, CronJobResponse, HealthResponse,
    JobListResponse, JobResponse, MessageResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<S: ObjectStore> {
    pub handle: ControllerHandle,
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
}

impl<S: ObjectStore> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Query parameters for list_cronjobs endpoint.
#[derive(Debug, Deserialize)]
pub struct ListCronJobsQuery {
    pub namespace: Option<String>,
}

/// Query parameters for delete_cronjob endpoint.
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub propagation: DeletePropagation,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get controller state and queue statistics.
pub async fn get_controller_state<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
) -> Json<ControllerStateResponse> {
    let controller_state = state.handle.state().await;
    let queue = state.handle.stats().await.ok();
    Json(ControllerStateResponse::new(controller_state, queue))
}

/// Pause the controller.
pub async fn pause_controller<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.pause().await?;
    Ok(Json(MessageResponse {
        message: "controller paused".to_string(),
    }))
}

/// Resume the controller.
pub async fn resume_controller<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.resume().await?;
    Ok(Json(MessageResponse {
        message: "controller resumed".to_string(),
    }))
}

/// List CronJobs, optionally in one namespace.
pub async fn list_cronjobs<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
    Query(query): Query<ListCronJobsQuery>,
) -> Result<Json<CronJobListResponse>, ApiError> {
    let now = state.clock.now();
    let cronjobs: Vec<CronJobResponse> = state
        .store
        .list_cronjobs(query.namespace.as_deref())
        .await?
        .into_iter()
        .map(|cronjob| CronJobResponse::new(cronjob, now))
        .collect();
    let count = cronjobs.len();
    Ok(Json(CronJobListResponse { cronjobs, count }))
}

/// Get a specific CronJob.
pub async fn get_cronjob<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<CronJobResponse>, ApiError> {
    let cronjob = state
        .store
        .get_cronjob(&ObjectKey::new(namespace, name))
        .await?;
    Ok(Json(CronJobResponse::new(cronjob, state.clock.now())))
}

/// Create or replace a CronJob.
pub async fn put_cronjob<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(mut cronjob): Json<CronJob>,
) -> Result<Json<CronJobResponse>, ApiError> {
    if cronjob.metadata.name != name || cronjob.metadata.namespace != namespace {
        return Err(ApiError::BadRequest(format!(
            "body declares {}, path names {}/{}",
            cronjob.key(),
            namespace,
            name
        )));
    }
    cronjob
        .schedule()
        .map_err(|e| ApiError::BadRequest(format!("invalid schedule: {}", e)))?;

    cronjob.status = Default::default();
    let stored = apply_cronjob(state.store.as_ref(), cronjob).await?;
    tracing::info!(cronjob = %stored.key(), "CronJob applied via API");
    Ok(Json(CronJobResponse::new(stored, state.clock.now())))
}

/// Delete a CronJob.
pub async fn delete_cronjob<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let key = ObjectKey::new(namespace, name);
    state.store.delete_cronjob(&key, query.propagation).await?;
    tracing::info!(cronjob = %key, propagation = ?query.propagation, "CronJob deleted via API");
    Ok(Json(MessageResponse {
        message: format!("cronjob '{}' deleted", key),
    }))
}

/// List the jobs a CronJob currently controls.
pub async fn list_cronjob_jobs<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<JobListResponse>, ApiError> {
    let cronjob = state
        .store
        .get_cronjob(&ObjectKey::new(namespace.as_str(), name.as_str()))
        .await?;

    let jobs: Vec<JobResponse> = state
        .store
        .list_owned_jobs(&namespace, &name)
        .await?
        .into_iter()
        .filter(|job| {
            job.metadata
                .controller_owner()
                .is_some_and(|owner| Some(owner.uid) == cronjob.metadata.uid)
        })
        .map(JobResponse::from)
        .collect();
    let count = jobs.len();
    Ok(Json(JobListResponse { jobs, count }))
}

/// Queue a reconcile pass for a CronJob.
pub async fn reconcile_cronjob<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let key = ObjectKey::new(namespace, name);
    state.store.get_cronjob(&key).await?;
    state.handle.enqueue(key.clone()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: format!("reconcile queued for '{}'", key),
        }),
    ))
}

/// Record a job's observed status.
pub async fn put_job_status<S: ObjectStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(status): Json<JobStatus>,
) -> Result<Json<JobResponse>, ApiError> {
    let mut job = state
        .store
        .get_job(&ObjectKey::new(namespace, name))
        .await?;
    job.status = status;
    let updated = state.store.update_job_status(&job).await?;
    tracing::debug!(job = %updated.key(), "Job status reported via API");
    Ok(Json(JobResponse::from(updated)))
}
