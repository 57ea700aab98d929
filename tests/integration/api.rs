//! API integration tests.
//!
//! These tests drive the router directly with `tower::ServiceExt::oneshot`.

use crate::common::{at, wait_for};

use cronlet::api::{ApiState, build_router, create_api_state_with_clock};
use cronlet::testing::{CronJobBuilder, JobBuilder, ManualClock};
use cronlet::{Controller, ControllerHandle, InMemoryStore, ObjectKey, ObjectStore};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;

struct TestApi {
    state: ApiState<InMemoryStore>,
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    handle: ControllerHandle,
    task: JoinHandle<()>,
}

/// Start a controller over an empty store with the clock at 12:00.
async fn create_test_api() -> TestApi {
    let clock = Arc::new(ManualClock::new(at(12, 0, 0)));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let (handle, task) = Controller::with_store(Arc::clone(&store))
        .with_clock(clock.clone())
        .start()
        .await;
    let state = create_api_state_with_clock(handle.clone(), Arc::clone(&store), clock.clone());
    TestApi {
        state,
        store,
        clock,
        handle,
        task,
    }
}

async fn send(api: &TestApi, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(api.state.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn report_manifest(schedule: &str) -> Value {
    json!({
        "apiVersion": "batch.cronlet.dev/v1",
        "kind": "CronJob",
        "metadata": { "name": "report", "namespace": "ops" },
        "spec": {
            "schedule": schedule,
            "jobTemplate": { "spec": { "image": "reporter:1" } }
        }
    })
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let api = create_test_api().await;

    let (status, json) = send(&api, get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Controller state endpoint reports state and queue statistics.
#[tokio::test]
async fn test_controller_state_endpoint() {
    let api = create_test_api().await;

    let (status, json) = send(&api, get("/api/controller/state")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);
    assert_eq!(json["is_paused"], false);
    assert!(json["queue"]["queued"].is_number());
}

/// Test: Pause and resume round trip through the API.
#[tokio::test]
async fn test_pause_and_resume() {
    let api = create_test_api().await;

    let (status, _) = send(&api, empty("POST", "/api/controller/pause")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(api.handle.is_paused().await);

    let (_, json) = send(&api, get("/api/controller/state")).await;
    assert_eq!(json["state"], "paused");

    let (status, _) = send(&api, empty("POST", "/api/controller/resume")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(api.handle.is_running().await);
}

/// Test: PUT creates a CronJob, GET returns it with its next firing.
#[tokio::test]
async fn test_put_then_get_cronjob() {
    let api = create_test_api().await;

    let (status, json) = send(
        &api,
        with_json(
            "PUT",
            "/api/namespaces/ops/cronjobs/report",
            report_manifest("*/15 * * * *"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["metadata"]["name"], "report");
    assert!(json["metadata"]["uid"].is_string());

    let (status, json) = send(&api, get("/api/namespaces/ops/cronjobs/report")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["spec"]["schedule"], "*/15 * * * *");
    assert_eq!(json["nextScheduleTime"], "2024-01-15T12:15:00Z");

    let (status, json) = send(&api, get("/api/cronjobs?namespace=ops")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
}

/// Test: PUT on an existing CronJob replaces its spec.
#[tokio::test]
async fn test_put_updates_existing_cronjob() {
    let api = create_test_api().await;
    let uri = "/api/namespaces/ops/cronjobs/report";

    let (_, created) = send(&api, with_json("PUT", uri, report_manifest("0 * * * *"))).await;
    let (status, updated) = send(&api, with_json("PUT", uri, report_manifest("30 * * * *"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["metadata"]["uid"], created["metadata"]["uid"]);
    assert_eq!(updated["spec"]["schedule"], "30 * * * *");
}

/// Test: invalid schedules and mismatched names are rejected with 400.
#[tokio::test]
async fn test_put_rejects_bad_requests() {
    let api = create_test_api().await;

    let (status, json) = send(
        &api,
        with_json(
            "PUT",
            "/api/namespaces/ops/cronjobs/report",
            report_manifest("every day at noon"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");

    let (status, _) = send(
        &api,
        with_json(
            "PUT",
            "/api/namespaces/ops/cronjobs/other",
            report_manifest("0 * * * *"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test: unknown CronJobs are 404.
#[tokio::test]
async fn test_get_missing_cronjob() {
    let api = create_test_api().await;

    let (status, json) = send(&api, get("/api/namespaces/ops/cronjobs/nope")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, _) = send(&api, empty("POST", "/api/namespaces/ops/cronjobs/nope/reconcile")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: the controller creates a job once a firing is due, and the jobs
/// endpoint lists it.
#[tokio::test]
async fn test_reconcile_and_list_jobs() {
    let api = create_test_api().await;
    send(
        &api,
        with_json(
            "PUT",
            "/api/namespaces/ops/cronjobs/report",
            report_manifest("* * * * *"),
        ),
    )
    .await;
    api.clock.set(at(12, 1, 5));

    let (status, _) = send(
        &api,
        empty("POST", "/api/namespaces/ops/cronjobs/report/reconcile"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let store = &api.store;
    wait_for("job created", Duration::from_secs(2), move || async move {
        !store.list_jobs("ops").await.unwrap().is_empty()
    })
    .await;

    let (status, json) = send(&api, get("/api/namespaces/ops/cronjobs/report/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["jobs"][0]["state"], "active");
    assert_eq!(json["jobs"][0]["scheduledAt"], "2024-01-15T12:01:00Z");
}

/// Test: reported job status is stored and reflected in the job summary.
#[tokio::test]
async fn test_put_job_status() {
    let api = create_test_api().await;
    api.state.handle.pause().await.unwrap();

    let cronjob = api
        .store
        .create_cronjob(CronJobBuilder::new("report").namespace("ops").build())
        .await
        .unwrap();
    let job = api
        .store
        .create_job(JobBuilder::for_cronjob(&cronjob, at(12, 0, 0)).build())
        .await
        .unwrap();

    let uri = format!("/api/namespaces/ops/jobs/{}/status", job.name());
    let (status, json) = send(
        &api,
        with_json(
            "PUT",
            &uri,
            json!({
                "startTime": "2024-01-15T12:00:02Z",
                "completionTime": "2024-01-15T12:00:40Z",
                "conditions": [{
                    "type": "Complete",
                    "status": "True",
                    "lastTransitionTime": "2024-01-15T12:00:40Z"
                }]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "succeeded");

    let stored = api
        .store
        .get_job(&ObjectKey::new("ops", job.name()))
        .await
        .unwrap();
    assert!(stored.is_finished());
    assert_eq!(stored.status.start_time, Some(at(12, 0, 2)));
}

/// Test: DELETE removes the CronJob and, by default, its jobs.
#[tokio::test]
async fn test_delete_cronjob() {
    let api = create_test_api().await;
    api.state.handle.pause().await.unwrap();

    let cronjob = api
        .store
        .create_cronjob(CronJobBuilder::new("report").namespace("ops").build())
        .await
        .unwrap();
    api.store
        .create_job(JobBuilder::for_cronjob(&cronjob, at(12, 0, 0)).build())
        .await
        .unwrap();

    let (status, _) = send(&api, empty("DELETE", "/api/namespaces/ops/cronjobs/report")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(api.store.list_jobs("ops").await.unwrap().is_empty());

    let (status, _) = send(&api, empty("DELETE", "/api/namespaces/ops/cronjobs/report")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: orphan propagation keeps the jobs.
#[tokio::test]
async fn test_delete_cronjob_orphan() {
    let api = create_test_api().await;
    api.state.handle.pause().await.unwrap();

    let cronjob = api
        .store
        .create_cronjob(CronJobBuilder::new("report").namespace("ops").build())
        .await
        .unwrap();
    api.store
        .create_job(JobBuilder::for_cronjob(&cronjob, at(12, 0, 0)).build())
        .await
        .unwrap();

    let (status, _) = send(
        &api,
        empty(
            "DELETE",
            "/api/namespaces/ops/cronjobs/report?propagation=Orphan",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let jobs = api.store.list_jobs("ops").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].metadata.owner_references.is_empty());
}

/// Test: controller endpoints report 503 once the controller has stopped.
#[tokio::test]
async fn test_stopped_controller_is_unavailable() {
    let mut api = create_test_api().await;
    api.handle.shutdown().await.unwrap();
    (&mut api.task).await.unwrap();

    let (status, json) = send(&api, empty("POST", "/api/controller/pause")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");

    let (status, json) = send(&api, get("/api/controller/state")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "stopped");
    assert!(json["queue"].is_null());
}
