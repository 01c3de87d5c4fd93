//! Integration tests for `GET /status/{job_id}`.

mod common;

use axum::http::StatusCode;
use common::{
    body_json, completed_history, get, get_with_key, mount_json, mount_submission, post_json,
    test_config, write_default_template,
};
use serde_json::json;
use wiremock::MockServer;

// ---------------------------------------------------------------------------
// Test: A submitted job reports its outputs once the engine finishes it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submitted_job_reports_completion() {
    let engine = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    write_default_template(root.path());
    mount_submission(&engine, "p-1").await;
    mount_json(&engine, "/history/p-1", completed_history("p-1")).await;
    let app = common::build_test_app(test_config(&engine.uri(), root.path()));

    let submitted = post_json(
        app.clone(),
        "/run",
        json!({"image": "aGVsbG8=", "wait": false}),
    )
    .await;
    assert_eq!(submitted.status(), StatusCode::ACCEPTED);

    let response = get(app, "/status/p-1").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["job_id"], "p-1");
    assert_eq!(json["status"], "completed");
    assert_eq!(json["outputs"][0]["filename"], "out_00001.mp4");
    assert!(json["error"].is_null());
}

// ---------------------------------------------------------------------------
// Test: A job not yet visible upstream is still reported as running
// ---------------------------------------------------------------------------

#[tokio::test]
async fn just_submitted_job_is_running() {
    let engine = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    write_default_template(root.path());
    mount_submission(&engine, "p-1").await;
    mount_json(&engine, "/history/p-1", json!({})).await;
    mount_json(&engine, "/queue", json!({"queue_running": [], "queue_pending": []})).await;
    let app = common::build_test_app(test_config(&engine.uri(), root.path()));

    post_json(
        app.clone(),
        "/run",
        json!({"image": "aGVsbG8=", "wait": false}),
    )
    .await;
    let response = get(app, "/status/p-1").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["outputs"], json!([]));
}

// ---------------------------------------------------------------------------
// Test: Jobs submitted elsewhere are reported from the engine's queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_job_is_read_from_queue() {
    let engine = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    mount_json(&engine, "/history/p-x", json!({})).await;
    mount_json(
        &engine,
        "/queue",
        json!({"queue_running": [[0, "p-x", {}, {}, []]], "queue_pending": []}),
    )
    .await;
    let app = common::build_test_app(test_config(&engine.uri(), root.path()));

    let response = get(app, "/status/p-x").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "running");
}

// ---------------------------------------------------------------------------
// Test: Ids unknown locally and upstream are 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let engine = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    mount_json(&engine, "/history/nope", json!({})).await;
    mount_json(&engine, "/queue", json!({"queue_running": [], "queue_pending": []})).await;
    let app = common::build_test_app(test_config(&engine.uri(), root.path()));

    let response = get(app, "/status/nope").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Test: /status requires the API key when configured
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_requires_api_key() {
    let engine = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    mount_json(&engine, "/history/p-x", json!({})).await;
    mount_json(&engine, "/queue", json!({"queue_running": [[0, "p-x"]]})).await;
    let mut config = test_config(&engine.uri(), root.path());
    config.auth.require = true;
    config.auth.api_key = Some("s3cret".into());
    let app = common::build_test_app(config);

    let denied = get_with_key(app.clone(), "/status/p-x", "wrong").await;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = get_with_key(app, "/status/p-x", "s3cret").await;
    assert_eq!(allowed.status(), StatusCode::OK);
}
