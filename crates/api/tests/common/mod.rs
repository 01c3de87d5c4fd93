#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shim_api::config::{ApiKeyConfig, ServerConfig, WorkflowConfig};
use shim_api::router::build_app_router;
use shim_api::state::AppState;

pub const TEST_ORIGIN: &str = "http://localhost:5173";
pub const MULTIPART_BOUNDARY: &str = "shim-test-boundary";

/// Build a test `ServerConfig` pointed at `engine_url`.
///
/// Templates resolve inside `root`, with `default.json` as the default.
/// Polling is fast and auth is off.
pub fn test_config(engine_url: &str, root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec![TEST_ORIGIN.to_string()],
        request_timeout_secs: 30,
        comfy_api_url: engine_url.to_string(),
        http_timeout: Duration::from_secs(5),
        max_upload_bytes: shim_api::config::DEFAULT_MAX_UPLOAD_BYTES,
        poll_interval: Duration::from_millis(10),
        max_wait: Duration::from_secs(5),
        unknown_grace: Duration::from_secs(30),
        workflow: WorkflowConfig {
            default_path: Some(root.join("default.json")),
            pointer_file: None,
            roots: vec![root.to_path_buf()],
        },
        auth: ApiKeyConfig {
            api_key: None,
            require: false,
        },
    }
}

/// Build the application router exactly as `main.rs` does.
pub fn build_test_app(config: ServerConfig) -> Router {
    let state = AppState::new(config.clone()).unwrap();
    build_app_router(state, &config)
}

/// Build state alone, for driving the serverless entry point.
pub fn build_test_state(config: ServerConfig) -> AppState {
    AppState::new(config).unwrap()
}

/// Two-node template with image and prompt placeholders.
pub fn sample_template() -> Value {
    json!({
        "1": {"class_type": "LoadImage", "inputs": {"image": "__INPUT_IMAGE_FILENAME__"}},
        "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "__PROMPT__", "clip": ["1", 0]}}
    })
}

/// Write `sample_template()` as `default.json` under `root`.
pub fn write_default_template(root: &Path) {
    std::fs::write(
        root.join("default.json"),
        serde_json::to_vec(&sample_template()).unwrap(),
    )
    .unwrap();
}

// ---------------------------------------------------------------------------
// Mock engine
// ---------------------------------------------------------------------------

/// Mount upload and prompt endpoints that accept everything as `prompt_id`.
pub async fn mount_submission(server: &MockServer, prompt_id: &str) {
    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "in.png",
            "subfolder": "",
            "type": "input"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"prompt_id": prompt_id, "number": 0})),
        )
        .mount(server)
        .await;
}

/// Mount `GET {route}` answering `body`.
pub async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// History body for a finished job with one video output.
pub fn completed_history(prompt_id: &str) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(
        prompt_id.to_string(),
        json!({
            "status": {"status_str": "success", "completed": true, "messages": []},
            "outputs": {"9": {"gifs": [
                {"filename": "out_00001.mp4", "subfolder": "video", "type": "output"}
            ]}}
        }),
    );
    Value::Object(body)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get_with_key(app: Router, uri: &str, key: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("x-api-key", key)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// One multipart part: field name, optional file name, content.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

pub async fn post_multipart(app: Router, uri: &str, parts: &[Part<'_>]) -> Response {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
