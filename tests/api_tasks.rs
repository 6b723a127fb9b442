//! TES HTTP surface tests against the in-memory store and the fake
//! cluster: authentication, round-trips, projections, filtering,
//! pagination, boundary validation and cancellation semantics.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use poiesis::api::{router, AppState};
use poiesis::auth::Authenticator;
use poiesis::cluster::{ClusterDriver, FakeCluster};
use poiesis::config::Config;
use poiesis::models::TaskState;
use poiesis::store::{MemoryStore, TaskStore};

struct TestApi {
    app: Router,
    store: TaskStore,
}

fn api() -> TestApi {
    let store = TaskStore::Memory(MemoryStore::new());
    let state = AppState::new(
        store.clone(),
        ClusterDriver::Fake(FakeCluster::new()),
        Authenticator::Dummy,
        Config::local(),
    );
    TestApi {
        app: router(state),
        store,
    }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn echo_task() -> Value {
    json!({
        "name": "echo",
        "description": "print an inline file",
        "tags": { "team": "x" },
        "inputs": [{ "content": "hi", "path": "/data/f" }],
        "executors": [{
            "image": "ubuntu:20.04",
            "command": ["/bin/cat", "/data/f"],
            "workdir": "/data/"
        }]
    })
}

async fn create(app: &Router, token: &str, task: Value) -> String {
    let (status, body) = call(app, "POST", "/ga4gh/tes/v1/tasks", Some(token), Some(task)).await;
    assert_eq!(status, StatusCode::OK, "create failed: {body}");
    body["id"].as_str().expect("task id").to_string()
}

#[tokio::test]
async fn service_info_needs_no_token() {
    let api = api();
    let (status, body) = call(&api.app, "GET", "/ga4gh/tes/v1/service-info", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"]["artifact"], "tes");
    assert_eq!(body["type"]["version"], "1.1.0");
    // The log truncation limit is published through the storage list.
    let storage = body["storage"].as_array().unwrap();
    assert!(storage.iter().any(|s| s.as_str().unwrap().contains("bytes")));
}

#[tokio::test]
async fn task_routes_require_a_bearer_token() {
    let api = api();
    let (status, body) = call(&api.app, "GET", "/ga4gh/tes/v1/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthError");

    let (status, _) = call(
        &api.app,
        "POST",
        "/ga4gh/tes/v1/tasks",
        None,
        Some(echo_task()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_then_get_full_round_trips_client_fields() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;

    let (status, task) = call(
        &api.app,
        "GET",
        &format!("/ga4gh/tes/v1/tasks/{id}?view=FULL"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["id"], id.as_str());
    assert_eq!(task["state"], "QUEUED");
    assert_eq!(task["name"], "echo");
    assert_eq!(task["tags"]["team"], "x");
    assert_eq!(task["inputs"][0]["content"], "hi");
    assert_eq!(task["inputs"][0]["path"], "/data/f");
    assert_eq!(task["executors"][0]["command"][0], "/bin/cat");
    assert!(task["creation_time"].is_string());
}

#[tokio::test]
async fn cross_subject_lookups_are_not_found() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;

    let (status, body) = call(
        &api.app,
        "GET",
        &format!("/ga4gh/tes/v1/tasks/{id}"),
        Some("mallory"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let api = api();
    let (status, _) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks/no-such-task",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn minimal_view_returns_id_and_state_only() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;

    let (status, task) = call(
        &api.app,
        "GET",
        &format!("/ga4gh/tes/v1/tasks/{id}"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["id"], id.as_str());
    assert_eq!(task["state"], "QUEUED");
    assert!(task.get("name").is_none() || task["name"].is_null());
    let executors = task.get("executors").cloned().unwrap_or(Value::Null);
    assert!(executors.is_null() || executors.as_array().is_some_and(|a| a.is_empty()));
}

#[tokio::test]
async fn basic_view_hides_inline_content() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;

    let (_, task) = call(
        &api.app,
        "GET",
        &format!("/ga4gh/tes/v1/tasks/{id}?view=BASIC"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(task["name"], "echo");
    assert!(task["inputs"][0].get("content").is_none() || task["inputs"][0]["content"].is_null());
}

#[tokio::test]
async fn invalid_view_is_a_bad_request() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;
    let (status, body) = call(
        &api.app,
        "GET",
        &format!("/ga4gh/tes/v1/tasks/{id}?view=full"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");
}

#[tokio::test]
async fn create_validation_boundaries() {
    let api = api();

    // No executors.
    let (status, _) = call(
        &api.app,
        "POST",
        "/ga4gh/tes/v1/tasks",
        Some("alice"),
        Some(json!({ "executors": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Input with both url and content.
    let mut task = echo_task();
    task["inputs"][0]["url"] = json!("file:///tmp/x");
    let (status, _) = call(&api.app, "POST", "/ga4gh/tes/v1/tasks", Some("alice"), Some(task)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Input with neither url nor content.
    let mut task = echo_task();
    task["inputs"][0] = json!({ "path": "/data/f" });
    let (status, _) = call(&api.app, "POST", "/ga4gh/tes/v1/tasks", Some("alice"), Some(task)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Wildcard output without a path prefix.
    let mut task = echo_task();
    task["outputs"] = json!([{ "url": "file:///out", "path": "/data/*.txt" }]);
    let (status, body) = call(&api.app, "POST", "/ga4gh/tes/v1/tasks", Some("alice"), Some(task)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("path_prefix"));
}

#[tokio::test]
async fn list_scopes_filters_and_paginates() {
    let api = api();
    for name in ["run-a", "run-b", "other"] {
        let mut task = echo_task();
        task["name"] = json!(name);
        create(&api.app, "alice", task).await;
    }
    create(&api.app, "bob", echo_task()).await;

    // Scoped to the caller.
    let (_, body) = call(&api.app, "GET", "/ga4gh/tes/v1/tasks", Some("alice"), None).await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 3);

    // Name prefix.
    let (_, body) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?name_prefix=run-&view=BASIC",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 2);

    // State filter.
    let (_, body) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?state=QUEUED",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 3);
    let (status, _) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?state=NOT_A_STATE",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Tag filter: key with empty value matches any value of that key.
    let (_, body) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?tag_key=team&tag_value=x",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 3);
    let (_, body) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?tag_key=missing",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 0);

    // Pagination: page through with size 2, then resume from the token.
    let (_, first) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?page_size=2",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(first["tasks"].as_array().unwrap().len(), 2);
    let token = first["next_page_token"].as_str().unwrap();
    let (_, second) = call(
        &api.app,
        "GET",
        &format!("/ga4gh/tes/v1/tasks?page_size=2&page_token={token}"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(second["tasks"].as_array().unwrap().len(), 1);
    assert!(second["next_page_token"].is_null());

    // Oversized page_size clamps instead of failing.
    let (status, _) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?page_size=5000",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Garbage page token is a validation error.
    let (status, _) = call(
        &api.app,
        "GET",
        "/ga4gh/tes/v1/tasks?page_token=garbage",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_moves_the_task_toward_canceled() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;

    let (status, _) = call(
        &api.app,
        "POST",
        &format!("/ga4gh/tes/v1/tasks/{id}:cancel"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let state = api.store.current_state(&id).await.unwrap();
    assert!(
        state == TaskState::Canceling || state == TaskState::Canceled,
        "unexpected state {state}"
    );

    // Canceling again is idempotent.
    let (status, _) = call(
        &api.app,
        "POST",
        &format!("/ga4gh/tes/v1/tasks/{id}:cancel"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cancel_on_terminal_task_is_a_noop() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;
    api.store
        .transition(&id, TaskState::Queued, TaskState::Initializing)
        .await
        .unwrap();
    api.store
        .transition(&id, TaskState::Initializing, TaskState::Running)
        .await
        .unwrap();
    api.store
        .transition(&id, TaskState::Running, TaskState::Complete)
        .await
        .unwrap();

    let (status, _) = call(
        &api.app,
        "POST",
        &format!("/ga4gh/tes/v1/tasks/{id}:cancel"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        api.store.current_state(&id).await.unwrap(),
        TaskState::Complete
    );
}

#[tokio::test]
async fn cancel_is_subject_scoped() {
    let api = api();
    let id = create(&api.app, "alice", echo_task()).await;
    let (status, _) = call(
        &api.app,
        "POST",
        &format!("/ga4gh/tes/v1/tasks/{id}:cancel"),
        Some("mallory"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        api.store.current_state(&id).await.unwrap(),
        TaskState::Queued
    );
}
