//! Router-level tests for the in-container HTTP service, driven through
//! `tower::ServiceExt::oneshot` rather than a bound socket. Every test that
//! touches the filesystem or spawns a process creates an explicit session
//! whose `cwd` is the test's own tempdir, since the default session's cwd
//! (`/workspace`) does not exist on a dev machine.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use sandbox_control_plane::container::{build_router, ContainerConfig, ContainerState};
use tower::ServiceExt;

const MAX_BODY: usize = 10 * 1024 * 1024;

fn router(workspace_root: std::path::PathBuf) -> axum::Router {
    let config = ContainerConfig {
        control_plane_port: 3000,
        workspace_root,
        git_host_allowlist: None,
    };
    build_router(ContainerState::new(config))
}

async fn send(
    router: &axum::Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), MAX_BODY).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Create a session rooted at `cwd` and return its id.
async fn session_rooted_at(router: &axum::Router, cwd: &std::path::Path) -> String {
    let (status, body) = send(
        router,
        Method::POST,
        "/api/sessions",
        serde_json::json!({"cwd": cwd.to_string_lossy()}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn ping_returns_pong() {
    let router = router(std::env::temp_dir());
    let request = Request::builder()
        .uri("/api/ping")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), MAX_BODY).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["message"], "pong");
}

#[tokio::test]
async fn write_and_read_file_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());
    let session_id = session_rooted_at(&router, tmp.path()).await;

    let (status, write_resp) = send(
        &router,
        Method::POST,
        "/api/files/write",
        serde_json::json!({
            "path": "note.txt",
            "content": "hello world",
            "sessionId": session_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(write_resp["bytesWritten"], 11);

    let (status, read_resp) = send(
        &router,
        Method::POST,
        "/api/files/read",
        serde_json::json!({
            "path": "note.txt",
            "sessionId": session_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read_resp["content"], "hello world");
}

#[tokio::test]
async fn read_missing_file_returns_file_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());
    let session_id = session_rooted_at(&router, tmp.path()).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/files/read",
        serde_json::json!({
            "path": "nope.txt",
            "sessionId": session_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "FILE_NOT_FOUND");
}

#[tokio::test]
async fn path_traversal_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());
    let session_id = session_rooted_at(&router, tmp.path()).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/files/write",
        serde_json::json!({
            "path": "../../etc/passwd",
            "content": "pwned",
            "sessionId": session_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PATH_VALIDATION_FAILED");
}

#[tokio::test]
async fn execute_runs_a_command_to_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());
    let session_id = session_rooted_at(&router, tmp.path()).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/execute",
        serde_json::json!({
            "command": "echo hi",
            "sessionId": session_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["stdout"].as_str().unwrap().trim_end(), "hi");
    assert_eq!(body["exitCode"], 0);
}

#[tokio::test]
async fn start_process_then_get_then_kill() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());
    let session_id = session_rooted_at(&router, tmp.path()).await;

    let (status, started) = send(
        &router,
        Method::POST,
        "/api/processes/start",
        serde_json::json!({
            "command": "sleep 30",
            "sessionId": session_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let process_id = started["processId"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri(format!("/api/process/{process_id}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/process/{process_id}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_unknown_process_is_404() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());

    let request = Request::builder()
        .uri("/api/process/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expose_then_unexpose_port() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());

    let (status, exposed) = send(
        &router,
        Method::POST,
        "/api/ports/expose",
        serde_json::json!({"port": 8080, "name": "web"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!exposed["token"].as_str().unwrap().is_empty());

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/ports/expose",
        serde_json::json!({"port": 8080, "name": "web"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/ports/unexpose",
        serde_json::json!({"port": 8080}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn check_ready_reports_not_ready_for_closed_port() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/ports/check-ready",
        serde_json::json!({"port": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn git_checkout_rejects_disallowed_scheme() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path().to_path_buf());
    let session_id = session_rooted_at(&router, tmp.path()).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/git/checkout",
        serde_json::json!({
            "repoUrl": "ftp://example.com/repo.git",
            "sessionId": session_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_GIT_URL");
}
