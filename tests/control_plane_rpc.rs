//! End-to-end-ish tests for the control plane's own RPC surface: a real
//! in-container HTTP service bound to an ephemeral port, proxied through a
//! [`ControlPlane`] whose [`ContainerLifecycle`] just reports that
//! container healthy, exercised through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use sandbox_control_plane::container::{build_router, ContainerConfig, ContainerState};
use sandbox_control_plane::control_plane::{build_rpc_router, ContainerLifecycle, ControlPlane};
use tower::ServiceExt;

const MAX_BODY: usize = 10 * 1024 * 1024;

struct AlwaysHealthy;

#[async_trait::async_trait]
impl ContainerLifecycle for AlwaysHealthy {
    async fn ensure_started(&self) -> Result<(), String> {
        Ok(())
    }
    async fn is_healthy(&self) -> bool {
        true
    }
    async fn stop(&self) {}
}

async fn spawn_container() -> (String, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = ContainerConfig {
        control_plane_port: 3000,
        workspace_root: tmp.path().to_path_buf(),
        git_host_allowlist: None,
    };
    let router = build_router(ContainerState::new(config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), tmp)
}

/// Returns the router plus the workspace tempdir, which must stay alive for
/// as long as the spawned container keeps serving requests against it.
async fn rpc_router() -> (axum::Router, tempfile::TempDir) {
    let (base_url, tmp) = spawn_container().await;
    let plane = Arc::new(ControlPlane::new(
        "sb-test",
        base_url,
        3100,
        Arc::new(AlwaysHealthy),
    ));
    (build_rpc_router(plane), tmp)
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

#[tokio::test]
async fn ping_proxies_through_to_the_container() {
    let (router, _tmp) = rpc_router().await;
    let (status, body) = send(&router, Method::GET, "/api/ping", serde_json::Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong");
}

#[tokio::test]
async fn create_session_round_trips_through_the_proxy() {
    let (router, _tmp) = rpc_router().await;
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/sessions",
        serde_json::json!({"cwd": "/tmp"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["sessionId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn execute_proxies_command_output() {
    let (router, tmp) = rpc_router().await;
    let (_, session) = send(
        &router,
        Method::POST,
        "/api/sessions",
        serde_json::json!({"cwd": tmp.path().to_string_lossy()}),
    )
    .await;
    let session_id = session["sessionId"].as_str().unwrap();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/execute",
        serde_json::json!({"command": "echo from-container", "sessionId": session_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stdout"].as_str().unwrap().trim_end(), "from-container");
}

#[tokio::test]
async fn expose_then_list_ports_through_the_proxy() {
    let (router, _tmp) = rpc_router().await;
    let (status, exposed) = send(
        &router,
        Method::POST,
        "/api/ports/expose",
        serde_json::json!({"port": 9090, "name": "web"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!exposed["token"].as_str().unwrap().is_empty());

    let request = Request::builder()
        .uri("/api/ports")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), MAX_BODY).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["ports"][0]["port"], 9090);
}

#[tokio::test]
async fn unknown_process_surfaces_as_typed_not_found() {
    let (router, _tmp) = rpc_router().await;
    let request = Request::builder()
        .uri("/api/process/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = to_bytes(response.into_body(), MAX_BODY).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "PROCESS_NOT_FOUND");
}
