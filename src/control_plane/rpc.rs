//! The control plane's own HTTP surface: the network boundary a remote
//! caller (a worker process) talks to, one layer above the in-container
//! service. Built the same way `container::build_router` is built — typed
//! extractors, one handler per RPC, CORS via `tower_http`.

use std::sync::Arc;

use axum::extract::{ws::WebSocketUpgrade, Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::errors::{ClientError, ClientResult};
use crate::models::*;

use super::plane::ControlPlane;
use super::streaming;

pub fn build_rpc_router(plane: Arc<ControlPlane>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/execute", post(execute))
        .route("/api/execute/stream", post(execute_stream))
        .route("/api/processes/start", post(start_process))
        .route("/api/processes", get(list_processes))
        .route("/api/process/{id}", get(get_process).delete(kill_process))
        .route("/api/process/{id}/logs", get(get_process_logs))
        .route("/api/process/{id}/logs/stream", get(stream_process_logs))
        .route("/api/files/write", post(write_file))
        .route("/api/files/read", post(read_file))
        .route("/api/files/delete", post(delete_file))
        .route("/api/files/rename", post(rename_file))
        .route("/api/files/move", post(rename_file))
        .route("/api/files/mkdir", post(mkdir))
        .route("/api/ports/expose", post(expose_port))
        .route("/api/ports/unexpose", post(unexpose_port))
        .route("/api/ports", get(list_ports))
        .route("/api/ports/check-ready", post(check_ready))
        .route("/api/git/checkout", post(git_checkout))
        .route("/ws/connect/{*path}", get(connect))
        .layer(cors)
        .with_state(plane)
}

type PlaneState = State<Arc<ControlPlane>>;

async fn capture_hostname(plane: &ControlPlane, headers: &HeaderMap) {
    if let Some(host) = headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()) {
        plane.capture_hostname(host).await;
    }
}

fn into_response<T: serde::Serialize>(result: ClientResult<T>) -> axum::response::Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn ping(headers: HeaderMap, State(plane): PlaneState) -> impl IntoResponse {
    capture_hostname(&plane, &headers).await;
    into_response(plane.ping().await)
}

async fn create_session(
    State(plane): PlaneState,
    Json(request): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    into_response(plane.create_session(request).await)
}

async fn delete_session(State(plane): PlaneState, Path(id): Path<String>) -> impl IntoResponse {
    into_response(plane.delete_session(&id).await)
}

async fn execute(State(plane): PlaneState, Json(request): Json<ExecuteRequest>) -> impl IntoResponse {
    into_response(plane.execute(&request).await)
}

async fn execute_stream(
    State(plane): PlaneState,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    match plane.execute_stream(&request).await {
        Ok(raw) => byte_stream_to_sse(streaming::supervise(Box::pin(raw), NoopRenewal, PlaneHealth { plane })),
        Err(err) => err.into_response(),
    }
}

async fn start_process(
    State(plane): PlaneState,
    Json(request): Json<StartProcessRequest>,
) -> impl IntoResponse {
    into_response(plane.start_process(request).await)
}

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn list_processes(
    State(plane): PlaneState,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    into_response(plane.list_processes(query.session_id.as_deref()).await)
}

async fn get_process(State(plane): PlaneState, Path(id): Path<String>) -> impl IntoResponse {
    into_response(plane.get_process(&id).await)
}

async fn kill_process(State(plane): PlaneState, Path(id): Path<String>) -> impl IntoResponse {
    into_response(plane.kill_process(&id).await)
}

async fn get_process_logs(State(plane): PlaneState, Path(id): Path<String>) -> impl IntoResponse {
    into_response(plane.get_process_logs(&id).await)
}

async fn stream_process_logs(State(plane): PlaneState, Path(id): Path<String>) -> impl IntoResponse {
    match plane.stream_process_logs(&id).await {
        Ok(raw) => byte_stream_to_sse(streaming::supervise(Box::pin(raw), NoopRenewal, PlaneHealth { plane })),
        Err(err) => err.into_response(),
    }
}

async fn write_file(State(plane): PlaneState, Json(request): Json<FileWriteRequest>) -> impl IntoResponse {
    into_response(plane.write_file(&request).await)
}

async fn read_file(State(plane): PlaneState, Json(request): Json<FileReadRequest>) -> impl IntoResponse {
    into_response(plane.read_file(&request).await)
}

async fn delete_file(State(plane): PlaneState, Json(request): Json<FileDeleteRequest>) -> impl IntoResponse {
    into_response(plane.delete_file(&request).await)
}

async fn rename_file(State(plane): PlaneState, Json(request): Json<FileRenameRequest>) -> impl IntoResponse {
    into_response(plane.rename_file(&request).await)
}

async fn mkdir(State(plane): PlaneState, Json(request): Json<MkdirRequest>) -> impl IntoResponse {
    into_response(plane.mkdir(&request).await)
}

async fn expose_port(State(plane): PlaneState, Json(request): Json<ExposePortRequest>) -> impl IntoResponse {
    into_response(plane.expose_port(request).await)
}

#[derive(Deserialize)]
struct UnexposeBody {
    port: u16,
}

async fn unexpose_port(State(plane): PlaneState, Json(body): Json<UnexposeBody>) -> impl IntoResponse {
    into_response(plane.unexpose_port(body.port).await)
}

async fn list_ports(State(plane): PlaneState) -> impl IntoResponse {
    into_response(plane.list_ports().await)
}

async fn check_ready(State(plane): PlaneState, Json(request): Json<CheckReadyRequest>) -> impl IntoResponse {
    into_response(plane.check_ready(&request).await)
}

async fn git_checkout(State(plane): PlaneState, Json(request): Json<GitCheckoutRequest>) -> impl IntoResponse {
    into_response(plane.git_checkout(&request).await)
}

/// `connect(portOrPath)`: upgrade and tunnel to the container, never
/// terminating the socket at this layer (spec §4.7 "WebSocket routing").
async fn connect(
    State(plane): PlaneState,
    Path(path): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let container_host = plane.container_host().await;
    let target = match plane.connect_target(&container_host, &path) {
        Ok(target) => target,
        Err(err) => return err.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        if let Err(err) = super::connect::tunnel(socket, &target).await {
            tracing::warn!(%err, "connect tunnel ended with error");
        }
    })
    .into_response()
}

struct NoopRenewal;

impl streaming::ActivityRenewal for NoopRenewal {
    fn renew(&mut self) {}
}

struct PlaneHealth {
    plane: Arc<ControlPlane>,
}

#[async_trait::async_trait]
impl streaming::HealthCheck for PlaneHealth {
    async fn is_healthy(&mut self) -> bool {
        self.plane.ping().await.is_ok()
    }
}

/// The container already frames each event as a complete SSE record; this
/// decodes those records and re-wraps their JSON payload as this server's
/// own `Event` rather than nesting one SSE framing inside another.
fn byte_stream_to_sse<S>(stream: S) -> axum::response::Response
where
    S: Stream<Item = Result<Vec<u8>, ClientError>> + Send + 'static,
{
    let events = async_stream::stream! {
        tokio::pin!(stream);
        let mut decoder = crate::sse::SseDecoder::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for record in decoder.push(&bytes) {
                        match record {
                            crate::sse::DecodedRecord::Data(data) => {
                                yield Ok::<_, std::convert::Infallible>(Event::default().data(data));
                            }
                            crate::sse::DecodedRecord::ParseError(message) => {
                                yield Ok::<_, std::convert::Infallible>(Event::default().event("error").data(message));
                            }
                        }
                    }
                }
                Err(err) => {
                    yield Ok::<_, std::convert::Infallible>(Event::default().event("error").data(err.to_string()));
                    return;
                }
            }
        }
    };
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}
