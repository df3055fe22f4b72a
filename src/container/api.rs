//! Axum router for the in-container HTTP service (spec §4.6), built the way
//! `build_router` is built in the teacher crate: typed extractors, one
//! handler per endpoint, a uniform JSON envelope, and SSE endpoints
//! returning `axum::response::sse::Sse`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::Stream;
use tower_http::cors::{Any, CorsLayer};

use crate::errors::{ContainerError, ContainerResult};
use crate::git::{self, CheckoutRequest};
use crate::models::*;
use crate::process::ProcessEvent;
use crate::security::validate_path;

use super::state::ContainerState;

pub fn build_router(state: ContainerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/commands", get(commands))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/execute", post(execute))
        .route("/api/execute/stream", post(execute_stream))
        .route("/api/processes/start", post(start_process))
        .route("/api/processes", get(list_processes))
        .route("/api/process/{id}", get(get_process).delete(kill_process))
        .route("/api/process/{id}/logs", get(process_logs))
        .route("/api/process/{id}/logs/stream", get(process_logs_stream))
        .route("/api/files/write", post(write_file))
        .route("/api/files/read", post(read_file))
        .route("/api/files/delete", post(delete_file))
        .route("/api/files/rename", post(rename_file))
        .route("/api/files/move", post(rename_file))
        .route("/api/files/mkdir", post(mkdir))
        .route("/api/ports/expose", post(expose_port))
        .route("/api/ports/unexpose", post(unexpose_port))
        .route("/api/ports", get(list_ports))
        .route("/api/ports/check-ready", post(check_ready_endpoint))
        .route("/api/git/checkout", post(git_checkout))
        .layer(cors)
        .with_state(state)
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        message: "pong".to_string(),
        timestamp: Utc::now(),
        request_id: uuid::Uuid::new_v4().to_string(),
    })
}

async fn commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        available_commands: vec![
            "execute".to_string(),
            "processes".to_string(),
            "files".to_string(),
            "ports".to_string(),
            "git".to_string(),
        ],
        timestamp: Utc::now(),
    })
}

async fn create_session(
    State(state): State<ContainerState>,
    Json(request): Json<CreateSessionRequest>,
) -> Json<CreateSessionResponse> {
    let session = state.sessions.create(request).await;
    Json(CreateSessionResponse {
        success: true,
        session_id: session.id,
        timestamp: Utc::now(),
    })
}

async fn delete_session(
    State(state): State<ContainerState>,
    Path(id): Path<String>,
) -> Json<SimpleSuccessResponse> {
    state.sessions.delete(&id).await;
    Json(SimpleSuccessResponse::now())
}

async fn execute(
    State(state): State<ContainerState>,
    Json(request): Json<ExecuteRequest>,
) -> ContainerResult<Json<ExecuteResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let (cwd, env) = crate::process::resolve_start_context(&session, None, &HashMap::new());

    let snapshot = state
        .processes
        .start(None, request.command.clone(), request.session_id.clone(), cwd, env)
        .await?;

    let timeout = request
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(300));
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let current = state.processes.get(&snapshot.id).await?;
        if current.status.is_terminal() {
            let (stdout, stderr) = state.processes.logs(&snapshot.id).await?;
            return Ok(Json(ExecuteResponse {
                success: current.exit_code == Some(0),
                stdout,
                stderr,
                exit_code: current.exit_code.unwrap_or(-1),
                command: request.command,
                timestamp: Utc::now(),
            }));
        }
        if tokio::time::Instant::now() >= deadline {
            state.processes.kill(&snapshot.id, None).await?;
            let (stdout, stderr) = state.processes.logs(&snapshot.id).await?;
            return Ok(Json(ExecuteResponse {
                success: false,
                stdout,
                stderr,
                exit_code: -1,
                command: request.command,
                timestamp: Utc::now(),
            }));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn execute_stream(
    State(state): State<ContainerState>,
    Json(request): Json<ExecuteRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let (cwd, env) = crate::process::resolve_start_context(&session, None, &HashMap::new());
    let command = request.command.clone();

    let stream = async_stream::stream! {
        let start_event = ExecEvent::Start { command: command.clone(), timestamp: Utc::now() };
        yield Ok(Event::default().data(serde_json::to_string(&start_event).unwrap()));

        let snapshot = match state
            .processes
            .start(None, command.clone(), request.session_id.clone(), cwd, env)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let event = ExecEvent::Error { error: e.to_string(), timestamp: Utc::now() };
                yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                return;
            }
        };

        let (stdout, stderr, exit_code, mut rx) = match state.processes.subscribe(&snapshot.id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let event = ExecEvent::Error { error: e.to_string(), timestamp: Utc::now() };
                yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                return;
            }
        };

        if !stdout.is_empty() {
            let event = ExecEvent::Stdout { data: stdout, timestamp: Utc::now() };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
        }
        if !stderr.is_empty() {
            let event = ExecEvent::Stderr { data: stderr, timestamp: Utc::now() };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
        }
        if let Some(code) = exit_code {
            let event = ExecEvent::Complete { exit_code: code, success: code == 0, timestamp: Utc::now() };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
            return;
        }

        loop {
            match rx.recv().await {
                Ok(ProcessEvent::Stdout(data)) => {
                    let event = ExecEvent::Stdout { data, timestamp: Utc::now() };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                }
                Ok(ProcessEvent::Stderr(data)) => {
                    let event = ExecEvent::Stderr { data, timestamp: Utc::now() };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                }
                Ok(ProcessEvent::Exit(code)) => {
                    let event = ExecEvent::Complete { exit_code: code, success: code == 0, timestamp: Utc::now() };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                    break;
                }
                Err(_) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn start_process(
    State(state): State<ContainerState>,
    Json(request): Json<StartProcessRequest>,
) -> ContainerResult<Json<StartProcessResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let (cwd, env) =
        crate::process::resolve_start_context(&session, request.cwd.as_deref(), &request.env);

    let snapshot = state
        .processes
        .start(
            request.process_id,
            request.command,
            request.session_id,
            cwd,
            env,
        )
        .await?;

    Ok(Json(StartProcessResponse {
        success: true,
        process_id: snapshot.id,
        pid: snapshot.pid,
        timestamp: Utc::now(),
    }))
}

#[derive(serde::Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn list_processes(
    State(state): State<ContainerState>,
    Query(query): Query<SessionQuery>,
) -> Json<ProcessListResponse> {
    let mut processes = state.processes.list().await;
    if let Some(session_id) = query.session_id {
        processes.retain(|process| process.session_id == session_id);
    }
    Json(ProcessListResponse {
        success: true,
        processes,
        timestamp: Utc::now(),
    })
}

async fn get_process(
    State(state): State<ContainerState>,
    Path(id): Path<String>,
) -> ContainerResult<Json<ProcessSnapshot>> {
    Ok(Json(state.processes.get(&id).await?))
}

async fn kill_process(
    State(state): State<ContainerState>,
    Path(id): Path<String>,
) -> ContainerResult<Json<SimpleSuccessResponse>> {
    state.processes.kill(&id, None).await?;
    tracing::info!(process_id = %id, "process killed");
    Ok(Json(SimpleSuccessResponse::now()))
}

async fn process_logs(
    State(state): State<ContainerState>,
    Path(id): Path<String>,
) -> ContainerResult<Json<ProcessLogsResponse>> {
    let (stdout, stderr) = state.processes.logs(&id).await?;
    Ok(Json(ProcessLogsResponse {
        success: true,
        stdout,
        stderr,
        timestamp: Utc::now(),
    }))
}

async fn process_logs_stream(
    State(state): State<ContainerState>,
    Path(id): Path<String>,
) -> ContainerResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (stdout, stderr, exit_code, mut rx) = state.processes.subscribe(&id).await?;
    let process_id = id;

    let stream = async_stream::stream! {
        if !stdout.is_empty() {
            let event = LogEvent::Stdout { process_id: process_id.clone(), data: stdout, timestamp: Utc::now() };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
        }
        if !stderr.is_empty() {
            let event = LogEvent::Stderr { process_id: process_id.clone(), data: stderr, timestamp: Utc::now() };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
        }
        if let Some(code) = exit_code {
            let event = LogEvent::Exit { process_id: process_id.clone(), exit_code: code, timestamp: Utc::now() };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
            return;
        }

        loop {
            match rx.recv().await {
                Ok(ProcessEvent::Stdout(data)) => {
                    let event = LogEvent::Stdout { process_id: process_id.clone(), data, timestamp: Utc::now() };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                }
                Ok(ProcessEvent::Stderr(data)) => {
                    let event = LogEvent::Stderr { process_id: process_id.clone(), data, timestamp: Utc::now() };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                }
                Ok(ProcessEvent::Exit(code)) => {
                    let event = LogEvent::Exit { process_id: process_id.clone(), exit_code: code, timestamp: Utc::now() };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                    break;
                }
                Err(_) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn resolve_target(
    session: &Session,
    path: &str,
    root: &std::path::Path,
) -> ContainerResult<std::path::PathBuf> {
    let candidate = if path.starts_with('/') {
        std::path::PathBuf::from(path)
    } else {
        std::path::PathBuf::from(&session.cwd).join(path)
    };
    validate_path(candidate.to_str().unwrap_or(""), root)
        .ok_or_else(|| ContainerError::PathValidationFailed { path: path.to_string() })
}

async fn write_file(
    State(state): State<ContainerState>,
    Json(request): Json<FileWriteRequest>,
) -> ContainerResult<Json<FileWriteResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let target = resolve_target(&session, &request.path, &state.config.workspace_root)?;

    let bytes = if request.encoding.as_deref() == Some("base64") {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&request.content)
            .map_err(|e| ContainerError::Internal(e.to_string()))?
    } else {
        request.content.into_bytes()
    };

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    tokio::fs::write(&target, &bytes).await?;

    Ok(Json(FileWriteResponse {
        success: true,
        bytes_written: bytes.len(),
        timestamp: Utc::now(),
    }))
}

async fn read_file(
    State(state): State<ContainerState>,
    Json(request): Json<FileReadRequest>,
) -> ContainerResult<Json<FileReadResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let target = resolve_target(&session, &request.path, &state.config.workspace_root)?;

    let bytes = tokio::fs::read(&target).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ContainerError::FileNotFound {
                path: request.path.clone(),
            }
        } else {
            ContainerError::Io(e)
        }
    })?;

    let content = if request.encoding.as_deref() == Some("base64") {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    Ok(Json(FileReadResponse {
        success: true,
        size: bytes.len(),
        content,
        timestamp: Utc::now(),
    }))
}

async fn delete_file(
    State(state): State<ContainerState>,
    Json(request): Json<FileDeleteRequest>,
) -> ContainerResult<Json<SimpleSuccessResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let target = resolve_target(&session, &request.path, &state.config.workspace_root)?;

    let metadata = tokio::fs::metadata(&target).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ContainerError::FileNotFound {
                path: request.path.clone(),
            }
        } else {
            ContainerError::Io(e)
        }
    })?;

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(&target).await?;
    } else {
        tokio::fs::remove_file(&target).await?;
    }

    Ok(Json(SimpleSuccessResponse::now()))
}

async fn rename_file(
    State(state): State<ContainerState>,
    Json(request): Json<FileRenameRequest>,
) -> ContainerResult<Json<SimpleSuccessResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let source = resolve_target(&session, &request.source_path, &state.config.workspace_root)?;
    let destination =
        resolve_target(&session, &request.destination_path, &state.config.workspace_root)?;

    if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
        return Err(ContainerError::FileNotFound {
            path: request.source_path,
        });
    }
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    tokio::fs::rename(&source, &destination).await?;

    Ok(Json(SimpleSuccessResponse::now()))
}

async fn mkdir(
    State(state): State<ContainerState>,
    Json(request): Json<MkdirRequest>,
) -> ContainerResult<Json<SimpleSuccessResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let target = resolve_target(&session, &request.path, &state.config.workspace_root)?;

    if request.recursive {
        tokio::fs::create_dir_all(&target).await?;
    } else {
        tokio::fs::create_dir(&target).await?;
    }

    Ok(Json(SimpleSuccessResponse::now()))
}

async fn expose_port(
    State(state): State<ContainerState>,
    Json(request): Json<ExposePortRequest>,
) -> ContainerResult<Json<ExposePortResponse>> {
    let exposed = state.ports.expose(request.port, request.name).await?;
    tracing::info!(port = exposed.port, "port exposed");
    Ok(Json(ExposePortResponse {
        success: true,
        port: exposed.port,
        name: exposed.name,
        token: exposed.token,
        exposed_at: exposed.exposed_at,
        timestamp: Utc::now(),
    }))
}

async fn unexpose_port(
    State(state): State<ContainerState>,
    Json(request): Json<UnexposePortRequest>,
) -> ContainerResult<Json<SimpleSuccessResponse>> {
    state.ports.unexpose(request.port).await?;
    tracing::info!(port = request.port, "port unexposed");
    Ok(Json(SimpleSuccessResponse::now()))
}

async fn list_ports(
    State(state): State<ContainerState>,
    Query(_query): Query<SessionQuery>,
) -> Json<PortListResponse> {
    Json(PortListResponse {
        success: true,
        ports: state.ports.list().await,
        timestamp: Utc::now(),
    })
}

async fn check_ready_endpoint(Json(request): Json<CheckReadyRequest>) -> Json<CheckReadyResponse> {
    let response = crate::ports::check_ready(
        request.port,
        request.mode,
        &request.path,
        request.status_min,
        request.status_max,
    )
    .await;
    Json(response)
}

async fn git_checkout(
    State(state): State<ContainerState>,
    Json(request): Json<GitCheckoutRequest>,
) -> ContainerResult<Json<GitCheckoutResponse>> {
    let session = state.sessions.get_or_create_default(&request.session_id).await;
    let target_dir = request
        .target_dir
        .clone()
        .unwrap_or_else(|| format!("{}/repo", session.cwd));
    let target = resolve_target(&session, &target_dir, &state.config.workspace_root)?;

    let outcome = git::checkout(CheckoutRequest {
        repo_url: &request.repo_url,
        branch: request.branch.as_deref(),
        target_dir: &target,
        depth: request.depth,
        allowlist: state.config.git_host_allowlist.as_deref(),
    })
    .await?;

    Ok(Json(GitCheckoutResponse {
        success: true,
        output: outcome.output,
        exit_code: outcome.exit_code,
        target_dir: target.to_string_lossy().into_owned(),
        timestamp: Utc::now(),
    }))
}
