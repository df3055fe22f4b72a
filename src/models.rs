//! Data model shared by the in-container HTTP service, the control plane,
//! and the client façade (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `{cwd, env}` context used to scope operations inside the container.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: String,
    pub cwd: String,
    pub env: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionResponse {
    pub success: bool,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SimpleSuccessResponse {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl SimpleSuccessResponse {
    pub fn now() -> Self {
        Self {
            success: true,
            timestamp: Utc::now(),
        }
    }
}

/// Process lifecycle state (spec §3, §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Killed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Killed
        )
    }
}

/// Externally visible snapshot of a process record (no buffers/subscribers).
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProcessSnapshot {
    pub id: String,
    pub pid: Option<u32>,
    pub command: String,
    pub status: ProcessStatus,
    #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StartProcessRequest {
    pub command: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "processId")]
    pub process_id: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub background: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StartProcessResponse {
    pub success: bool,
    #[serde(rename = "processId")]
    pub process_id: String,
    pub pid: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProcessListResponse {
    pub success: bool,
    pub processes: Vec<ProcessSnapshot>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProcessLogsResponse {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timestamp: DateTime<Utc>,
}

/// `ExecEvent`: SSE event for `/api/execute/stream`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecEvent {
    Start {
        command: String,
        timestamp: DateTime<Utc>,
    },
    Stdout {
        data: String,
        timestamp: DateTime<Utc>,
    },
    Stderr {
        data: String,
        timestamp: DateTime<Utc>,
    },
    Complete {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// `LogEvent`: SSE event for `/api/process/:id/logs/stream`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEvent {
    Stdout {
        #[serde(rename = "processId")]
        process_id: String,
        data: String,
        timestamp: DateTime<Utc>,
    },
    Stderr {
        #[serde(rename = "processId")]
        process_id: String,
        data: String,
        timestamp: DateTime<Utc>,
    },
    Exit {
        #[serde(rename = "processId")]
        process_id: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
        timestamp: DateTime<Utc>,
    },
}

/// Marker inserted into a log stream (once per stream, per overflow) when a
/// ring buffer drops bytes. Distinguishable from program output but its wire
/// form is otherwise unspecified (spec §9 open question).
pub const BUFFER_OVERFLOW_MARKER: &str = "\u{0}[buffer-overflow: earlier output truncated]\u{0}";

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExecuteRequest {
    pub command: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExecuteResponse {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FileWriteRequest {
    pub path: String,
    pub content: String,
    pub encoding: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FileWriteResponse {
    pub success: bool,
    #[serde(rename = "bytesWritten")]
    pub bytes_written: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FileReadRequest {
    pub path: String,
    pub encoding: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FileReadResponse {
    pub success: bool,
    pub content: String,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FileDeleteRequest {
    pub path: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FileRenameRequest {
    #[serde(rename = "sourcePath")]
    pub source_path: String,
    #[serde(rename = "destinationPath")]
    pub destination_path: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MkdirRequest {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Exposed port entry, public view (no token).
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExposedPortPublic {
    pub port: u16,
    pub name: Option<String>,
    #[serde(rename = "exposedAt")]
    pub exposed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExposePortRequest {
    pub port: u16,
    pub name: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExposePortResponse {
    pub success: bool,
    pub port: u16,
    pub name: Option<String>,
    pub token: String,
    #[serde(rename = "exposedAt")]
    pub exposed_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UnexposePortRequest {
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PortListResponse {
    pub success: bool,
    pub ports: Vec<ExposedPortPublic>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadyMode {
    Tcp,
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckReadyRequest {
    pub port: u16,
    #[serde(default = "default_ready_mode")]
    pub mode: ReadyMode,
    #[serde(default = "default_ready_path")]
    pub path: String,
    #[serde(rename = "statusMin", default = "default_status_min")]
    pub status_min: u16,
    #[serde(rename = "statusMax", default = "default_status_max")]
    pub status_max: u16,
}

fn default_ready_mode() -> ReadyMode {
    ReadyMode::Http
}
fn default_ready_path() -> String {
    "/".to_string()
}
fn default_status_min() -> u16 {
    200
}
fn default_status_max() -> u16 {
    399
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckReadyResponse {
    pub ready: bool,
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct GitCheckoutRequest {
    #[serde(rename = "repoUrl")]
    pub repo_url: String,
    pub branch: Option<String>,
    #[serde(rename = "targetDir")]
    pub target_dir: Option<String>,
    pub depth: Option<u32>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct GitCheckoutResponse {
    pub success: bool,
    pub output: String,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    #[serde(rename = "targetDir")]
    pub target_dir: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PingResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandsResponse {
    #[serde(rename = "availableCommands")]
    pub available_commands: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
