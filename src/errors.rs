//! Typed error hierarchy shared by the in-container HTTP service, the
//! control plane, and the client façade.
//!
//! The in-container service always responds with a structured JSON envelope
//! carrying a stable `code`; the control plane decodes that code into
//! [`ClientError`], and the client façade throws the typed variant. Errors
//! never cross the control-plane boundary untyped.

use axum::http::header;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// JSON envelope returned by every in-container endpoint on failure. The
/// control plane decodes this (via [`Deserialize`]) to build a [`ClientError`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorBody {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            code: code.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Errors raised by the in-container HTTP service (`src/container`).
///
/// `code()` is the stable string the control plane decodes into a
/// [`ClientError`]; `status()` is the HTTP status per spec §6.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("file not found: {path}")]
    FileNotFound { path: String },
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },
    #[error("command not found: {command}")]
    CommandNotFound { command: String },
    #[error("process not found: {id}")]
    ProcessNotFound { id: String },
    #[error("session not found: {id}")]
    SessionNotFound { id: String },
    #[error("port {port} is already exposed")]
    PortAlreadyExposed { port: u16 },
    #[error("port {port} is not exposed")]
    PortNotExposed { port: u16 },
    #[error("invalid port: {port}")]
    InvalidPort { port: u32 },
    #[error("invalid git url: {url}")]
    InvalidGitUrl { url: String, reasons: Vec<String> },
    #[error("git repository not found: {url}")]
    GitRepositoryNotFound { url: String },
    #[error("git authentication failed: {url}")]
    GitAuthenticationFailed { url: String },
    #[error("git branch not found: {branch}")]
    GitBranchNotFound { branch: String },
    #[error("git clone failed: {stderr}")]
    GitCloneFailed { stderr: String, exit_code: i32 },
    #[error("git checkout failed: {stderr}")]
    GitCheckoutFailed { stderr: String },
    #[error("git network error: {message}")]
    GitNetworkError { message: String },
    #[error("git operation failed: {message}")]
    GitOperationFailed { message: String },
    #[error("path validation failed: {path}")]
    PathValidationFailed { path: String },
    #[error("invalid id: {id}")]
    InvalidId { id: String },
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    pub fn code(&self) -> &'static str {
        match self {
            ContainerError::FileNotFound { .. } => "FILE_NOT_FOUND",
            ContainerError::PermissionDenied { .. } => "PERMISSION_DENIED",
            ContainerError::CommandNotFound { .. } => "COMMAND_NOT_FOUND",
            ContainerError::ProcessNotFound { .. } => "PROCESS_NOT_FOUND",
            ContainerError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            ContainerError::PortAlreadyExposed { .. } => "PORT_ALREADY_EXPOSED",
            ContainerError::PortNotExposed { .. } => "PORT_NOT_EXPOSED",
            ContainerError::InvalidPort { .. } => "INVALID_PORT",
            ContainerError::InvalidGitUrl { .. } => "INVALID_GIT_URL",
            ContainerError::GitRepositoryNotFound { .. } => "GIT_REPOSITORY_NOT_FOUND",
            ContainerError::GitAuthenticationFailed { .. } => "GIT_AUTHENTICATION_FAILED",
            ContainerError::GitBranchNotFound { .. } => "GIT_BRANCH_NOT_FOUND",
            ContainerError::GitCloneFailed { .. } => "GIT_CLONE_FAILED",
            ContainerError::GitCheckoutFailed { .. } => "GIT_CHECKOUT_FAILED",
            ContainerError::GitNetworkError { .. } => "GIT_NETWORK_ERROR",
            ContainerError::GitOperationFailed { .. } => "GIT_OPERATION_FAILED",
            ContainerError::PathValidationFailed { .. } => "PATH_VALIDATION_FAILED",
            ContainerError::InvalidId { .. } => "INVALID_ID",
            ContainerError::Internal(_) => "INTERNAL_ERROR",
            ContainerError::Io(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ContainerError::FileNotFound { .. }
            | ContainerError::ProcessNotFound { .. }
            | ContainerError::SessionNotFound { .. }
            | ContainerError::GitBranchNotFound { .. }
            | ContainerError::PortNotExposed { .. }
            | ContainerError::GitRepositoryNotFound { .. } => StatusCode::NOT_FOUND,
            ContainerError::PermissionDenied { .. }
            | ContainerError::GitAuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
            ContainerError::CommandNotFound { .. }
            | ContainerError::InvalidPort { .. }
            | ContainerError::InvalidGitUrl { .. }
            | ContainerError::PathValidationFailed { .. }
            | ContainerError::InvalidId { .. } => StatusCode::BAD_REQUEST,
            ContainerError::PortAlreadyExposed { .. } => StatusCode::CONFLICT,
            ContainerError::GitCloneFailed { .. }
            | ContainerError::GitCheckoutFailed { .. }
            | ContainerError::GitNetworkError { .. }
            | ContainerError::GitOperationFailed { .. }
            | ContainerError::Internal(_)
            | ContainerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ContainerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::new(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;

/// Closed client-facing error hierarchy (spec §4.8). Every variant carries
/// enough context for the caller to react without re-parsing strings.
#[derive(Debug, Error, Clone)]
pub enum ClientError {
    #[error("file not found: {path}")]
    FileNotFound { path: String },
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },
    #[error("command not found: {command}")]
    CommandNotFound { command: String },
    #[error("process not found: {process_id}")]
    ProcessNotFound { process_id: String },
    #[error("session not found: {id}")]
    SessionNotFound { id: String },
    #[error("port {port} is already exposed")]
    PortAlreadyExposed { port: u16 },
    #[error("port {port} is not exposed")]
    PortNotExposed { port: u16 },
    #[error("invalid port: {port}")]
    InvalidPort { port: u32 },
    #[error("invalid git url: {url}")]
    InvalidGitUrl { url: String },
    #[error("git repository not found: {url}")]
    GitRepositoryNotFound { url: String },
    #[error("git authentication failed: {url}")]
    GitAuthenticationFailed { url: String },
    #[error("git branch not found: {branch}")]
    GitBranchNotFound { branch: String },
    #[error("git clone failed: {message}")]
    GitCloneFailed { message: String },
    #[error("git checkout failed: {message}")]
    GitCheckoutFailed { message: String },
    #[error("git network error: {message}")]
    GitNetworkError { message: String },
    #[error("git operation failed: {message}")]
    GitOperationFailed { message: String },
    #[error("process {process_id} did not become ready before {condition}")]
    ProcessReadyTimeout {
        process_id: String,
        condition: String,
    },
    #[error("process {process_id} exited with code {exit_code} before becoming ready")]
    ProcessExitedBeforeReady {
        process_id: String,
        exit_code: i32,
        logs: String,
    },
    #[error("custom domain required to expose port {port} on {hostname}")]
    CustomDomainRequired { port: u16, hostname: String },
    #[error("invalid sandbox id: {id}")]
    InvalidId { id: String },
    #[error("path validation failed: {path}")]
    PathValidationFailed { path: String },
    #[error("transient startup error, retry after {retry_after_secs}s: {message}")]
    Transient {
        message: String,
        retry_after_secs: u64,
    },
    #[error("no container instance available, retry after {retry_after_secs}s: {message}")]
    NoInstance {
        message: String,
        retry_after_secs: u64,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::FileNotFound { .. } => "FILE_NOT_FOUND",
            ClientError::PermissionDenied { .. } => "PERMISSION_DENIED",
            ClientError::CommandNotFound { .. } => "COMMAND_NOT_FOUND",
            ClientError::ProcessNotFound { .. } => "PROCESS_NOT_FOUND",
            ClientError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            ClientError::PortAlreadyExposed { .. } => "PORT_ALREADY_EXPOSED",
            ClientError::PortNotExposed { .. } => "PORT_NOT_EXPOSED",
            ClientError::InvalidPort { .. } => "INVALID_PORT",
            ClientError::InvalidGitUrl { .. } => "INVALID_GIT_URL",
            ClientError::GitRepositoryNotFound { .. } => "GIT_REPOSITORY_NOT_FOUND",
            ClientError::GitAuthenticationFailed { .. } => "GIT_AUTHENTICATION_FAILED",
            ClientError::GitBranchNotFound { .. } => "GIT_BRANCH_NOT_FOUND",
            ClientError::GitCloneFailed { .. } => "GIT_CLONE_FAILED",
            ClientError::GitCheckoutFailed { .. } => "GIT_CHECKOUT_FAILED",
            ClientError::GitNetworkError { .. } => "GIT_NETWORK_ERROR",
            ClientError::GitOperationFailed { .. } => "GIT_OPERATION_FAILED",
            ClientError::ProcessReadyTimeout { .. } => "PROCESS_READY_TIMEOUT",
            ClientError::ProcessExitedBeforeReady { .. } => "PROCESS_EXITED_BEFORE_READY",
            ClientError::CustomDomainRequired { .. } => "CUSTOM_DOMAIN_REQUIRED",
            ClientError::InvalidId { .. } => "INVALID_ID",
            ClientError::PathValidationFailed { .. } => "PATH_VALIDATION_FAILED",
            ClientError::Transient { .. } => "TRANSIENT",
            ClientError::NoInstance { .. } => "NO_INSTANCE",
            ClientError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Decode a container error envelope (`code`, `error`) into the closed
    /// client hierarchy. `context` carries whatever the call site already
    /// knows (path, port, process id, …) since the wire message alone does
    /// not always name it structurally.
    pub fn from_container(code: &str, message: &str, context: ErrorContext) -> Self {
        match code {
            "FILE_NOT_FOUND" => ClientError::FileNotFound {
                path: context.path.unwrap_or_else(|| message.to_string()),
            },
            "PERMISSION_DENIED" => ClientError::PermissionDenied {
                path: context.path.unwrap_or_else(|| message.to_string()),
            },
            "COMMAND_NOT_FOUND" => ClientError::CommandNotFound {
                command: context.command.unwrap_or_else(|| message.to_string()),
            },
            "PROCESS_NOT_FOUND" => ClientError::ProcessNotFound {
                process_id: context.process_id.unwrap_or_else(|| message.to_string()),
            },
            "SESSION_NOT_FOUND" => ClientError::SessionNotFound {
                id: context.id.unwrap_or_else(|| message.to_string()),
            },
            "PORT_ALREADY_EXPOSED" => ClientError::PortAlreadyExposed {
                port: context.port.unwrap_or(0),
            },
            "PORT_NOT_EXPOSED" => ClientError::PortNotExposed {
                port: context.port.unwrap_or(0),
            },
            "INVALID_PORT" => ClientError::InvalidPort {
                port: context.port.unwrap_or(0) as u32,
            },
            "INVALID_GIT_URL" => ClientError::InvalidGitUrl {
                url: message.to_string(),
            },
            "GIT_REPOSITORY_NOT_FOUND" => ClientError::GitRepositoryNotFound {
                url: message.to_string(),
            },
            "GIT_AUTHENTICATION_FAILED" => ClientError::GitAuthenticationFailed {
                url: message.to_string(),
            },
            "GIT_BRANCH_NOT_FOUND" => ClientError::GitBranchNotFound {
                branch: message.to_string(),
            },
            "GIT_CLONE_FAILED" => ClientError::GitCloneFailed {
                message: message.to_string(),
            },
            "GIT_CHECKOUT_FAILED" => ClientError::GitCheckoutFailed {
                message: message.to_string(),
            },
            "GIT_NETWORK_ERROR" => ClientError::GitNetworkError {
                message: message.to_string(),
            },
            "GIT_OPERATION_FAILED" => ClientError::GitOperationFailed {
                message: message.to_string(),
            },
            "PATH_VALIDATION_FAILED" => ClientError::PathValidationFailed {
                path: context.path.unwrap_or_else(|| message.to_string()),
            },
            "INVALID_ID" => ClientError::InvalidId {
                id: context.id.unwrap_or_else(|| message.to_string()),
            },
            _ => ClientError::Internal(format!("{code}: {message}")),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::FileNotFound { .. }
            | ClientError::ProcessNotFound { .. }
            | ClientError::SessionNotFound { .. }
            | ClientError::GitBranchNotFound { .. }
            | ClientError::PortNotExposed { .. }
            | ClientError::GitRepositoryNotFound { .. } => StatusCode::NOT_FOUND,
            ClientError::PermissionDenied { .. }
            | ClientError::GitAuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
            ClientError::CommandNotFound { .. }
            | ClientError::InvalidPort { .. }
            | ClientError::InvalidGitUrl { .. }
            | ClientError::PathValidationFailed { .. }
            | ClientError::InvalidId { .. }
            | ClientError::CustomDomainRequired { .. } => StatusCode::BAD_REQUEST,
            ClientError::PortAlreadyExposed { .. } => StatusCode::CONFLICT,
            ClientError::ProcessReadyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ClientError::ProcessExitedBeforeReady { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ClientError::Transient { .. } | ClientError::NoInstance { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ClientError::GitCloneFailed { .. }
            | ClientError::GitCheckoutFailed { .. }
            | ClientError::GitNetworkError { .. }
            | ClientError::GitOperationFailed { .. }
            | ClientError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ClientError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            ClientError::Transient { retry_after_secs, .. }
            | ClientError::NoInstance { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody::new(self.code(), self.to_string());
        match retry_after {
            Some(secs) => {
                ([(header::RETRY_AFTER, secs.to_string())], status, Json(body)).into_response()
            }
            None => (status, Json(body)).into_response(),
        }
    }
}

/// Whatever the call site already knows about the request, used to enrich
/// [`ClientError::from_container`] beyond the bare wire message.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub path: Option<String>,
    pub command: Option<String>,
    pub process_id: Option<String>,
    pub id: Option<String>,
    pub port: Option<u16>,
}

pub type ClientResult<T> = Result<T, ClientError>;
