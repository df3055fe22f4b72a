//! The per-sandbox control-plane instance (spec §4.7). Mirrors the
//! teacher's `SandboxService` trait + `AppState` composition, except the
//! "service" here is the in-container HTTP API reached over `reqwest`
//! rather than a local `bubblewrap` child process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::errors::{ClientError, ClientResult, ErrorBody, ErrorContext};
use crate::models::*;

use super::preview::{build_preview_url, PreviewConfig};
use super::startup::{classify_startup_failure, StartupClassification};

/// The actual container runtime (process isolation, image supply) is
/// outside this crate's scope (spec §1 "Deliberately out of scope"); this
/// trait is the seam a host environment implements to start/monitor/stop one.
#[async_trait::async_trait]
pub trait ContainerLifecycle: Send + Sync {
    async fn ensure_started(&self) -> Result<(), String>;
    async fn is_healthy(&self) -> bool;
    /// Called once the idle timer elapses without `keepAlive` set (spec §5
    /// "Sleep & renewal"). A host that never wants to reclaim idle
    /// containers can make this a no-op.
    async fn stop(&self);
}

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const READY_WAIT_BUDGET: Duration = Duration::from_secs(30);
const DEFAULT_SLEEP_AFTER: Duration = Duration::from_secs(3 * 60);

pub struct ControlPlane {
    sandbox_id: String,
    control_plane_port: u16,
    client: reqwest::Client,
    lifecycle: Arc<dyn ContainerLifecycle>,
    container_base_url: Mutex<String>,
    default_session_id: Mutex<String>,
    sandbox_name: Mutex<Option<String>>,
    default_env: Mutex<HashMap<String, String>>,
    hostname: Mutex<Option<String>>,
    port_tokens: Mutex<HashMap<u16, String>>,
    sleep_after: Mutex<Duration>,
    keep_alive: Mutex<bool>,
    last_activity: Mutex<tokio::time::Instant>,
}

impl ControlPlane {
    pub fn new(
        sandbox_id: impl Into<String>,
        container_base_url: impl Into<String>,
        control_plane_port: u16,
        lifecycle: Arc<dyn ContainerLifecycle>,
    ) -> Self {
        let sandbox_id = sandbox_id.into();
        let default_session_id = format!("sandbox-{sandbox_id}");
        Self {
            sandbox_id,
            control_plane_port,
            client: reqwest::Client::new(),
            lifecycle,
            container_base_url: Mutex::new(container_base_url.into()),
            default_session_id: Mutex::new(default_session_id),
            sandbox_name: Mutex::new(None),
            default_env: Mutex::new(HashMap::new()),
            hostname: Mutex::new(None),
            port_tokens: Mutex::new(HashMap::new()),
            sleep_after: Mutex::new(DEFAULT_SLEEP_AFTER),
            keep_alive: Mutex::new(false),
            last_activity: Mutex::new(tokio::time::Instant::now()),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub async fn default_session_id(&self) -> String {
        self.default_session_id.lock().await.clone()
    }

    /// `createSession` rebinds a caller to an explicit sub-session without
    /// mutating the default.
    pub async fn set_default_session_id(&self, id: String) {
        *self.default_session_id.lock().await = id;
    }

    /// `setSandboxName(name)`: display metadata only, no container call.
    pub async fn set_sandbox_name(&self, name: String) {
        *self.sandbox_name.lock().await = Some(name);
    }

    pub async fn sandbox_name(&self) -> Option<String> {
        self.sandbox_name.lock().await.clone()
    }

    /// `setBaseUrl(url)`: rebind the control plane to a different container
    /// instance (spec §6), e.g. after the host relocates it.
    pub async fn set_base_url(&self, url: String) {
        *self.container_base_url.lock().await = url;
    }

    /// `setEnvVars(env)`: merged into every subsequent `createSession` call
    /// that doesn't already set the same key.
    pub async fn set_env_vars(&self, env: HashMap<String, String>) {
        self.default_env.lock().await.extend(env);
    }

    /// `setSleepAfter(d)`: idle budget before the host may stop the
    /// container (spec §5 "Sleep & renewal").
    pub async fn set_sleep_after(&self, duration: Duration) {
        *self.sleep_after.lock().await = duration;
    }

    /// `setKeepAlive(bool)`: `true` suppresses idle-based sleep entirely.
    pub async fn set_keep_alive(&self, keep_alive: bool) {
        *self.keep_alive.lock().await = keep_alive;
    }

    /// Any inbound call or streaming chunk renews the idle timer, throttled
    /// implicitly by only ever being called from [`Self::request`] and
    /// [`super::streaming::supervise`]'s renewal hook.
    async fn renew_activity(&self) {
        *self.last_activity.lock().await = tokio::time::Instant::now();
    }

    /// `true` once `sleepAfter` has elapsed since the last renewed activity
    /// and `keepAlive` is not set. The host's server loop polls this to
    /// decide when to call [`ContainerLifecycle::stop`].
    pub async fn should_sleep(&self) -> bool {
        if *self.keep_alive.lock().await {
            return false;
        }
        let idle_for = self.last_activity.lock().await.elapsed();
        idle_for >= *self.sleep_after.lock().await
    }

    pub async fn stop_if_idle(&self) {
        if self.should_sleep().await {
            self.lifecycle.stop().await;
        }
    }

    /// The outward hostname is captured from the first inbound request this
    /// instance serves (spec §4.7 "the first request captures the outward
    /// hostname for preview-URL construction"); the RPC server layer calls
    /// this once it knows it.
    pub async fn capture_hostname(&self, host: &str) {
        let mut hostname = self.hostname.lock().await;
        if hostname.is_none() {
            *hostname = Some(host.to_string());
        }
    }

    /// The bare host (no scheme, no port) the container is reachable on,
    /// used to build the `connect(portOrPath)` tunnel target.
    pub async fn container_host(&self) -> String {
        let base = self.container_base_url.lock().await.clone();
        let without_scheme = base.split("://").nth(1).unwrap_or(&base);
        without_scheme.split(':').next().unwrap_or(without_scheme).to_string()
    }

    pub async fn preview_url(&self, port: u16) -> ClientResult<String> {
        let hostname = self.hostname.lock().await.clone().ok_or_else(|| {
            ClientError::Internal("no hostname captured yet for preview URL".to_string())
        })?;
        build_preview_url(&PreviewConfig::new(hostname), port, &self.sandbox_id)
    }

    /// Block until the container is healthy and answering `/api/ping`,
    /// bounded by [`READY_WAIT_BUDGET`] (spec §4.7 "Startup").
    pub async fn ensure_ready(&self) -> ClientResult<()> {
        let deadline = tokio::time::Instant::now() + READY_WAIT_BUDGET;
        loop {
            if self.lifecycle.is_healthy().await {
                let base = self.container_base_url.lock().await.clone();
                let url = format!("{base}/api/ping");
                match self.client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => return Ok(()),
                    Ok(_) | Err(_) => {}
                }
            } else if let Err(message) = self.lifecycle.ensure_started().await {
                let err = classify_to_client_error(&message);
                tracing::warn!(sandbox_id = %self.sandbox_id, code = err.code(), "container not ready");
                return Err(err);
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(sandbox_id = %self.sandbox_id, "timed out waiting for container to become ready");
                return Err(ClientError::Transient {
                    message: "timed out waiting for container to become ready".to_string(),
                    retry_after_secs: 3,
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    fn classify_transport_error(&self, error: &reqwest::Error) -> ClientError {
        if error.is_timeout() || error.is_connect() {
            return ClientError::Transient {
                message: error.to_string(),
                retry_after_secs: 3,
            };
        }
        classify_to_client_error(&error.to_string())
    }

    async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        context: ErrorContext,
    ) -> ClientResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.ensure_ready().await?;
        self.renew_activity().await;
        let base = self.container_base_url.lock().await.clone();
        let url = format!("{base}{path}");
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.classify_transport_error(&e))?;
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Internal(e.to_string()))
        } else {
            match response.json::<ErrorBody>().await {
                Ok(body) => Err(ClientError::from_container(&body.code, &body.error, context)),
                Err(_) => Err(ClientError::Internal(format!("container returned {status}"))),
            }
        }
    }

    pub async fn ping(&self) -> ClientResult<PingResponse> {
        self.request(Method::GET, "/api/ping", None::<&()>, ErrorContext::default())
            .await
    }

    pub async fn create_session(
        &self,
        mut request: CreateSessionRequest,
    ) -> ClientResult<CreateSessionResponse> {
        for (key, value) in self.default_env.lock().await.iter() {
            request.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.request(
            Method::POST,
            "/api/sessions",
            Some(&request),
            ErrorContext::default(),
        )
        .await
    }

    pub async fn delete_session(&self, id: &str) -> ClientResult<SimpleSuccessResponse> {
        self.request(
            Method::DELETE,
            &format!("/api/sessions/{id}"),
            None::<&()>,
            ErrorContext {
                id: Some(id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn execute(&self, request: &ExecuteRequest) -> ClientResult<ExecuteResponse> {
        self.request(
            Method::POST,
            "/api/execute",
            Some(request),
            ErrorContext {
                command: Some(request.command.clone()),
                ..Default::default()
            },
        )
        .await
    }

    /// Raw SSE byte stream for `/api/execute/stream`; wrap with
    /// [`super::streaming::supervise`] before handing to a caller.
    pub async fn execute_stream(
        &self,
        request: &ExecuteRequest,
    ) -> ClientResult<impl Stream<Item = Result<Vec<u8>, ClientError>>> {
        self.raw_sse_stream("/api/execute/stream", request).await
    }

    pub async fn start_process(
        &self,
        request: StartProcessRequest,
    ) -> ClientResult<StartProcessResponse> {
        self.request(
            Method::POST,
            "/api/processes/start",
            Some(&request),
            ErrorContext {
                command: Some(request.command.clone()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn list_processes(
        &self,
        session_id: Option<&str>,
    ) -> ClientResult<ProcessListResponse> {
        let path = match session_id {
            Some(id) => format!("/api/processes?sessionId={id}"),
            None => "/api/processes".to_string(),
        };
        self.request(Method::GET, &path, None::<&()>, ErrorContext::default())
            .await
    }

    pub async fn get_process(&self, id: &str) -> ClientResult<ProcessSnapshot> {
        self.request(
            Method::GET,
            &format!("/api/process/{id}"),
            None::<&()>,
            ErrorContext {
                process_id: Some(id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn kill_process(&self, id: &str) -> ClientResult<SimpleSuccessResponse> {
        self.request(
            Method::DELETE,
            &format!("/api/process/{id}"),
            None::<&()>,
            ErrorContext {
                process_id: Some(id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn get_process_logs(&self, id: &str) -> ClientResult<ProcessLogsResponse> {
        self.request(
            Method::GET,
            &format!("/api/process/{id}/logs"),
            None::<&()>,
            ErrorContext {
                process_id: Some(id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Raw SSE byte stream for `/api/process/:id/logs/stream`.
    pub async fn stream_process_logs(
        &self,
        id: &str,
    ) -> ClientResult<impl Stream<Item = Result<Vec<u8>, ClientError>>> {
        self.raw_sse_get_stream(&format!("/api/process/{id}/logs/stream"))
            .await
    }

    pub async fn write_file(&self, request: &FileWriteRequest) -> ClientResult<FileWriteResponse> {
        self.request(
            Method::POST,
            "/api/files/write",
            Some(request),
            ErrorContext {
                path: Some(request.path.clone()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn read_file(&self, request: &FileReadRequest) -> ClientResult<FileReadResponse> {
        self.request(
            Method::POST,
            "/api/files/read",
            Some(request),
            ErrorContext {
                path: Some(request.path.clone()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_file(
        &self,
        request: &FileDeleteRequest,
    ) -> ClientResult<SimpleSuccessResponse> {
        self.request(
            Method::POST,
            "/api/files/delete",
            Some(request),
            ErrorContext {
                path: Some(request.path.clone()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn rename_file(
        &self,
        request: &FileRenameRequest,
    ) -> ClientResult<SimpleSuccessResponse> {
        self.request(
            Method::POST,
            "/api/files/rename",
            Some(request),
            ErrorContext {
                path: Some(request.source_path.clone()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn mkdir(&self, request: &MkdirRequest) -> ClientResult<SimpleSuccessResponse> {
        self.request(
            Method::POST,
            "/api/files/mkdir",
            Some(request),
            ErrorContext {
                path: Some(request.path.clone()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn expose_port(
        &self,
        request: ExposePortRequest,
    ) -> ClientResult<ExposePortResponse> {
        let port = request.port;
        let response: ExposePortResponse = self
            .request(
                Method::POST,
                "/api/ports/expose",
                Some(&request),
                ErrorContext {
                    port: Some(port),
                    ..Default::default()
                },
            )
            .await?;
        self.port_tokens
            .lock()
            .await
            .insert(port, response.token.clone());
        Ok(response)
    }

    pub async fn unexpose_port(&self, port: u16) -> ClientResult<SimpleSuccessResponse> {
        let response = self
            .request(
                Method::POST,
                "/api/ports/unexpose",
                Some(&UnexposePortRequest { port }),
                ErrorContext {
                    port: Some(port),
                    ..Default::default()
                },
            )
            .await?;
        self.port_tokens.lock().await.remove(&port);
        Ok(response)
    }

    pub async fn list_ports(&self) -> ClientResult<PortListResponse> {
        self.request(Method::GET, "/api/ports", None::<&()>, ErrorContext::default())
            .await
    }

    /// Used by the front-end router to authenticate an incoming preview
    /// request before proxying (spec §4.7 "Token validation").
    pub async fn validate_port_token(&self, port: u16, token: &str) -> bool {
        self.port_tokens
            .lock()
            .await
            .get(&port)
            .map(|expected| expected == token)
            .unwrap_or(false)
    }

    pub async fn check_ready(
        &self,
        request: &CheckReadyRequest,
    ) -> ClientResult<CheckReadyResponse> {
        self.request(
            Method::POST,
            "/api/ports/check-ready",
            Some(request),
            ErrorContext {
                port: Some(request.port),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn git_checkout(
        &self,
        request: &GitCheckoutRequest,
    ) -> ClientResult<GitCheckoutResponse> {
        self.request(
            Method::POST,
            "/api/git/checkout",
            Some(request),
            ErrorContext::default(),
        )
        .await
    }

    /// Target URL for `connect(portOrPath)`; actual tunneling happens at the
    /// WebSocket-upgrade call site (see [`super::connect::tunnel`]).
    pub fn connect_target(&self, container_host: &str, port_or_path: &str) -> ClientResult<String> {
        super::connect::resolve_connect_target(container_host, self.control_plane_port, port_or_path)
    }

    async fn raw_sse_stream<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<impl Stream<Item = Result<Vec<u8>, ClientError>>> {
        self.ensure_ready().await?;
        self.renew_activity().await;
        let base = self.container_base_url.lock().await.clone();
        let url = format!("{base}{path}");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(&e))?;
        self.into_byte_stream(response).await
    }

    async fn raw_sse_get_stream(
        &self,
        path: &str,
    ) -> ClientResult<impl Stream<Item = Result<Vec<u8>, ClientError>>> {
        self.ensure_ready().await?;
        self.renew_activity().await;
        let base = self.container_base_url.lock().await.clone();
        let url = format!("{base}{path}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(&e))?;
        self.into_byte_stream(response).await
    }

    async fn into_byte_stream(
        &self,
        response: reqwest::Response,
    ) -> ClientResult<impl Stream<Item = Result<Vec<u8>, ClientError>>> {
        if !response.status().is_success() {
            let status = response.status();
            return match response.json::<ErrorBody>().await {
                Ok(body) => Err(ClientError::from_container(
                    &body.code,
                    &body.error,
                    ErrorContext::default(),
                )),
                Err(_) => Err(ClientError::Internal(format!("container returned {status}"))),
            };
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| ClientError::Internal(e.to_string()))))
    }
}

fn classify_to_client_error(message: &str) -> ClientError {
    match classify_startup_failure(message) {
        StartupClassification::Transient { retry_after_secs } => ClientError::Transient {
            message: message.to_string(),
            retry_after_secs,
        },
        StartupClassification::NoInstance { retry_after_secs } => ClientError::NoInstance {
            message: message.to_string(),
            retry_after_secs,
        },
        StartupClassification::Permanent => ClientError::Internal(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    struct NeverStarts;

    #[async_trait::async_trait]
    impl ContainerLifecycle for NeverStarts {
        async fn ensure_started(&self) -> Result<(), String> {
            Err("no container instance available".to_string())
        }
        async fn is_healthy(&self) -> bool {
            false
        }
        async fn stop(&self) {}
    }

    #[tokio::test]
    async fn preview_url_requires_captured_hostname() {
        let plane = ControlPlane::new("sb1", "http://127.0.0.1:1", 3000, Arc::new(AlwaysHealthy));
        let err = plane.preview_url(8080).await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        plane.capture_hostname("example.com").await;
        let url = plane.preview_url(8080).await.unwrap();
        assert_eq!(url, "https://8080-sb1.example.com");
    }

    #[tokio::test]
    async fn port_token_round_trips_through_cache() {
        let plane = ControlPlane::new("sb1", "http://127.0.0.1:1", 3000, Arc::new(AlwaysHealthy));
        plane.port_tokens.lock().await.insert(8080, "secret".to_string());
        assert!(plane.validate_port_token(8080, "secret").await);
        assert!(!plane.validate_port_token(8080, "wrong").await);
        assert!(!plane.validate_port_token(9999, "secret").await);
    }

    #[tokio::test]
    async fn keep_alive_suppresses_idle_sleep() {
        let plane = ControlPlane::new("sb1", "http://127.0.0.1:1", 3000, Arc::new(AlwaysHealthy));
        plane.set_sleep_after(Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(plane.should_sleep().await);
        plane.set_keep_alive(true).await;
        assert!(!plane.should_sleep().await);
    }

    #[tokio::test]
    async fn ensure_ready_surfaces_no_instance_classification() {
        let plane = ControlPlane::new("sb1", "http://127.0.0.1:1", 3000, Arc::new(NeverStarts));
        let err = plane.ensure_ready().await.unwrap_err();
        assert_eq!(err.code(), "NO_INSTANCE");
    }
}
