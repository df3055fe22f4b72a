//! Caller-facing API (spec §4.8): domain clients over one [`ControlPlane`]
//! instance. Grounded in the teacher's CLI (`src/bin/cli.rs`), which drives
//! `SandboxService`-shaped operations through a thin façade rather than
//! calling the HTTP layer directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::control_plane::{ControlPlane, HealthCheck};
use crate::errors::{ClientError, ClientResult};
use crate::models::*;
use crate::sse::{DecodedRecord, SseDecoder};

use super::process_handle::ProcessHandle;

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub session_id: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct StartProcessOptions {
    pub process_id: Option<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub port: u16,
    pub hostname: Option<String>,
    pub ready: Option<String>,
    pub ready_timeout: Duration,
    pub env: HashMap<String, String>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            port: 0,
            hostname: None,
            ready: None,
            ready_timeout: Duration::from_secs(30),
            env: HashMap::new(),
        }
    }
}

pub struct ServeResult {
    pub process: ProcessHandle,
    pub url: String,
}

/// The top-level client façade a worker talks to. One instance per sandbox,
/// wrapping the [`ControlPlane`] that actually proxies to the container.
pub struct SandboxClient {
    plane: Arc<ControlPlane>,
}

impl SandboxClient {
    pub fn new(plane: Arc<ControlPlane>) -> Self {
        Self { plane }
    }

    pub fn control_plane(&self) -> &Arc<ControlPlane> {
        &self.plane
    }

    pub async fn ping(&self) -> ClientResult<PingResponse> {
        self.plane.ping().await
    }

    pub async fn create_session(
        &self,
        id: Option<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    ) -> ClientResult<CreateSessionResponse> {
        let response = self
            .plane
            .create_session(CreateSessionRequest { id, env, cwd })
            .await?;
        self.plane
            .set_default_session_id(response.session_id.clone())
            .await;
        Ok(response)
    }

    pub async fn delete_session(&self, id: &str) -> ClientResult<()> {
        self.plane.delete_session(id).await.map(|_| ())
    }

    pub async fn set_env_vars(&self, env: HashMap<String, String>) {
        self.plane.set_env_vars(env).await;
    }

    pub async fn set_sandbox_name(&self, name: impl Into<String>) {
        self.plane.set_sandbox_name(name.into()).await;
    }

    pub async fn set_base_url(&self, url: impl Into<String>) {
        self.plane.set_base_url(url.into()).await;
    }

    pub async fn set_sleep_after(&self, duration: Duration) {
        self.plane.set_sleep_after(duration).await;
    }

    pub async fn set_keep_alive(&self, keep_alive: bool) {
        self.plane.set_keep_alive(keep_alive).await;
    }

    async fn resolve_session(&self, session_id: Option<String>) -> String {
        match session_id {
            Some(id) => id,
            None => self.plane.default_session_id().await,
        }
    }

    pub async fn exec(&self, command: &str, options: ExecOptions) -> ClientResult<ExecuteResponse> {
        let session_id = self.resolve_session(options.session_id).await;
        self.plane
            .execute(&ExecuteRequest {
                command: command.to_string(),
                session_id,
                timeout_ms: options.timeout_ms,
            })
            .await
    }

    /// Decoded `ExecEvent` stream for `execStream`, supervised for activity
    /// renewal, periodic health checks, and a hang timeout.
    pub async fn exec_stream(
        &self,
        command: &str,
        options: ExecOptions,
    ) -> ClientResult<impl Stream<Item = Result<ExecEvent, ClientError>>> {
        let session_id = self.resolve_session(options.session_id).await;
        let raw = self
            .plane
            .execute_stream(&ExecuteRequest {
                command: command.to_string(),
                session_id,
                timeout_ms: options.timeout_ms,
            })
            .await?;
        let supervised = crate::control_plane::supervise(
            Box::pin(raw),
            NoopRenewal,
            PlaneHealthCheck {
                plane: self.plane.clone(),
            },
        );
        Ok(decode_sse_stream(supervised))
    }

    pub async fn start_process(
        &self,
        command: &str,
        options: StartProcessOptions,
    ) -> ClientResult<ProcessHandle> {
        let session_id = self.resolve_session(options.session_id).await;
        let response = self
            .plane
            .start_process(StartProcessRequest {
                command: command.to_string(),
                session_id,
                process_id: options.process_id,
                env: options.env,
                cwd: options.cwd,
                background: true,
            })
            .await?;
        Ok(ProcessHandle::new(self.plane.clone(), response.process_id))
    }

    pub async fn list_processes(&self, session_id: Option<&str>) -> ClientResult<Vec<ProcessSnapshot>> {
        Ok(self.plane.list_processes(session_id).await?.processes)
    }

    pub fn process(&self, process_id: impl Into<String>) -> ProcessHandle {
        ProcessHandle::new(self.plane.clone(), process_id.into())
    }

    pub async fn read_file(&self, path: &str, session_id: Option<String>) -> ClientResult<String> {
        let session_id = self.resolve_session(session_id).await;
        let response = self
            .plane
            .read_file(&FileReadRequest {
                path: path.to_string(),
                encoding: None,
                session_id,
            })
            .await?;
        Ok(response.content)
    }

    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        session_id: Option<String>,
    ) -> ClientResult<usize> {
        let session_id = self.resolve_session(session_id).await;
        let response = self
            .plane
            .write_file(&FileWriteRequest {
                path: path.to_string(),
                content: content.to_string(),
                encoding: None,
                session_id,
            })
            .await?;
        Ok(response.bytes_written)
    }

    pub async fn delete_file(&self, path: &str, session_id: Option<String>) -> ClientResult<()> {
        let session_id = self.resolve_session(session_id).await;
        self.plane
            .delete_file(&FileDeleteRequest {
                path: path.to_string(),
                session_id,
            })
            .await
            .map(|_| ())
    }

    pub async fn rename_file(
        &self,
        source_path: &str,
        destination_path: &str,
        session_id: Option<String>,
    ) -> ClientResult<()> {
        let session_id = self.resolve_session(session_id).await;
        self.plane
            .rename_file(&FileRenameRequest {
                source_path: source_path.to_string(),
                destination_path: destination_path.to_string(),
                session_id,
            })
            .await
            .map(|_| ())
    }

    /// `moveFile` is the same wire operation as `renameFile` (spec §6).
    pub async fn move_file(
        &self,
        source_path: &str,
        destination_path: &str,
        session_id: Option<String>,
    ) -> ClientResult<()> {
        self.rename_file(source_path, destination_path, session_id).await
    }

    pub async fn mkdir(
        &self,
        path: &str,
        recursive: bool,
        session_id: Option<String>,
    ) -> ClientResult<()> {
        let session_id = self.resolve_session(session_id).await;
        self.plane
            .mkdir(&MkdirRequest {
                path: path.to_string(),
                recursive,
                session_id,
            })
            .await
            .map(|_| ())
    }

    pub async fn expose_port(&self, port: u16, name: Option<String>) -> ClientResult<ExposePortResponse> {
        self.plane
            .expose_port(ExposePortRequest {
                port,
                name,
                session_id: None,
            })
            .await
    }

    pub async fn unexpose_port(&self, port: u16) -> ClientResult<()> {
        self.plane.unexpose_port(port).await.map(|_| ())
    }

    pub async fn get_exposed_ports(&self) -> ClientResult<Vec<ExposedPortPublic>> {
        Ok(self.plane.list_ports().await?.ports)
    }

    pub async fn validate_port_token(&self, port: u16, token: &str) -> bool {
        self.plane.validate_port_token(port, token).await
    }

    pub async fn git_checkout(
        &self,
        repo_url: &str,
        branch: Option<String>,
        target_dir: Option<String>,
        depth: Option<u32>,
        session_id: Option<String>,
    ) -> ClientResult<GitCheckoutResponse> {
        let session_id = self.resolve_session(session_id).await;
        self.plane
            .git_checkout(&GitCheckoutRequest {
                repo_url: repo_url.to_string(),
                branch,
                target_dir,
                depth,
                session_id,
            })
            .await
    }

    /// Resolves the upstream WebSocket URL `connect(portOrPath)` would
    /// tunnel to; actual socket tunneling happens at the RPC server's
    /// upgrade call site via [`crate::control_plane::tunnel`].
    pub fn connect_target(&self, container_host: &str, port_or_path: &str) -> ClientResult<String> {
        self.plane.connect_target(container_host, port_or_path)
    }

    /// `serve(cmd, {port, hostname, ready?, env?})`: starts the process,
    /// waits for the readiness signal(s), exposes the port, and returns the
    /// process handle plus its preview URL.
    pub async fn serve(&self, command: &str, options: ServeOptions) -> ClientResult<ServeResult> {
        let process = self
            .start_process(
                command,
                StartProcessOptions {
                    env: options.env,
                    ..Default::default()
                },
            )
            .await?;

        if let Some(pattern) = &options.ready {
            let pattern = super::process_handle::LogPattern::substring(pattern.clone());
            process.wait_for_log(&pattern, options.ready_timeout).await?;
        }
        process
            .wait_for_port(
                options.port,
                super::process_handle::WaitForPortOptions {
                    timeout: options.ready_timeout,
                    ..Default::default()
                },
            )
            .await?;

        self.plane
            .expose_port(ExposePortRequest {
                port: options.port,
                name: None,
                session_id: None,
            })
            .await?;

        if let Some(hostname) = options.hostname {
            self.plane.capture_hostname(&hostname).await;
        }
        let url = self.plane.preview_url(options.port).await?;

        Ok(ServeResult { process, url })
    }
}

struct NoopRenewal;

impl crate::control_plane::ActivityRenewal for NoopRenewal {
    fn renew(&mut self) {}
}

struct PlaneHealthCheck {
    plane: Arc<ControlPlane>,
}

#[async_trait::async_trait]
impl HealthCheck for PlaneHealthCheck {
    async fn is_healthy(&mut self) -> bool {
        self.plane.ping().await.is_ok()
    }
}

fn decode_sse_stream<S>(inner: S) -> impl Stream<Item = Result<ExecEvent, ClientError>>
where
    S: Stream<Item = Result<Vec<u8>, ClientError>>,
{
    async_stream::stream! {
        tokio::pin!(inner);
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = inner.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            for record in decoder.push(&bytes) {
                match record {
                    DecodedRecord::Data(data) => match serde_json::from_str::<ExecEvent>(&data) {
                        Ok(event) => yield Ok(event),
                        Err(err) => yield Err(ClientError::Internal(err.to_string())),
                    },
                    DecodedRecord::ParseError(message) => {
                        yield Err(ClientError::Internal(message));
                    }
                }
            }
        }
    }
}
