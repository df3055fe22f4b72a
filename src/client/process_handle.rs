//! Client-side process readiness (spec §4.8, "Process readiness"):
//! `waitForLog`/`waitForPort`/`waitForExit`, all layered over the same SSE
//! contract the in-container service already exposes. Grounded in the
//! teacher's CLI (`src/bin/cli.rs`) as the example of a façade driving
//! `SandboxService`-shaped operations from outside the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;

use crate::control_plane::ControlPlane;
use crate::errors::{ClientError, ClientResult};
use crate::models::{LogEvent, ProcessStatus};
use crate::sse::{DecodedRecord, SseDecoder};

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A pattern `waitForLog` matches a log line against: either a literal
/// substring or a regular expression (spec §4.8).
pub enum LogPattern {
    Substring(String),
    Regex(Regex),
}

impl LogPattern {
    pub fn substring(text: impl Into<String>) -> Self {
        LogPattern::Substring(text.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(LogPattern::Regex(Regex::new(pattern)?))
    }

    fn matches(&self, line: &str) -> bool {
        match self {
            LogPattern::Substring(needle) => line.contains(needle.as_str()),
            LogPattern::Regex(re) => re.is_match(line),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyMode {
    Http,
    Tcp,
}

pub struct WaitForPortOptions {
    pub mode: ReadyMode,
    pub path: String,
    pub status_min: u16,
    pub status_max: u16,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitForPortOptions {
    fn default() -> Self {
        Self {
            mode: ReadyMode::Http,
            path: "/".to_string(),
            status_min: 200,
            status_max: 399,
            timeout: DEFAULT_WAIT_TIMEOUT,
            interval: POLL_INTERVAL,
        }
    }
}

/// A handle to one in-container process, returned by `startProcess`/`serve`.
pub struct ProcessHandle {
    plane: Arc<ControlPlane>,
    process_id: String,
}

impl ProcessHandle {
    pub fn new(plane: Arc<ControlPlane>, process_id: String) -> Self {
        Self { plane, process_id }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Reads historical logs first, then subscribes to the live log SSE;
    /// succeeds on the first line matching `pattern`. An `exit` event
    /// arriving first fails with `PROCESS_EXITED_BEFORE_READY` carrying the
    /// exit code and captured logs; a deadline with no match fails with
    /// `PROCESS_READY_TIMEOUT`.
    pub async fn wait_for_log(&self, pattern: &LogPattern, timeout: Duration) -> ClientResult<()> {
        let history = self.plane.get_process_logs(&self.process_id).await?;
        for line in history.stdout.lines().chain(history.stderr.lines()) {
            if pattern.matches(line) {
                return Ok(());
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let raw = self.plane.stream_process_logs(&self.process_id).await?;
        tokio::pin!(raw);
        let mut decoder = SseDecoder::new();

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::ProcessReadyTimeout {
                    process_id: self.process_id.clone(),
                    condition: format!("no log line matched before {timeout:?}"),
                });
            }

            let chunk = match tokio::time::timeout(remaining, raw.next()).await {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(Some(Err(err))) => return Err(err),
                Ok(None) => {
                    return Err(ClientError::ProcessReadyTimeout {
                        process_id: self.process_id.clone(),
                        condition: "log stream ended before a match".to_string(),
                    })
                }
                Err(_) => {
                    return Err(ClientError::ProcessReadyTimeout {
                        process_id: self.process_id.clone(),
                        condition: format!("no log line matched before {timeout:?}"),
                    })
                }
            };

            for record in decoder.push(&chunk) {
                let data = match record {
                    DecodedRecord::Data(data) => data,
                    DecodedRecord::ParseError(_) => continue,
                };
                let event: LogEvent = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                match event {
                    LogEvent::Stdout { data, .. } | LogEvent::Stderr { data, .. } => {
                        if pattern.matches(&data) {
                            return Ok(());
                        }
                    }
                    LogEvent::Exit { exit_code, .. } => {
                        let logs = self.plane.get_process_logs(&self.process_id).await?;
                        return Err(ClientError::ProcessExitedBeforeReady {
                            process_id: self.process_id.clone(),
                            exit_code,
                            logs: format!("{}{}", logs.stdout, logs.stderr),
                        });
                    }
                }
            }
        }
    }

    /// Polls `checkReady` until the port becomes ready or `options.timeout`
    /// elapses.
    pub async fn wait_for_port(&self, port: u16, options: WaitForPortOptions) -> ClientResult<()> {
        let deadline = tokio::time::Instant::now() + options.timeout;
        loop {
            let request = crate::models::CheckReadyRequest {
                port,
                mode: match options.mode {
                    ReadyMode::Http => crate::models::ReadyMode::Http,
                    ReadyMode::Tcp => crate::models::ReadyMode::Tcp,
                },
                path: options.path.clone(),
                status_min: options.status_min,
                status_max: options.status_max,
            };
            let response = self.plane.check_ready(&request).await?;
            if response.ready {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::ProcessReadyTimeout {
                    process_id: self.process_id.clone(),
                    condition: format!("port {port} not ready before {:?}", options.timeout),
                });
            }
            tokio::time::sleep(options.interval).await;
        }
    }

    /// Polls `getProcess` until the process reaches a terminal state.
    pub async fn wait_for_exit(&self, timeout: Duration) -> ClientResult<i32> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.plane.get_process(&self.process_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot.exit_code.unwrap_or(-1));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::ProcessReadyTimeout {
                    process_id: self.process_id.clone(),
                    condition: format!("process did not exit before {timeout:?}"),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn kill(&self) -> ClientResult<()> {
        self.plane.kill_process(&self.process_id).await.map(|_| ())
    }

    pub async fn status(&self) -> ClientResult<ProcessStatus> {
        Ok(self.plane.get_process(&self.process_id).await?.status)
    }
}
