//! In-container process supervisor (spec §4.4). Each spawned child owns
//! bounded stdout/stderr ring buffers and a broadcast fan-out; the
//! background tasks reading a child's pipes are the sole writers of its
//! buffers (spec §5).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex};

use crate::errors::{ContainerError, ContainerResult};
use crate::models::{ProcessSnapshot, ProcessStatus, BUFFER_OVERFLOW_MARKER};
use crate::session::SessionRegistry;

/// Bound on each of a process's stdout/stderr ring buffers.
const MAX_BUFFER_BYTES: usize = 1_000_000;
/// Grace period between SIGTERM and SIGKILL on `kill`.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);
const READ_CHUNK_SIZE: usize = 8192;

#[derive(Clone, Debug)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exit(i32),
}

struct MutableState {
    status: ProcessStatus,
    pid: Option<u32>,
    exit_code: Option<i32>,
    end_time: Option<DateTime<Utc>>,
    stdout_buf: String,
    stderr_buf: String,
    stdout_overflowed: bool,
    stderr_overflowed: bool,
}

enum Stream {
    Stdout,
    Stderr,
}

struct ProcessEntry {
    id: String,
    command: String,
    session_id: String,
    start_time: DateTime<Utc>,
    killed_by_user: AtomicBool,
    state: Mutex<MutableState>,
    events: broadcast::Sender<ProcessEvent>,
}

impl ProcessEntry {
    async fn snapshot(&self) -> ProcessSnapshot {
        let state = self.state.lock().await;
        ProcessSnapshot {
            id: self.id.clone(),
            pid: state.pid,
            command: self.command.clone(),
            status: state.status,
            exit_code: state.exit_code,
            start_time: self.start_time,
            end_time: state.end_time,
            session_id: self.session_id.clone(),
        }
    }

    /// Snapshot current buffers and subscribe to future events atomically
    /// (both happen under the same lock), so a subscriber sees every event
    /// exactly once regardless of when it attaches.
    async fn subscribe(&self) -> (String, String, Option<i32>, broadcast::Receiver<ProcessEvent>) {
        let state = self.state.lock().await;
        let receiver = self.events.subscribe();
        (
            state.stdout_buf.clone(),
            state.stderr_buf.clone(),
            if state.status.is_terminal() {
                state.exit_code
            } else {
                None
            },
            receiver,
        )
    }

    async fn push(&self, stream: Stream, data: String) {
        let mut state = self.state.lock().await;
        let (buf, overflowed, event_ctor): (
            &mut String,
            &mut bool,
            fn(String) -> ProcessEvent,
        ) = match stream {
            Stream::Stdout => (
                &mut state.stdout_buf,
                &mut state.stdout_overflowed,
                ProcessEvent::Stdout,
            ),
            Stream::Stderr => (
                &mut state.stderr_buf,
                &mut state.stderr_overflowed,
                ProcessEvent::Stderr,
            ),
        };

        buf.push_str(&data);
        let mut overflow_marker = None;
        if buf.len() > MAX_BUFFER_BYTES {
            let excess = buf.len() - MAX_BUFFER_BYTES;
            let drop_at = (0..=excess).rev().find(|&i| buf.is_char_boundary(i)).unwrap_or(excess);
            buf.drain(..drop_at);
            if !*overflowed {
                *overflowed = true;
                buf.push_str(BUFFER_OVERFLOW_MARKER);
                overflow_marker = Some(BUFFER_OVERFLOW_MARKER.to_string());
            }
        }

        // Send while still holding `state` so a concurrent `subscribe()`
        // can't snapshot the buffer and also receive these as live events.
        if let Some(marker) = overflow_marker {
            let _ = self.events.send(event_ctor(marker));
        }
        let _ = self.events.send(event_ctor(data));
        drop(state);
    }

    async fn finish(&self, exit_code: i32) {
        let mut state = self.state.lock().await;
        state.status = if self.killed_by_user.load(Ordering::SeqCst) {
            ProcessStatus::Killed
        } else if exit_code == 0 {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Failed
        };
        state.exit_code = Some(exit_code);
        state.end_time = Some(Utc::now());
        drop(state);
        let _ = self.events.send(ProcessEvent::Exit(exit_code));
    }
}

#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    processes: Arc<Mutex<HashMap<String, Arc<ProcessEntry>>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a process (spec §4.4 "Start"). `command` is interpreted as a
    /// shell command line; `cwd`/`env` are resolved against `session` before
    /// spawn, with caller-supplied values taking precedence.
    pub async fn start(
        &self,
        process_id: Option<String>,
        command: String,
        session_id: String,
        cwd: std::path::PathBuf,
        env: HashMap<String, String>,
    ) -> ContainerResult<ProcessSnapshot> {
        let id = process_id.unwrap_or_else(|| format!("proc-{}", uuid::Uuid::new_v4()));
        let (events_tx, _) = broadcast::channel(1024);

        let entry = Arc::new(ProcessEntry {
            id: id.clone(),
            command: command.clone(),
            session_id,
            start_time: Utc::now(),
            killed_by_user: AtomicBool::new(false),
            state: Mutex::new(MutableState {
                status: ProcessStatus::Starting,
                pid: None,
                exit_code: None,
                end_time: None,
                stdout_buf: String::new(),
                stderr_buf: String::new(),
                stdout_overflowed: false,
                stderr_overflowed: false,
            }),
            events: events_tx,
        });

        self.processes.lock().await.insert(id.clone(), entry.clone());

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                entry.push(Stream::Stderr, e.to_string()).await;
                entry.finish(-1).await;
                return Ok(entry.snapshot().await);
            }
        };

        let pid = child.id();
        {
            let mut state = entry.state.lock().await;
            state.pid = pid;
            state.status = ProcessStatus::Running;
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(mut stdout) = stdout {
            let entry = entry.clone();
            tokio::spawn(async move {
                pump(&mut stdout, &entry, Stream::Stdout).await;
            });
        }
        if let Some(mut stderr) = stderr {
            let entry = entry.clone();
            tokio::spawn(async move {
                pump(&mut stderr, &entry, Stream::Stderr).await;
            });
        }

        {
            let entry = entry.clone();
            tokio::spawn(async move {
                let status = child.wait().await;
                let code = status
                    .ok()
                    .and_then(|status| status.code())
                    .unwrap_or(-1);
                entry.finish(code).await;
            });
        }

        Ok(entry.snapshot().await)
    }

    pub async fn list(&self) -> Vec<ProcessSnapshot> {
        let processes = self.processes.lock().await;
        let mut snapshots = Vec::with_capacity(processes.len());
        for entry in processes.values() {
            snapshots.push(entry.snapshot().await);
        }
        snapshots
    }

    pub async fn get(&self, id: &str) -> ContainerResult<ProcessSnapshot> {
        let entry = self.lookup(id).await?;
        Ok(entry.snapshot().await)
    }

    pub async fn logs(&self, id: &str) -> ContainerResult<(String, String)> {
        let entry = self.lookup(id).await?;
        let state = entry.state.lock().await;
        Ok((state.stdout_buf.clone(), state.stderr_buf.clone()))
    }

    /// Historical buffer plus a live subscription, for the log-stream
    /// endpoint (spec §4.4 "Logs (stream)").
    pub async fn subscribe(
        &self,
        id: &str,
    ) -> ContainerResult<(String, String, Option<i32>, broadcast::Receiver<ProcessEvent>)> {
        let entry = self.lookup(id).await?;
        Ok(entry.subscribe().await)
    }

    /// SIGTERM, then SIGKILL after `grace` if still alive. Idempotent once
    /// terminal.
    pub async fn kill(&self, id: &str, grace: Option<Duration>) -> ContainerResult<()> {
        let entry = self.lookup(id).await?;
        {
            let state = entry.state.lock().await;
            if state.status.is_terminal() {
                return Ok(());
            }
        }
        entry.killed_by_user.store(true, Ordering::SeqCst);

        let pid = entry.state.lock().await.pid;
        let Some(pid) = pid else {
            // Never got a pid (failed to spawn); finish() already ran.
            return Ok(());
        };

        send_signal(pid, libc::SIGTERM);
        tokio::time::sleep(grace.unwrap_or(DEFAULT_KILL_GRACE)).await;

        let still_running = {
            let state = entry.state.lock().await;
            !state.status.is_terminal()
        };
        if still_running {
            send_signal(pid, libc::SIGKILL);
        }
        Ok(())
    }

    async fn lookup(&self, id: &str) -> ContainerResult<Arc<ProcessEntry>> {
        self.processes
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ContainerError::ProcessNotFound { id: id.to_string() })
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: i32) {}

async fn pump(reader: &mut (impl tokio::io::AsyncRead + Unpin), entry: &Arc<ProcessEntry>, stream: Stream) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                entry.push_by_ref(&stream, text).await;
            }
            Err(_) => break,
        }
    }
}

// `Stream` has no Clone/Copy derive (keeps the match exhaustive and cheap);
// give `pump` a by-ref push so it doesn't need to reconstruct one.
impl ProcessEntry {
    async fn push_by_ref(&self, stream: &Stream, data: String) {
        match stream {
            Stream::Stdout => self.push(Stream::Stdout, data).await,
            Stream::Stderr => self.push(Stream::Stderr, data).await,
        }
    }
}

/// Resolve the `{cwd, env}` a `StartProcessRequest` runs with.
pub fn resolve_start_context(
    session: &crate::models::Session,
    explicit_cwd: Option<&str>,
    caller_env: &HashMap<String, String>,
) -> (std::path::PathBuf, HashMap<String, String>) {
    (
        SessionRegistry::resolve_cwd(session, explicit_cwd),
        SessionRegistry::compose_env(session, caller_env),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn start_and_collect_stdout_then_exit() {
        let supervisor = ProcessSupervisor::new();
        let snapshot = supervisor
            .start(
                None,
                "echo hello".to_string(),
                "s1".to_string(),
                std::path::PathBuf::from("/tmp"),
                HashMap::new(),
            )
            .await
            .unwrap();

        // Poll until terminal (the echo should complete almost immediately).
        let mut final_snapshot = snapshot.clone();
        for _ in 0..200 {
            final_snapshot = supervisor.get(&snapshot.id).await.unwrap();
            if final_snapshot.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(final_snapshot.status, ProcessStatus::Completed);
        assert_eq!(final_snapshot.exit_code, Some(0));

        let (stdout, _stderr) = supervisor.logs(&snapshot.id).await.unwrap();
        assert_eq!(stdout.trim_end(), "hello");
    }

    #[tokio::test]
    async fn subscriber_attaching_after_exit_still_gets_exit_event() {
        let supervisor = ProcessSupervisor::new();
        let snapshot = supervisor
            .start(
                None,
                "true".to_string(),
                "s1".to_string(),
                std::path::PathBuf::from("/tmp"),
                HashMap::new(),
            )
            .await
            .unwrap();

        for _ in 0..200 {
            if supervisor.get(&snapshot.id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (_stdout, _stderr, exit_code, _rx) = supervisor.subscribe(&snapshot.id).await.unwrap();
        assert_eq!(exit_code, Some(0));
    }

    #[tokio::test]
    async fn get_unknown_process_fails() {
        let supervisor = ProcessSupervisor::new();
        let err = supervisor.get("nope").await.unwrap_err();
        assert_eq!(err.code(), "PROCESS_NOT_FOUND");
    }

    #[tokio::test]
    async fn kill_is_idempotent_after_terminal() {
        let supervisor = ProcessSupervisor::new();
        let snapshot = supervisor
            .start(
                None,
                "true".to_string(),
                "s1".to_string(),
                std::path::PathBuf::from("/tmp"),
                HashMap::new(),
            )
            .await
            .unwrap();
        for _ in 0..200 {
            if supervisor.get(&snapshot.id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        supervisor
            .kill(&snapshot.id, Some(Duration::from_millis(1)))
            .await
            .unwrap();
        supervisor
            .kill(&snapshot.id, Some(Duration::from_millis(1)))
            .await
            .unwrap();
        let final_snapshot = supervisor.get(&snapshot.id).await.unwrap();
        assert_eq!(final_snapshot.status, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn buffer_overflow_is_signaled_once() {
        let supervisor = ProcessSupervisor::new();
        // Produce well over MAX_BUFFER_BYTES of stdout.
        let command = format!("yes x | head -c {}", MAX_BUFFER_BYTES * 2);
        let snapshot = supervisor
            .start(
                None,
                command,
                "s1".to_string(),
                std::path::PathBuf::from("/tmp"),
                HashMap::new(),
            )
            .await
            .unwrap();

        for _ in 0..500 {
            if supervisor.get(&snapshot.id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let (stdout, _stderr) = supervisor.logs(&snapshot.id).await.unwrap();
        assert!(stdout.len() <= MAX_BUFFER_BYTES + BUFFER_OVERFLOW_MARKER.len());
        assert!(stdout.contains("buffer-overflow"));
    }
}
