//! In-container session registry (spec §4.3). Sessions are volatile process
//! state: they do not survive a container restart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::errors::{ContainerError, ContainerResult};
use crate::models::{CreateSessionRequest, Session};

const DEFAULT_ROOT: &str = "/workspace";

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
}

/// `Arc`-shared, mutex-guarded map from session id to `{cwd, env}` — the
/// only writer is the in-container HTTP service (spec §5).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, request: CreateSessionRequest) -> Session {
        let id = request
            .id
            .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));
        let cwd = request.cwd.unwrap_or_else(|| DEFAULT_ROOT.to_string());
        let session = Session {
            id: id.clone(),
            cwd,
            env: request.env,
        };

        let mut inner = self.inner.lock().await;
        inner.sessions.insert(id, session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> ContainerResult<Session> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ContainerError::SessionNotFound { id: id.to_string() })
    }

    /// Get the session, creating it with default `{cwd: /workspace}` if it
    /// is not registered yet — used for the lazily-created default session.
    pub async fn get_or_create_default(&self, id: &str) -> Session {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session {
                id: id.to_string(),
                cwd: DEFAULT_ROOT.to_string(),
                env: HashMap::new(),
            })
            .clone()
    }

    pub async fn delete(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(id);
    }

    /// Resolve `cwd` for an operation: an explicit relative/absolute `cwd`
    /// wins, otherwise fall back to the session's own `cwd`.
    pub fn resolve_cwd(session: &Session, explicit: Option<&str>) -> PathBuf {
        match explicit {
            Some(explicit) if explicit.starts_with('/') => PathBuf::from(explicit),
            Some(explicit) => PathBuf::from(&session.cwd).join(explicit),
            None => PathBuf::from(&session.cwd),
        }
    }

    /// Compose `session.env ⊕ caller.env` (caller wins on key collision).
    pub fn compose_env(
        session: &Session,
        caller_env: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut merged = session.env.clone();
        merged.extend(caller_env.clone());
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_allocates_default_cwd() {
        let registry = SessionRegistry::new();
        let session = registry
            .create(CreateSessionRequest {
                id: Some("s1".into()),
                env: HashMap::new(),
                cwd: None,
            })
            .await;
        assert_eq!(session.cwd, "/workspace");
        assert_eq!(session.id, "s1");
    }

    #[tokio::test]
    async fn get_fails_for_unknown_session() {
        let registry = SessionRegistry::new();
        let err = registry.get("missing").await.unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn delete_does_not_error_on_missing_session() {
        let registry = SessionRegistry::new();
        registry.delete("missing").await;
    }

    #[test]
    fn compose_env_prefers_caller_values() {
        let session = Session {
            id: "s".into(),
            cwd: "/workspace".into(),
            env: HashMap::from([("A".to_string(), "session".to_string())]),
        };
        let caller = HashMap::from([("A".to_string(), "caller".to_string())]);
        let merged = SessionRegistry::compose_env(&session, &caller);
        assert_eq!(merged.get("A").unwrap(), "caller");
    }

    #[test]
    fn resolve_cwd_joins_relative_paths() {
        let session = Session {
            id: "s".into(),
            cwd: "/workspace".into(),
            env: HashMap::new(),
        };
        assert_eq!(
            SessionRegistry::resolve_cwd(&session, Some("src")),
            PathBuf::from("/workspace/src")
        );
        assert_eq!(
            SessionRegistry::resolve_cwd(&session, Some("/etc")),
            PathBuf::from("/etc")
        );
        assert_eq!(
            SessionRegistry::resolve_cwd(&session, None),
            PathBuf::from("/workspace")
        );
    }
}
