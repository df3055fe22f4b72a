//! In-container port registry (spec §4.5). A port is present in the table
//! iff the control plane considers it externally exposed; tokens rotate on
//! unexpose/expose.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::errors::{ContainerError, ContainerResult};
use crate::models::{CheckReadyResponse, ExposedPortPublic, ReadyMode};
use crate::security::validate_port;

#[derive(Clone, Debug)]
struct ExposedPortEntry {
    name: Option<String>,
    exposed_at: DateTime<Utc>,
    token: String,
}

#[derive(Default)]
pub struct PortRegistry {
    entries: Mutex<HashMap<u16, ExposedPortEntry>>,
    control_plane_port: u16,
}

/// `expose`'s full return, including the token (never re-exposed by `list`).
#[derive(Clone, Debug)]
pub struct ExposedPort {
    pub port: u16,
    pub name: Option<String>,
    pub exposed_at: DateTime<Utc>,
    pub token: String,
}

impl PortRegistry {
    pub fn new(control_plane_port: u16) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            control_plane_port,
        }
    }

    pub async fn expose(&self, port: u16, name: Option<String>) -> ContainerResult<ExposedPort> {
        if !validate_port(port as u32, self.control_plane_port) {
            return Err(ContainerError::InvalidPort { port: port as u32 });
        }
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&port) {
            return Err(ContainerError::PortAlreadyExposed { port });
        }
        let token = generate_token();
        let exposed_at = Utc::now();
        entries.insert(
            port,
            ExposedPortEntry {
                name: name.clone(),
                exposed_at,
                token: token.clone(),
            },
        );
        Ok(ExposedPort {
            port,
            name,
            exposed_at,
            token,
        })
    }

    pub async fn unexpose(&self, port: u16) -> ContainerResult<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(&port).is_none() {
            return Err(ContainerError::PortNotExposed { port });
        }
        Ok(())
    }

    pub async fn list(&self) -> Vec<ExposedPortPublic> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|(port, entry)| ExposedPortPublic {
                port: *port,
                name: entry.name.clone(),
                exposed_at: entry.exposed_at,
            })
            .collect()
    }

    /// Used by the control plane to validate an incoming preview request.
    pub async fn validate_token(&self, port: u16, token: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(&port)
            .map(|entry| entry.token == token)
            .unwrap_or(false)
    }

    pub async fn token_for(&self, port: u16) -> Option<String> {
        let entries = self.entries.lock().await;
        entries.get(&port).map(|entry| entry.token.clone())
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16]; // 128 bits
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `checkReady`: a bounded TCP connect, or an HTTP GET whose status falls in
/// `[statusMin, statusMax]`, against `localhost:port`.
pub async fn check_ready(
    port: u16,
    mode: ReadyMode,
    path: &str,
    status_min: u16,
    status_max: u16,
) -> CheckReadyResponse {
    let timeout = Duration::from_secs(2);
    match mode {
        ReadyMode::Tcp => {
            let addr: SocketAddr = match format!("127.0.0.1:{port}").parse() {
                Ok(addr) => addr,
                Err(e) => {
                    return CheckReadyResponse {
                        ready: false,
                        status_code: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => CheckReadyResponse {
                    ready: true,
                    status_code: None,
                    error: None,
                },
                Ok(Err(e)) => CheckReadyResponse {
                    ready: false,
                    status_code: None,
                    error: Some(e.to_string()),
                },
                Err(_) => CheckReadyResponse {
                    ready: false,
                    status_code: None,
                    error: Some("timed out".to_string()),
                },
            }
        }
        ReadyMode::Http => {
            let url = format!("http://127.0.0.1:{port}{path}");
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client");
            match client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    CheckReadyResponse {
                        ready: (status_min..=status_max).contains(&status),
                        status_code: Some(status),
                        error: None,
                    }
                }
                Err(e) => CheckReadyResponse {
                    ready: false,
                    status_code: None,
                    error: Some(e.to_string()),
                },
            }
        }
    }
}

pub type SharedPortRegistry = Arc<PortRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expose_then_list_then_unexpose() {
        let registry = PortRegistry::new(3000);
        let exposed = registry.expose(8080, Some("api".into())).await.unwrap();
        assert_eq!(exposed.port, 8080);

        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].port, 8080);

        assert!(registry.validate_token(8080, &exposed.token).await);

        registry.unexpose(8080).await.unwrap();
        assert!(registry.list().await.is_empty());
        assert!(!registry.validate_token(8080, &exposed.token).await);
    }

    #[tokio::test]
    async fn double_expose_fails() {
        let registry = PortRegistry::new(3000);
        registry.expose(8080, None).await.unwrap();
        let err = registry.expose(8080, None).await.unwrap_err();
        assert_eq!(err.code(), "PORT_ALREADY_EXPOSED");
    }

    #[tokio::test]
    async fn unexpose_missing_fails() {
        let registry = PortRegistry::new(3000);
        let err = registry.unexpose(9999).await.unwrap_err();
        assert_eq!(err.code(), "PORT_NOT_EXPOSED");
    }

    #[tokio::test]
    async fn rejects_control_plane_port() {
        let registry = PortRegistry::new(3000);
        let err = registry.expose(3000, None).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PORT");
    }

    #[tokio::test]
    async fn tokens_rotate_across_expose_cycles() {
        let registry = PortRegistry::new(3000);
        let first = registry.expose(8080, None).await.unwrap();
        registry.unexpose(8080).await.unwrap();
        let second = registry.expose(8080, None).await.unwrap();
        assert_ne!(first.token, second.token);
    }
}
