//! Shared state for the in-container HTTP service, mirroring the teacher's
//! `AppState` composition (`src/service.rs` in the original `cmux-sandbox`).

use std::path::PathBuf;

use crate::ports::PortRegistry;
use crate::process::ProcessSupervisor;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct ContainerConfig {
    pub control_plane_port: u16,
    pub workspace_root: PathBuf,
    pub git_host_allowlist: Option<Vec<String>>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            control_plane_port: 3000,
            workspace_root: PathBuf::from("/workspace"),
            git_host_allowlist: None,
        }
    }
}

#[derive(Clone)]
pub struct ContainerState {
    pub sessions: SessionRegistry,
    pub processes: ProcessSupervisor,
    pub ports: std::sync::Arc<PortRegistry>,
    pub config: ContainerConfig,
}

impl ContainerState {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            processes: ProcessSupervisor::new(),
            ports: std::sync::Arc::new(PortRegistry::new(config.control_plane_port)),
            config,
        }
    }
}
