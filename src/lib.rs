//! Sandbox control plane: a stateful per-sandbox coordinator driving an
//! isolated execution container over HTTP/SSE/WebSocket (spec §1-§2).
//!
//! - [`container`] is the in-container HTTP+SSE service.
//! - [`control_plane`] is the per-sandbox coordinator that proxies to it.
//! - [`client`] is the caller-facing façade built on top of the control plane.

pub mod client;
pub mod container;
pub mod control_plane;
pub mod errors;
pub mod git;
pub mod models;
pub mod ports;
pub mod process;
pub mod security;
pub mod session;
pub mod sse;

pub use client::SandboxClient;
pub use container::build_router;
pub use control_plane::ControlPlane;
pub use errors::{ClientError, ClientResult, ContainerError, ContainerResult};

/// Default port the control plane listens on (spec §6, `SANDBOX_CONTROL_PLANE_PORT`).
pub const DEFAULT_CONTROL_PLANE_PORT: u16 = 3000;

/// Default port the in-container HTTP service listens on.
pub const DEFAULT_CONTAINER_PORT: u16 = 39375;

/// Environment variable a container reads to learn its own service port.
pub const CONTAINER_PORT_ENV_VAR: &str = "SANDBOX_CONTAINER_PORT";

/// Environment variable the control plane reads for its listen port.
pub const CONTROL_PLANE_PORT_ENV_VAR: &str = "SANDBOX_CONTROL_PLANE_PORT";
