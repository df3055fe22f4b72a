//! The control plane (spec §4.7): the stateful coordinator that sits
//! between a caller and one running container instance. It proxies every
//! in-container HTTP call, classifies startup failures, supervises
//! outbound streams, and tunnels `connect()` WebSockets.

pub mod connect;
pub mod plane;
pub mod preview;
pub mod rpc;
pub mod startup;
pub mod streaming;

pub use connect::{resolve_connect_target, tunnel};
pub use plane::{ContainerLifecycle, ControlPlane};
pub use preview::{build_preview_url, PreviewConfig, DEFAULT_WILDCARD_SUFFIXES};
pub use rpc::build_rpc_router;
pub use startup::{classify_startup_failure, StartupClassification};
pub use streaming::{supervise, ActivityRenewal, HealthCheck};
