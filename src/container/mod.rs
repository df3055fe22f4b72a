//! The in-container HTTP+SSE service (spec §4.6): sessions, commands,
//! processes, files, ports, git, and ping, all validated and session-scoped.

pub mod api;
pub mod state;

pub use api::build_router;
pub use state::{ContainerConfig, ContainerState};
