//! Caller-facing API (spec §4.8): domain clients, process handles, and
//! `serve()`, layered over [`crate::control_plane::ControlPlane`].

pub mod facade;
pub mod process_handle;

pub use facade::{ExecOptions, SandboxClient, ServeOptions, ServeResult, StartProcessOptions};
pub use process_handle::{LogPattern, ProcessHandle, ReadyMode, WaitForPortOptions};
