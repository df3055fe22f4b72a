//! In-container HTTP+SSE service entry point (spec §4.6). Mirrors the
//! teacher's `bin/server.rs`: a `clap::Parser` options struct with `env`
//! fallbacks, `tracing` + `tracing-appender` daily rolling logs, and a
//! bind-retry loop with graceful shutdown on SIGINT/SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use sandbox_control_plane::container::{build_router, ContainerConfig, ContainerState};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sandbox-containerd", about = "In-container sandbox HTTP service")]
struct Options {
    #[arg(long, env = "SANDBOX_CONTAINER_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "SANDBOX_CONTAINER_PORT", default_value_t = sandbox_control_plane::DEFAULT_CONTAINER_PORT)]
    port: u16,

    #[arg(long, env = "SANDBOX_CONTROL_PLANE_PORT", default_value_t = sandbox_control_plane::DEFAULT_CONTROL_PLANE_PORT)]
    control_plane_port: u16,

    #[arg(long, env = "SANDBOX_WORKSPACE_ROOT", default_value = "/workspace")]
    workspace_root: PathBuf,

    #[arg(long, env = "SANDBOX_GIT_HOST_ALLOWLIST", value_delimiter = ',')]
    git_host_allowlist: Option<Vec<String>>,

    #[arg(long, env = "SANDBOX_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

fn init_tracing(log_dir: &Option<PathBuf>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sandbox-containerd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    let _guard = init_tracing(&options.log_dir);

    let config = ContainerConfig {
        control_plane_port: options.control_plane_port,
        workspace_root: options.workspace_root,
        git_host_allowlist: options.git_host_allowlist,
    };
    let state = ContainerState::new(config);
    let router = build_router(state);

    let addr = format!("{}:{}", options.bind, options.port);
    tracing::info!(%addr, "starting sandbox-containerd");

    let listener = loop {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => break listener,
            Err(err) => {
                tracing::warn!(%err, %addr, "bind failed, retrying in 1s");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
