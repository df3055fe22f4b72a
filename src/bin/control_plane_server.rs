//! Control-plane entry point (spec §4.7). Hosts the per-sandbox
//! [`ControlPlane`] behind its own HTTP+WebSocket surface, the same
//! clap/tracing/graceful-shutdown shape as `sandbox-containerd`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sandbox_control_plane::control_plane::{build_rpc_router, ContainerLifecycle, ControlPlane};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sandbox-controld", about = "Per-sandbox control plane")]
struct Options {
    #[arg(long, env = "SANDBOX_ID")]
    sandbox_id: String,

    #[arg(long, env = "SANDBOX_CONTAINER_BASE_URL")]
    container_base_url: String,

    #[arg(long, env = "SANDBOX_CONTROL_PLANE_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "SANDBOX_CONTROL_PLANE_PORT", default_value_t = sandbox_control_plane::DEFAULT_CONTROL_PLANE_PORT)]
    port: u16,

    #[arg(long, env = "SANDBOX_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

fn init_tracing(log_dir: &Option<PathBuf>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sandbox-controld.log");
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

/// The container runtime itself is deliberately out of scope (spec §1): this
/// lifecycle assumes a host that already keeps the container process alive
/// and only asks the control plane to wait for it to answer `/api/ping`.
/// A host doing real orchestration (start-on-demand, idle reaping) swaps
/// this out for its own [`ContainerLifecycle`] impl.
struct PassiveLifecycle {
    client: reqwest::Client,
    ping_url: String,
}

#[async_trait::async_trait]
impl ContainerLifecycle for PassiveLifecycle {
    async fn ensure_started(&self) -> Result<(), String> {
        Err("no container instance available: host does not manage container startup".to_string())
    }

    async fn is_healthy(&self) -> bool {
        self.client
            .get(&self.ping_url)
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    async fn stop(&self) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    let _guard = init_tracing(&options.log_dir);

    let lifecycle = Arc::new(PassiveLifecycle {
        client: reqwest::Client::new(),
        ping_url: format!("{}/api/ping", options.container_base_url),
    });
    let plane = Arc::new(ControlPlane::new(
        options.sandbox_id,
        options.container_base_url,
        options.port,
        lifecycle,
    ));
    let router = build_rpc_router(plane);

    let addr = format!("{}:{}", options.bind, options.port);
    tracing::info!(%addr, "starting sandbox-controld");

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
