//! Serving and graceful shutdown

use std::future::Future;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::ingress::{self, Ingress};
use crate::{control, RelayServer};

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Serve the relay protocol and the ingress until either fails or
/// `shutdown` resolves. On shutdown every attached stream is closed.
pub async fn serve_until<F>(
    relay: RelayServer,
    control_listener: TcpListener,
    ingress_listener: TcpListener,
    answer_challenges: bool,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let control_app = control::router(relay.clone());
    let ingress_app = ingress::router(Ingress::new(relay.clone(), answer_challenges));

    tokio::select! {
        res = async { axum::serve(control_listener, control_app).await } => {
            res.context("Relay protocol server failed")?;
        }
        res = async { axum::serve(ingress_listener, ingress_app).await } => {
            res.context("HTTP ingress failed")?;
        }
        _ = shutdown => {
            relay.shutdown();
        }
    }

    Ok(())
}
