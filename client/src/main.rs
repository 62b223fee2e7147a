use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hooktunnel::config::{ClientConfig, Overrides, Settings};
use hooktunnel::{LocalDispatcher, TunnelClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hooktunnel")]
#[command(author = "HookTunnel Team")]
#[command(version = "0.1.0")]
#[command(about = "Receive public webhooks on a local service", long_about = None)]
struct Cli {
    /// Relay server address (host:port or URL)
    #[arg(short, long, env = "RELAY_SERVER_URL")]
    relay: Option<String>,

    /// Local URL to forward webhooks to
    #[arg(short, long, env = "LOCAL_FORWARD_URL")]
    local_url: Option<String>,

    /// Webhook ID to request; the relay generates one when omitted
    #[arg(short, long, env = "WEBHOOK_ID")]
    webhook_id: Option<String>,

    /// Config file (defaults to hooktunnel.yml in the current or home directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "hooktunnel=debug" } else { "hooktunnel=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let file = match cli.config.or_else(ClientConfig::find_config) {
        Some(path) => {
            info!("Using config file {}", path.display());
            Some(ClientConfig::load(&path)?)
        }
        None => None,
    };

    let overrides = Overrides {
        // Older deployments still export the relay address as GRPC_SERVER_URL
        relay: cli.relay.or_else(|| std::env::var("GRPC_SERVER_URL").ok()),
        local_url: cli.local_url,
        webhook_id: cli.webhook_id,
    };
    let settings = Settings::resolve(overrides, file)?;

    let client = TunnelClient::new(&settings.relay)
        .context("Invalid relay server address")?
        .with_register_timeout(settings.register_timeout);
    let dispatcher = LocalDispatcher::new(settings.local_url.clone(), settings.forward_timeout)
        .context("Failed to create local dispatcher")?;

    info!("Registering with relay at {}", client.base_url());
    let registration = client
        .register(&settings.local_url, settings.webhook_id.as_deref())
        .await
        .context("Failed to register webhook")?;

    let origin = if settings.webhook_id.is_some() { "supplied" } else { "generated" };
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║  HookTunnel Active                                           ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Webhook ID:  {:<46} ║", format!("{} ({})", registration.webhook_id, origin));
    println!("║  Webhook URL: {:<46} ║", registration.webhook_url);
    println!("║  Forwarding:  {:<46} ║", settings.local_url);
    println!("╚══════════════════════════════════════════════════════════════╝\n");
    println!("Press Ctrl+C to stop the tunnel\n");

    tokio::select! {
        res = client.run_stream(&registration.webhook_id, &dispatcher) => {
            if let Err(e) = &res {
                warn!("Webhook stream ended: {}", e);
            }
            res.context("Webhook stream failed")?;
        }
        _ = shutdown_signal() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
