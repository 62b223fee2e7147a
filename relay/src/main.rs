use anyhow::{Context, Result};
use hooktunnel_relay::shutdown::{serve_until, shutdown_signal};
use hooktunnel_relay::{RelayConfig, RelayServer};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hooktunnel_relay=info")),
        )
        .init();

    let config = RelayConfig::from_env().context("Invalid relay configuration")?;
    let relay = RelayServer::new(&config);

    let control_listener = TcpListener::bind(config.relay_addr())
        .await
        .with_context(|| format!("Failed to bind relay port {}", config.relay_port))?;
    let ingress_listener = TcpListener::bind(config.http_addr())
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", config.http_port))?;

    info!("Relay protocol server on {}", config.relay_addr());
    info!("HTTP ingress on {} (public URL: {})", config.http_addr(), config.public_url);

    println!("HookTunnel relay started!");
    println!("HTTP ingress:  {}", config.public_url);
    println!("Relay server:  localhost:{}", config.relay_port);
    println!("\nPress Ctrl+C to stop...\n");

    serve_until(
        relay,
        control_listener,
        ingress_listener,
        config.answer_challenges,
        shutdown_signal(),
    )
    .await
}
