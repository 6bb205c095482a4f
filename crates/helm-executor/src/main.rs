//! Mission executor - drives an autonomous surface vehicle through its task list.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};

use helm_executor::backends;
use helm_executor::config::Config;
use helm_executor::nav::Navigation;
use helm_executor::states::Executor;
use helm_executor::status::StatusPublisher;
use helm_executor::transport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("helm_executor=debug".parse()?);
    let log_format = std::env::var("HELM_LOG_FORMAT").unwrap_or_default();
    if log_format.trim().eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    tracing::info!("Starting mission executor...");

    let config = Config::from_env();

    let (command_tx, command_rx) = mpsc::channel(32);
    let (mode_tx, mode_rx) = mpsc::channel(8);
    let (nav_tx, nav_rx) = watch::channel(None);
    let (backend_tx, backend_rx) = mpsc::channel(16);
    let (motion_backends, backend_servers) = backends::bind();
    let publisher = StatusPublisher::new();
    let (shutdown_tx, _) = broadcast::channel(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.transport_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Transport listening on {}", listener.local_addr()?);

    let (outbound_tx, _) = broadcast::channel(64);
    tokio::spawn(transport::pump_outbound(
        publisher.subscribe_heartbeat(),
        publisher.subscribe_viz(),
        publisher.subscribe_end_of_line(),
        outbound_tx.clone(),
    ));
    tokio::spawn(transport::run_backend_bridge(
        backend_servers,
        outbound_tx.clone(),
        backend_rx,
    ));
    let inbound = transport::Inbound {
        command_tx,
        mode_tx,
        nav_tx: Arc::new(nav_tx),
        backend_tx,
    };
    tokio::spawn(transport::serve(listener, inbound, outbound_tx));

    tokio::spawn(shutdown_signal(shutdown_tx.clone()));

    let nav = Navigation::new(nav_rx, config.datum);
    let executor = Executor::new(
        &config,
        nav,
        motion_backends,
        publisher,
        command_rx,
        mode_rx,
        shutdown_tx.subscribe(),
    );
    executor.run().await;

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
        }
        Err(err) => {
            tracing::warn!("Failed to install SIGTERM handler (CTRL-C only): {}", err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

#[cfg(not(unix))]
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
