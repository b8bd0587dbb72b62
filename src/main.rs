// src/main.rs

//! The `esconn` binary: connects to a node and logs connection events until
//! interrupted.

use anyhow::{Context, Result};
use esconn::Connection;
use esconn::config::Config;
use esconn::core::discovery::StaticEndpointDiscoverer;
use esconn::core::events::ConnectionEvent;
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("ESCONN_BUILD_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("esconn version {VERSION}");
        return Ok(());
    }

    // It can be provided via a --config flag; otherwise, it defaults to "esconn.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("esconn.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    if let Err(e) = run(config).await {
        error!("esconn runtime error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!(
        "Connecting '{}' to {}:{}.",
        config.connection.connection_name, config.endpoint.host, config.endpoint.port
    );

    let connection = Connection::new(config.connection.clone());
    let mut events = connection.events();
    let discoverer = Arc::new(StaticEndpointDiscoverer::new(
        config.endpoint.host.clone(),
        config.endpoint.port,
    ));
    connection
        .connect(discoverer)
        .await
        .context("Failed to start the connection")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnectionEvent::Closed(reason)) => {
                    info!("Connection closed: {reason}");
                    return Ok(());
                }
                Ok(ConnectionEvent::ErrorOccurred(e)) => warn!("Connection error: {e}"),
                Ok(event) => info!("Connection event: {event:?}"),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} connection events."),
                Err(RecvError::Closed) => return Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, closing connection.");
                connection.close("Interrupted by user.");
                break;
            }
        }
    }

    // Wait for the actor to confirm the close.
    while let Ok(event) = events.recv().await {
        if let ConnectionEvent::Closed(reason) = event {
            info!("Connection closed: {reason}");
            break;
        }
    }
    Ok(())
}
