use std::net::SocketAddr;

use mockfleet_config::Config;
use mockfleet_server::replica::Replica;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let config = Config::load()?;
    let replicas = replica_count(std::env::args().nth(1));
    tracing::info!(replicas, base_port = config.fleet.base_port, "starting fleet");

    for id in 1..=replicas {
        let port = config.fleet.base_port + id as u16;
        let addr: SocketAddr = format!("{}:{}", config.fleet.host, port).parse()?;
        let replica = Replica {
            id,
            addr,
            default_delay_secs: config.delay.default_secs,
            max_delay_secs: config.delay.max_secs,
        };

        // A bind failure kills this one listener; the rest of the fleet
        // keeps serving.
        tokio::spawn(async move {
            match replica.bind().await {
                Ok(listener) => replica.serve(listener).await,
                Err(err) => {
                    tracing::error!(replica = id, %addr, error = %err, "failed to bind")
                }
            }
        });
    }

    shutdown_signal().await?;
    tracing::info!("shutting down");
    Ok(())
}

/// First positional argument is the replica count; anything missing or
/// unparsable falls back to a single replica.
fn replica_count(arg: Option<String>) -> u32 {
    arg.and_then(|raw| raw.parse().ok()).unwrap_or(1)
}

/// Blocks until SIGINT or SIGTERM. No drain: in-flight requests die with
/// the process.
async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
