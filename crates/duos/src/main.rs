#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use duos::config::{Args, ServerConfig};
use duos::credentials::CredentialStore;
use duos::metrics::{start_metrics_server, PoolStatus};
use duos::server::ServerState;
use duos::{run_with_shutdown, tls};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config: ServerConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let tls = tls::load_acceptor(&config.cert, config.key_path())
        .with_context(|| format!("loading TLS material from {}", config.cert.display()))?;

    let credentials =
        CredentialStore::load(&config.users).with_iterations(config.hash_iterations);
    info!(path = %config.users.display(), users = credentials.len(), "credential table loaded");

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;
    info!(host = %config.host, port = config.port, "bound");

    let status = PoolStatus::new(config.capacity);
    if let Some(addr) = config.metrics_addr {
        tokio::spawn({
            let status = status.clone();
            async move {
                if let Err(e) = start_metrics_server(addr, status).await {
                    warn!("metrics server error: {}", e);
                }
            }
        });
    }

    let state = ServerState {
        config,
        credentials,
        tls,
        status: status.clone(),
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let mut server = tokio::spawn(run_with_shutdown(listener, state, shutdown_rx));

    tokio::select! {
        result = &mut server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("server error: {}", e),
                Err(e) => error!("server task failed: {}", e),
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    status.set_accepting(false);
    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server.await {
        error!("server error during shutdown: {}", e);
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
