use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnParams};
use crate::credentials::CredentialStore;
use crate::error::DuosError;
use crate::hub::{ConnId, Event, Hub};
use crate::metrics::PoolStatus;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// Events buffered between connection tasks and the hub.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// How long shutdown waits for connection tasks to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the accept loop needs to start serving.
pub struct ServerState {
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Credential table, handed to the hub at startup.
    pub credentials: CredentialStore,
    /// TLS acceptor shared by every connection.
    pub tls: TlsAcceptor,
    /// Occupancy handle the hub keeps current, read by `/ready`.
    pub status: PoolStatus,
}

/// Serve until the process exits.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: ServerState) -> Result<(), DuosError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the server with an externally-controlled shutdown signal.
///
/// Sending on (or dropping) the paired `watch::Sender` stops the accept
/// loop, tells every connection to close and waits briefly for their tasks.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: ServerState,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), DuosError> {
    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        capacity = state.config.capacity,
        users = state.credentials.len(),
        "server listening"
    );

    let params = ConnParams {
        acceptor: state.tls,
        handshake_timeout: Duration::from_secs(state.config.handshake_timeout),
        queue_depth: state.config.queue_depth,
    };
    let mut hub = Hub::new(state.config.capacity, state.credentials).with_status(state.status);
    let (events_tx, mut events_rx) = mpsc::channel::<Event>(EVENT_QUEUE_DEPTH);
    let mut tasks = JoinSet::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    next_id += 1;
                    let id = ConnId(next_id);
                    let _ = stream.set_nodelay(true);
                    tasks.spawn(handle_connection(
                        stream,
                        id,
                        addr,
                        params.clone(),
                        events_tx.clone(),
                    ));
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            Some(event) = events_rx.recv() => hub.handle(event),
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "connection task failed");
                }
            }
            _ = shutdown.changed() => {
                info!(tasks = tasks.len(), "shutdown signal received");
                break;
            }
        }
    }

    hub.shutdown();
    drop(events_tx);
    drop(listener);

    let drain = async {
        // Keep receiving so no task blocks on a full event queue.
        loop {
            tokio::select! {
                Some(_) = events_rx.recv() => {}
                joined = tasks.join_next() => if joined.is_none() { break },
            }
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!(remaining = tasks.len(), "drain timeout reached, aborting tasks");
        tasks.abort_all();
    }

    info!("server shut down");
    Ok(())
}
