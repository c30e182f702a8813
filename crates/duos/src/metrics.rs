//! Prometheus exporter plus the `/health` and `/ready` endpoints.
//!
//! `/ready` answers from a [`PoolStatus`] the hub republishes after every
//! event: 200 while the server is taking new peers, 503 when the peer pool is
//! full or the server is draining.

use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Occupancy figures served by `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    /// `false` once shutdown has begun.
    pub accepting: bool,
    /// Authenticated peers.
    pub peers: usize,
    /// Admitted connections, authenticated or not.
    pub connections: usize,
    /// Configured peer capacity.
    pub capacity: usize,
}

impl PoolSnapshot {
    /// A new client would be admitted right now.
    #[must_use]
    pub const fn has_room(&self) -> bool {
        self.accepting && self.peers < self.capacity
    }
}

#[derive(Debug)]
struct PoolCells {
    accepting: AtomicBool,
    peers: AtomicUsize,
    connections: AtomicUsize,
    capacity: usize,
}

/// Handle shared between the hub (writer) and the HTTP endpoint (reader).
#[derive(Debug, Clone)]
pub struct PoolStatus {
    cells: Arc<PoolCells>,
}

impl PoolStatus {
    /// Empty pool of the given capacity, accepting.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: Arc::new(PoolCells {
                accepting: AtomicBool::new(true),
                peers: AtomicUsize::new(0),
                connections: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Publish the hub's current set sizes.
    pub fn update(&self, peers: usize, connections: usize) {
        self.cells.peers.store(peers, Ordering::Relaxed);
        self.cells.connections.store(connections, Ordering::Relaxed);
    }

    /// Flip to draining (or back).
    pub fn set_accepting(&self, accepting: bool) {
        self.cells.accepting.store(accepting, Ordering::Relaxed);
    }

    /// Current figures.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            accepting: self.cells.accepting.load(Ordering::Relaxed),
            peers: self.cells.peers.load(Ordering::Relaxed),
            connections: self.cells.connections.load(Ordering::Relaxed),
            capacity: self.cells.capacity,
        }
    }
}

/// Serve `/metrics`, `/health` and `/ready` on `addr`.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or binding fails.
pub async fn start_metrics_server(addr: SocketAddr, status: PoolStatus) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "ok" }))
        .route("/ready", get(ready))
        .with_state(status);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ready(State(status): State<PoolStatus>) -> (StatusCode, Json<PoolSnapshot>) {
    let snapshot = status.snapshot();
    let code = if snapshot.has_room() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot))
}

/// Gauges mirroring the hub's sets.
pub mod gauges {
    /// Size of the watch set.
    pub fn set_connections_open(n: usize) {
        metrics::gauge!("duo_connections_open").set(n as f64);
    }

    /// Size of the peer set.
    pub fn set_peers_authenticated(n: usize) {
        metrics::gauge!("duo_peers_authenticated").set(n as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record an admission decision with the given status label.
    pub fn admissions_total(status: &'static str) {
        metrics::counter!("duo_admissions_total", "status" => status).increment(1);
    }

    /// Record a completed register or login attempt.
    pub fn auth_total(action: &'static str, result: &'static str) {
        metrics::counter!("duo_auth_total", "action" => action, "result" => result).increment(1);
    }

    /// Increment the relayed-messages counter.
    pub fn messages_relayed_total() {
        metrics::counter!("duo_messages_relayed_total").increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("duo_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Record a connection leaving the watch set.
    pub fn departures_total(reason: &'static str) {
        metrics::counter!("duo_departures_total", "reason" => reason).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tracks_updates() {
        let status = PoolStatus::new(2);
        let reader = status.clone();
        status.update(1, 3);
        assert_eq!(
            reader.snapshot(),
            PoolSnapshot {
                accepting: true,
                peers: 1,
                connections: 3,
                capacity: 2,
            }
        );
    }

    #[tokio::test]
    async fn ready_while_room_left() {
        let status = PoolStatus::new(2);
        status.update(1, 1);
        let (code, Json(body)) = ready(State(status)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.peers, 1);
        assert_eq!(body.capacity, 2);
    }

    #[tokio::test]
    async fn unavailable_when_full() {
        let status = PoolStatus::new(2);
        status.update(2, 4);
        let (code, Json(body)) = ready(State(status)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.has_room());
    }

    #[tokio::test]
    async fn unavailable_while_draining() {
        let status = PoolStatus::new(2);
        status.set_accepting(false);
        let (code, _) = ready(State(status)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        gauges::set_connections_open(3);
        counters::auth_total("login", "success");
        counters::departures_total("hung_up");
    }
}
