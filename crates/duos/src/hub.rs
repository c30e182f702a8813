//! Single owner of all shared server state.
//!
//! Connection tasks never touch the arena, the peer set or the credential
//! store. They report [`Event`]s over one channel and receive [`Command`]s on
//! their own. The hub applies events one at a time, so no two mutations of
//! shared state ever interleave.

use crate::admission::{admit, Admission};
use crate::credentials::CredentialStore;
use crate::error::DuosError;
use crate::metrics::{counters, gauges, PoolStatus};
use crate::session::{Outcome, Session};
use duo_common::types::{chat_line, departure_notice};
use duo_common::frame::MAX_TEXT_LEN;
use duo_common::Frame;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Stable identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection task → hub.
#[derive(Debug)]
pub enum Event {
    /// TLS handshake finished; the connection awaits admission.
    Connected {
        /// Connection identifier.
        id: ConnId,
        /// Remote address.
        addr: SocketAddr,
        /// Channel the hub uses to drive this connection's writes.
        tx: mpsc::Sender<Command>,
    },
    /// One complete frame arrived.
    Frame {
        /// Connection identifier.
        id: ConnId,
        /// Decoded frame.
        frame: Frame,
    },
    /// The connection task ended: `None` for a clean close at a frame
    /// boundary, `Some` for any transport or framing failure.
    Closed {
        /// Connection identifier.
        id: ConnId,
        /// Why the task ended, if not cleanly.
        error: Option<DuosError>,
    },
}

/// Hub → connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write one frame.
    Send(Frame),
    /// Write one frame, then close the stream.
    SendAndClose(Frame),
    /// Close the stream.
    Close,
}

/// Why a connection left the watch set.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Departure {
    /// Clean close, or an empty chat frame.
    HungUp,
    /// Transport or protocol failure on the connection itself.
    Lost(String),
    /// Its command channel was gone while relaying to it.
    SendFailed,
}

impl Departure {
    const fn label(&self) -> &'static str {
        match self {
            Self::HungUp => "hung_up",
            Self::Lost(_) => "lost",
            Self::SendFailed => "send_failed",
        }
    }
}

#[derive(Debug)]
struct Conn {
    addr: SocketAddr,
    tx: mpsc::Sender<Command>,
    session: Session,
}

/// Connection arena plus the peer set indexed over it.
#[derive(Debug)]
pub struct Hub {
    capacity: usize,
    credentials: CredentialStore,
    /// Watch set: every admitted connection, authenticated or not.
    conns: HashMap<ConnId, Conn>,
    /// Peer set in login order. Every member is in `conns`.
    peers: Vec<ConnId>,
    status: PoolStatus,
}

impl Hub {
    /// Creates a hub with an empty arena.
    #[must_use]
    pub fn new(capacity: usize, credentials: CredentialStore) -> Self {
        Self {
            capacity,
            credentials,
            conns: HashMap::new(),
            peers: Vec::with_capacity(capacity),
            status: PoolStatus::new(capacity),
        }
    }

    /// Publish occupancy through `status` instead of a private handle.
    #[must_use]
    pub fn with_status(mut self, status: PoolStatus) -> Self {
        self.status = status;
        self.publish();
        self
    }

    /// Occupancy handle updated after every event.
    #[must_use]
    pub const fn status(&self) -> &PoolStatus {
        &self.status
    }

    /// Number of connections in the watch set.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// Number of authenticated peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Usernames of the authenticated peers, in login order.
    #[must_use]
    pub fn peer_names(&self) -> Vec<&str> {
        self.peers
            .iter()
            .filter_map(|id| self.conns.get(id))
            .filter_map(|c| c.session.username())
            .collect()
    }

    /// Returns `true` if `id` is in the watch set.
    #[must_use]
    pub fn is_watched(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    /// Read access to the credential table.
    #[must_use]
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Apply one event to completion.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Connected { id, addr, tx } => self.on_connected(id, addr, tx),
            Event::Frame { id, frame } => self.on_frame(id, frame),
            Event::Closed { id, error } => {
                let reason = match error {
                    None => Departure::HungUp,
                    Some(e) => Departure::Lost(e.to_string()),
                };
                self.disconnect(id, reason);
            }
        }
        self.publish();
    }

    /// Tell every live connection to close and empty the arena.
    pub fn shutdown(&mut self) {
        info!(connections = self.conns.len(), "closing all connections");
        for (_, conn) in self.conns.drain() {
            let _ = conn.tx.try_send(Command::Close);
        }
        self.peers.clear();
        self.status.set_accepting(false);
        self.publish();
    }

    fn publish(&self) {
        gauges::set_connections_open(self.conns.len());
        gauges::set_peers_authenticated(self.peers.len());
        self.status.update(self.peers.len(), self.conns.len());
    }

    fn on_connected(&mut self, id: ConnId, addr: SocketAddr, tx: mpsc::Sender<Command>) {
        let decision = admit(self.peers.len(), self.capacity);
        counters::admissions_total(decision.label());

        match decision {
            Admission::Accept => {
                info!(conn = %id, %addr, "got connection");
                if tx.try_send(Command::Send(decision.frame())).is_err() {
                    debug!(conn = %id, "connection went away before admission reply");
                }
                self.conns.insert(
                    id,
                    Conn {
                        addr,
                        tx,
                        session: Session::new(),
                    },
                );
            }
            Admission::Reject => {
                info!(conn = %id, %addr, peers = self.peers.len(), "rejected: peer pool full");
                let _ = tx.try_send(Command::SendAndClose(decision.frame()));
            }
        }
    }

    fn on_frame(&mut self, id: ConnId, frame: Frame) {
        let pool_has_room = self.peers.len() < self.capacity;
        let Some(conn) = self.conns.get_mut(&id) else {
            debug!(conn = %id, "frame from unknown connection ignored");
            return;
        };

        if let Some(name) = conn.session.username() {
            let name = name.to_string();
            self.on_chat(id, &name, frame);
            return;
        }

        let outcome = match conn.session.step(frame, &mut self.credentials, pool_has_room) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(conn = %id, error = %e, "dropping connection");
                self.disconnect(id, Departure::Lost(e.to_string()));
                return;
            }
        };

        if let Some((action, result)) = outcome.labels() {
            counters::auth_total(action, result);
        }

        let mut send_failed = false;
        if let Some(reply) = outcome.reply() {
            send_failed = conn.tx.try_send(Command::Send(reply)).is_err();
        }

        match &outcome {
            Outcome::Registered(name) => info!(conn = %id, user = %name, "registered"),
            Outcome::LoggedIn(name) => {
                info!(conn = %id, user = %name, addr = %conn.addr, "logged in");
                self.peers.push(id);
            }
            Outcome::LoginRejected(reason) => {
                debug!(conn = %id, ?reason, "login refused");
            }
            _ => {}
        }

        if send_failed {
            self.disconnect(id, Departure::SendFailed);
        }
    }

    fn on_chat(&mut self, id: ConnId, username: &str, frame: Frame) {
        match frame {
            Frame::Text(text) if text.is_empty() => self.disconnect(id, Departure::HungUp),
            Frame::Text(text) => {
                let line = chat_line(username, &text);
                if line.len() > MAX_TEXT_LEN {
                    counters::messages_dropped_total("too_large");
                    warn!(conn = %id, len = line.len(), "chat line exceeds frame limit, dropped");
                    return;
                }
                let failed = self.fan_out(&line, Some(id));
                counters::messages_relayed_total();
                for peer in failed {
                    self.disconnect(peer, Departure::SendFailed);
                }
            }
            Frame::Int(n) => {
                debug!(conn = %id, value = n, "ignoring int frame from peer");
            }
        }
    }

    /// Queue `text` to every peer except `except`.
    ///
    /// Returns the peers whose connection task is gone.
    fn fan_out(&self, text: &str, except: Option<ConnId>) -> Vec<ConnId> {
        let mut failed = Vec::new();
        for &peer in &self.peers {
            if Some(peer) == except {
                continue;
            }
            let Some(conn) = self.conns.get(&peer) else {
                continue;
            };
            match conn.tx.try_send(Command::Send(Frame::text(text))) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    counters::messages_dropped_total("queue_full");
                    warn!(conn = %peer, "outbound queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => failed.push(peer),
            }
        }
        failed
    }

    /// Remove `id` from the watch set and peer set.
    ///
    /// Departing peers are announced to the remaining ones; any peer that
    /// cannot take the announcement is removed in turn.
    fn disconnect(&mut self, id: ConnId, reason: Departure) {
        let mut pending = VecDeque::from([(id, reason)]);

        while let Some((id, reason)) = pending.pop_front() {
            let Some(conn) = self.conns.remove(&id) else {
                debug!(conn = %id, "close for connection outside the watch set");
                continue;
            };
            self.peers.retain(|p| *p != id);
            counters::departures_total(reason.label());

            let Some(name) = conn.session.username() else {
                debug!(conn = %id, addr = %conn.addr, reason = reason.label(), "unauthenticated connection closed");
                continue;
            };

            match &reason {
                Departure::HungUp => info!(conn = %id, user = %name, "hung up"),
                Departure::Lost(e) => error!(conn = %id, user = %name, error = %e, "connection lost"),
                Departure::SendFailed => error!(conn = %id, user = %name, "relay to peer failed"),
            }

            let notice = departure_notice(name);
            for peer in self.fan_out(&notice, None) {
                pending.push_back((peer, Departure::SendFailed));
            }
            // Dropping `conn.tx` tells the task to close if it is still running.
        }
    }
}
