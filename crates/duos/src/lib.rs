//! duo relay server: a TLS chat relay for a small fixed pool of peers.
//!
//! Clients connect over TLS, are admitted while the peer pool has room,
//! register or log in against a JSON credential table, then have every
//! text line they send relayed to the other authenticated peers.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admission;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
pub mod credentials;
/// Error types for relay server operations.
pub mod error;
pub mod hub;
pub mod metrics;
/// Accept loop and server startup state.
pub mod server;
pub mod session;
pub mod tls;

pub use server::{run, run_with_shutdown, ServerState};
