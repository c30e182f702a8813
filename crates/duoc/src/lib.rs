//! duo chat client: connects to a duo server over TLS, authenticates and
//! exchanges chat lines.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
/// CLI parsing.
pub mod config;
/// Client error type.
pub mod error;
/// TLS connector trusting a single certificate file.
pub mod tls;

pub use client::Client;
pub use error::ClientError;
