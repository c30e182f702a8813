use crate::credentials::CredentialError;
use duo_common::FrameError;
use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum DuosError {
    /// Underlying I/O error, including a failed TLS handshake.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame encoding or decoding error, including a close mid-frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// rustls rejected the server configuration.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// The certificate or key file did not contain usable PEM material.
    #[error("tls material error: {0}")]
    TlsMaterial(String),
    /// The client did not finish the TLS handshake in time.
    #[error("tls handshake timed out")]
    HandshakeTimeout,
    /// The connection or the hub went away.
    #[error("connection closed")]
    ConnectionClosed,
    /// The peer sent a frame the session cannot accept in its current phase.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The credential table could not be persisted.
    #[error("credential store error: {0}")]
    Credentials(#[from] CredentialError),
}
