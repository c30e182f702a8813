use duo_common::{Frame, FrameError};
use thiserror::Error;

/// Errors surfaced by the chat client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Socket or file I/O failed, including the TLS handshake.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The server sent bytes that are not a valid frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// rustls rejected the client configuration.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// The trust file or server name is unusable.
    #[error("certificate error: {0}")]
    Certificate(String),
    /// The server's peer pool is full.
    #[error("server rejected the connection: peer pool is full")]
    Rejected,
    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
    /// The server sent a frame that does not fit the current exchange.
    #[error("unexpected frame from server: {0}")]
    UnexpectedFrame(Frame),
}
