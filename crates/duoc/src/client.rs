//! Protocol side of the chat client, free of any terminal handling.

use crate::error::ClientError;
use crate::tls::server_name;
use duo_common::types::admission::{ACCEPTED, REJECTED};
use duo_common::types::auth_result;
use duo_common::{AuthAction, Frame, FrameCodec};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::debug;

/// An admitted connection to a duo server.
pub struct Client {
    framed: Framed<TlsStream<TcpStream>, FrameCodec>,
}

impl Client {
    /// Connect, complete the TLS handshake and wait for the admission frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if the server's peer pool is full,
    /// or a transport error if the connection or handshake fails.
    pub async fn connect(
        host: &str,
        port: u16,
        connector: &TlsConnector,
    ) -> Result<Self, ClientError> {
        let name = server_name(host)?;
        let tcp = TcpStream::connect((host, port)).await?;
        let _ = tcp.set_nodelay(true);
        let tls = connector.connect(name, tcp).await?;
        debug!(host, port, "tls established");

        let mut client = Self {
            framed: Framed::new(tls, FrameCodec::new()),
        };
        match client.recv().await? {
            Some(Frame::Text(s)) if s == ACCEPTED => Ok(client),
            Some(Frame::Text(s)) if s == REJECTED => Err(ClientError::Rejected),
            Some(other) => Err(ClientError::UnexpectedFrame(other)),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Register `username`. Returns `false` if the name is taken.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an unexpected reply.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<bool, ClientError> {
        self.authenticate(AuthAction::Register, username, password)
            .await
    }

    /// Log in as `username`. Returns `false` on bad credentials or when the
    /// peer pool filled up since admission.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an unexpected reply.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<bool, ClientError> {
        self.authenticate(AuthAction::Login, username, password)
            .await
    }

    async fn authenticate(
        &mut self,
        action: AuthAction,
        username: &str,
        password: &str,
    ) -> Result<bool, ClientError> {
        self.send_text(action.as_str()).await?;
        self.send_text(username).await?;
        self.send_text(password).await?;
        match self.recv().await? {
            Some(Frame::Int(auth_result::SUCCESS)) => Ok(true),
            Some(Frame::Int(auth_result::FAILURE)) => Ok(false),
            Some(other) => Err(ClientError::UnexpectedFrame(other)),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or the write fails.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(Frame::text(text)).await
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or the write fails.
    pub async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Receive the next frame; `None` once the server has closed cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error on a malformed frame or a close mid-frame.
    pub async fn recv(&mut self) -> Result<Option<Frame>, ClientError> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Flush and close the TLS stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the close_notify cannot be written.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.framed.close().await?;
        Ok(())
    }
}
