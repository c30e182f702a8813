use crate::error::DuosError;
use crate::hub::{Command, ConnId, Event};
use duo_common::{FrameCodec, FrameError};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::debug;

type FramedTls = Framed<TlsStream<TcpStream>, FrameCodec>;

/// Per-connection settings copied out of the server config.
#[derive(Clone)]
pub(crate) struct ConnParams {
    pub acceptor: TlsAcceptor,
    pub handshake_timeout: Duration,
    pub queue_depth: usize,
}

/// Drive one client from TCP accept to close.
///
/// The hub hears about the connection only after the TLS handshake
/// succeeds, and always hears a final [`Event::Closed`] after that.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    id: ConnId,
    addr: SocketAddr,
    params: ConnParams,
    events: mpsc::Sender<Event>,
) {
    let tls = match handshake(stream, &params).await {
        Ok(tls) => tls,
        Err(e) => {
            debug!(conn = %id, %addr, error = %e, "tls handshake failed");
            return;
        }
    };

    let (tx, rx) = mpsc::channel(params.queue_depth);
    if events.send(Event::Connected { id, addr, tx }).await.is_err() {
        return;
    }

    let mut framed = Framed::new(tls, FrameCodec::new());
    let result = run_loop(&mut framed, id, rx, &events).await;
    if let Err(e) = &result {
        debug!(conn = %id, error = %e, "connection ended with error");
    }
    let _ = framed.close().await;
    let _ = events
        .send(Event::Closed {
            id,
            error: result.err(),
        })
        .await;
}

async fn handshake(
    stream: TcpStream,
    params: &ConnParams,
) -> Result<TlsStream<TcpStream>, DuosError> {
    match timeout(params.handshake_timeout, params.acceptor.accept(stream)).await {
        Ok(Ok(tls)) => Ok(tls),
        Ok(Err(e)) => Err(DuosError::Io(e)),
        Err(_) => Err(DuosError::HandshakeTimeout),
    }
}

/// Relay inbound frames to the hub and hub commands to the socket.
///
/// Returns `Ok` when either side closes cleanly.
async fn run_loop(
    framed: &mut FramedTls,
    id: ConnId,
    mut commands: mpsc::Receiver<Command>,
    events: &mpsc::Sender<Event>,
) -> Result<(), DuosError> {
    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                Some(Ok(frame)) => {
                    if events.send(Event::Frame { id, frame }).await.is_err() {
                        return Err(DuosError::ConnectionClosed);
                    }
                }
                None => return Ok(()),
                Some(Err(e)) if is_clean_eof(&e, framed) => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
            },
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => framed.send(frame).await?,
                Some(Command::SendAndClose(frame)) => {
                    framed.send(frame).await?;
                    return Ok(());
                }
                // The hub dropped our sender: we left the watch set.
                Some(Command::Close) | None => return Ok(()),
            },
        }
    }
}

/// A peer that drops TCP without a TLS close_notify between frames has
/// still hung up cleanly.
fn is_clean_eof(err: &FrameError, framed: &FramedTls) -> bool {
    matches!(err, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
        && framed.read_buffer().is_empty()
}
