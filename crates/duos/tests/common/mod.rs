#![allow(dead_code)]

use duo_common::{Frame, FrameCodec};
use duoc::{Client, ClientError};
use duos::config::ServerConfig;
use duos::credentials::CredentialStore;
use duos::error::DuosError;
use duos::metrics::PoolStatus;
use duos::server::ServerState;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;

pub type RawConn = Framed<TlsStream<TcpStream>, FrameCodec>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config(dir: &Path, port: u16, capacity: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        cert: dir.join("cert.pem"),
        key: None,
        users: dir.join("users.json"),
        capacity,
        handshake_timeout: 5,
        queue_depth: 64,
        hash_iterations: 1_000,
        metrics_addr: None,
    }
}

/// Self-signed certificate and key for `localhost`, in one PEM file.
pub fn write_cert(dir: &Path) -> PathBuf {
    let ck = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let path = dir.join("cert.pem");
    std::fs::write(
        &path,
        format!("{}{}", ck.cert.pem(), ck.key_pair.serialize_pem()),
    )
    .unwrap();
    path
}

pub struct TestServer {
    pub port: u16,
    pub dir: TempDir,
    pub connector: TlsConnector,
    pub status: PoolStatus,
    shutdown: watch::Sender<()>,
    handle: JoinHandle<Result<(), DuosError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_capacity(2).await
    }

    pub async fn start_with_capacity(capacity: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_cert(dir.path());
        Self::start_in(dir, capacity).await
    }

    /// Start on an existing directory, reusing its cert and credential table.
    pub async fn start_in(dir: TempDir, capacity: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = test_config(dir.path(), port, capacity);
        config.validate().unwrap();

        let tls = duos::tls::load_acceptor(&config.cert, config.key_path()).unwrap();
        let credentials =
            CredentialStore::load(&config.users).with_iterations(config.hash_iterations);
        let connector = duoc::tls::load_connector(&config.cert).unwrap();
        let status = PoolStatus::new(capacity);
        let state = ServerState {
            config,
            credentials,
            tls,
            status: status.clone(),
        };

        let (shutdown, rx) = watch::channel(());
        let handle = tokio::spawn(duos::run_with_shutdown(listener, state, rx));

        Self {
            port,
            dir,
            connector,
            status,
            shutdown,
            handle,
        }
    }

    /// Stop the server and hand back its directory.
    pub async fn stop(self) -> TempDir {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("timeout waiting for shutdown")
            .unwrap()
            .unwrap();
        self.dir
    }

    pub async fn try_connect(&self) -> Result<Client, ClientError> {
        tokio::time::timeout(TIMEOUT, Client::connect("localhost", self.port, &self.connector))
            .await
            .expect("timeout waiting for admission")
    }

    /// TLS connection with no protocol handling, for watching the raw frames.
    pub async fn connect_raw(&self) -> RawConn {
        let tcp = TcpStream::connect(("127.0.0.1", self.port)).await.unwrap();
        let name = duoc::tls::server_name("localhost").unwrap();
        let tls = self.connector.connect(name, tcp).await.unwrap();
        Framed::new(tls, FrameCodec::new())
    }

    pub async fn connect(&self) -> TestClient {
        TestClient {
            inner: self.try_connect().await.unwrap(),
        }
    }

    pub async fn login_as(&self, username: &str, password: &str) -> TestClient {
        let mut client = self.connect().await;
        assert!(client.register(username, password).await);
        assert!(client.login(username, password).await);
        client
    }
}

pub struct TestClient {
    pub inner: Client,
}

impl TestClient {
    pub async fn register(&mut self, username: &str, password: &str) -> bool {
        tokio::time::timeout(TIMEOUT, self.inner.register(username, password))
            .await
            .expect("timeout waiting for register result")
            .unwrap()
    }

    pub async fn login(&mut self, username: &str, password: &str) -> bool {
        tokio::time::timeout(TIMEOUT, self.inner.login(username, password))
            .await
            .expect("timeout waiting for login result")
            .unwrap()
    }

    pub async fn send(&mut self, text: &str) {
        self.inner.send_text(text).await.unwrap();
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        self.inner.send(frame).await.unwrap();
    }

    /// Next frame, or `None` if the server closed.
    pub async fn recv_raw(&mut self) -> Result<Option<Frame>, ClientError> {
        tokio::time::timeout(TIMEOUT, self.inner.recv())
            .await
            .expect("timeout waiting for frame")
    }

    pub async fn recv_text(&mut self) -> String {
        match self.recv_raw().await.unwrap() {
            Some(Frame::Text(s)) => s,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Asserts nothing arrives within `ms` milliseconds.
    pub async fn expect_silence(&mut self, ms: u64) {
        if let Ok(frame) =
            tokio::time::timeout(Duration::from_millis(ms), self.inner.recv()).await
        {
            panic!("expected no frame, got {frame:?}");
        }
    }

    /// Asserts the server has closed the connection.
    pub async fn expect_closed(&mut self) {
        match self.recv_raw().await {
            Ok(None) | Err(_) => {}
            Ok(Some(frame)) => panic!("expected close, got {frame:?}"),
        }
    }
}
