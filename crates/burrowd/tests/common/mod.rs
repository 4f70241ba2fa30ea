//! Shared helpers for the integration tests: a relay spawned on an
//! ephemeral port and a minimal line-oriented test client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use burrow_common::crypto::{CryptoEngine, KeyContext};
use burrow_common::message::Message;
use burrow_common::types::{ClientId, ALGORITHM};
use burrowd::config::ServerConfig;
use burrowd::server::ServerState;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_conns: 64,
        max_frame: 1024 * 1024,
        queue_depth: 64,
        stats_interval: 0,
        shutdown_grace: 2,
        algorithm: ALGORITHM.to_string(),
        console: false,
    }
}

/// Starts a relay with the default test config on an ephemeral port.
pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(
        test_config(addr),
        CryptoEngine::new(KeyContext::generate()),
    ));
    spawn_server(listener, Arc::clone(&state)).await;
    (addr, state)
}

/// Starts a relay with custom connection and frame limits.
pub async fn start_server_with_limits(
    max_conns: usize,
    max_frame: usize,
) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    config.max_conns = max_conns;
    config.max_frame = max_frame;
    let state = Arc::new(ServerState::new(
        config,
        CryptoEngine::new(KeyContext::generate()),
    ));
    spawn_server(listener, Arc::clone(&state)).await;
    (addr, state)
}

async fn spawn_server(listener: TcpListener, state: Arc<ServerState>) {
    tokio::spawn(async move {
        if let Err(e) = burrowd::run(listener, state).await {
            eprintln!("test server error: {e}");
        }
    });
    // Give the accept loop a moment to come up.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// A relay client over a raw TCP stream.
pub struct TestClient {
    pub id: ClientId,
    pub key: KeyContext,
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connects and consumes the welcome frame.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("failed to connect");
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader).lines();

        let line = tokio::time::timeout(Duration::from_secs(5), reader.next_line())
            .await
            .expect("timed out waiting for welcome")
            .expect("welcome read failed")
            .expect("connection closed before welcome");
        let frame = Message::from_line(line.as_bytes()).expect("welcome did not parse");
        let Message::Welcome {
            client_id,
            encryption_key,
            encryption_iv,
            ..
        } = frame
        else {
            panic!("expected welcome, got {frame:?}");
        };
        let key = KeyContext::from_hex(&encryption_key, &encryption_iv)
            .expect("welcome carried unusable key material");

        Self {
            id: client_id,
            key,
            reader,
            writer,
        }
    }

    /// Crypto engine built from the key material this client was welcomed
    /// with.
    pub fn engine(&self) -> CryptoEngine {
        CryptoEngine::new(self.key.clone())
    }

    pub async fn send(&mut self, frame: &Message) {
        self.writer
            .write_all(&frame.to_line().unwrap())
            .await
            .expect("send failed");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("send failed");
    }

    /// Encrypts `plaintext` and sends it as a data frame.
    pub async fn send_encrypted(&mut self, plaintext: &[u8]) {
        let ciphertext = self.engine().encrypt(plaintext);
        self.send(&Message::data(&ciphertext)).await;
    }

    /// Next frame, panicking after five seconds.
    pub async fn recv(&mut self) -> Message {
        let line = tokio::time::timeout(Duration::from_secs(5), self.reader.next_line())
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed")
            .expect("connection closed");
        Message::from_line(line.as_bytes()).expect("frame did not parse")
    }

    /// Next frame, or `None` if nothing arrives before the timeout.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        match tokio::time::timeout(timeout, self.reader.next_line()).await {
            Ok(Ok(Some(line))) => {
                Some(Message::from_line(line.as_bytes()).expect("frame did not parse"))
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => panic!("read failed: {e}"),
            Err(_) => None,
        }
    }

    /// Waits for the relay to close this connection, skipping any frames
    /// still in flight. Panics if the connection outlives the timeout.
    pub async fn expect_closed(&mut self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.reader.next_line()).await {
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) | Ok(Err(_)) => return,
                Err(_) => panic!("connection still open after {timeout:?}"),
            }
        }
    }
}
