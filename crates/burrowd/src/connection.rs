//! Per-session connection task: welcome, read loop, frame dispatch and
//! relay fan-out.

use std::sync::Arc;
use std::time::Instant;

use burrow_common::codec::FrameCodec;
use burrow_common::message::Message;
use burrow_common::types::{TUNNEL_REQUEST_ESTABLISH, WELCOME_TEXT};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::metrics::{counters, gauges, histograms};
use crate::server::ServerState;
use crate::session::{SessionHandle, SessionState};

/// Socket read buffer size. Frames larger than this are reassembled by the
/// codec across reads.
const READ_CHUNK: usize = 8 * 1024;

/// Runs one client session from registration to deregistration.
///
/// The accept loop registers the session before spawning this task, so
/// client ids follow acceptance order.
pub async fn handle_connection(
    stream: TcpStream,
    session: Arc<SessionHandle>,
    mut deliver_rx: mpsc::Receiver<Vec<u8>>,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), RelayError> {
    gauges::inc_sessions_active();
    info!(client = session.id, peer = %session.addr, "client connected");

    let (mut reader, mut writer) = stream.into_split();
    let result = run_session(
        &mut reader,
        &mut writer,
        &mut deliver_rx,
        &state,
        &session,
        &mut shutdown,
    )
    .await;

    state.registry.deregister(session.id);
    gauges::dec_sessions_active();
    info!(client = session.id, "client disconnected");
    result
}

/// Welcome handshake plus the session's select loop.
///
/// The loop ends when the peer closes the socket, an I/O or codec error
/// occurs, or the server signals shutdown. Deregistration happens in the
/// caller either way.
async fn run_session<R, W>(
    reader: &mut R,
    writer: &mut W,
    deliver_rx: &mut mpsc::Receiver<Vec<u8>>,
    state: &ServerState,
    session: &Arc<SessionHandle>,
    shutdown: &mut watch::Receiver<()>,
) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ctx = state.crypto.context();
    let welcome = Message::welcome(session.id, WELCOME_TEXT, ctx.key_hex(), ctx.iv_hex());
    send_line(writer, session, &welcome).await?;
    session.advance(SessionState::Welcomed);

    let mut codec = FrameCodec::new(state.config.max_frame);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        session.add_bytes_received(n as u64);
                        if let Err(e) = codec.push(&chunk[..n]) {
                            counters::frames_dropped_total("oversize");
                            return Err(e.into());
                        }
                        while let Some(parsed) = codec.next_message() {
                            match parsed {
                                Ok(message) => {
                                    process_message(message, session, state, writer).await?;
                                }
                                Err(e) => {
                                    counters::parse_errors_total();
                                    warn!(client = session.id, error = %e, "dropping undecodable frame");
                                }
                            }
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(line) = deliver_rx.recv() => {
                writer.write_all(&line).await?;
                session.add_bytes_sent(line.len() as u64);
                counters::payload_bytes_total("out", line.len() as u64);
            }
            _ = shutdown.changed() => {
                debug!(client = session.id, "closing session for shutdown");
                return Ok(());
            }
        }
    }
}

/// Dispatches one parsed inbound frame.
///
/// Decode and decrypt failures are contained here: they are logged and
/// counted but never returned, so a bad frame costs the sender nothing but
/// the frame itself.
async fn process_message<W>(
    message: Message,
    session: &Arc<SessionHandle>,
    state: &ServerState,
    writer: &mut W,
) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    match message {
        Message::Ping { timestamp } => {
            send_line(writer, session, &Message::pong(timestamp)).await?;
        }
        Message::Tunnel { request } => {
            if request == TUNNEL_REQUEST_ESTABLISH {
                session.advance(SessionState::TunnelEstablished);
                debug!(client = session.id, "tunnel established");
                send_line(writer, session, &Message::tunnel_established()).await?;
            } else {
                debug!(client = session.id, request = %request, "ignoring unrecognized tunnel request");
            }
        }
        Message::Data { encrypted, payload } => {
            if !encrypted {
                warn!(client = session.id, "dropping data frame marked unencrypted");
                counters::frames_dropped_total("plaintext");
                return Ok(());
            }
            let start = Instant::now();
            let ciphertext = match hex::decode(&payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(client = session.id, error = %e, "data payload is not valid hex");
                    counters::decrypt_failures_total();
                    return Ok(());
                }
            };
            match state.crypto.decrypt(&ciphertext) {
                Ok(plaintext) => {
                    counters::payload_bytes_total("in", plaintext.len() as u64);
                    let line = Message::relay(session.id, &plaintext).to_line()?;
                    let delivered = state.registry.broadcast(session.id, &line);
                    histograms::broadcast_latency_seconds(start.elapsed().as_secs_f64());
                    debug!(
                        client = session.id,
                        recipients = delivered,
                        bytes = plaintext.len(),
                        "relayed data frame"
                    );
                }
                Err(e) => {
                    warn!(client = session.id, error = %e, "failed to decrypt data frame");
                    counters::decrypt_failures_total();
                }
            }
        }
        msg @ (Message::Welcome { .. }
        | Message::Pong { .. }
        | Message::TunnelEstablished { .. }
        | Message::Relay { .. }) => {
            debug!(
                client = session.id,
                kind = msg.kind(),
                "ignoring server-direction frame from client"
            );
        }
        Message::Unknown => {
            debug!(client = session.id, "ignoring unknown frame type");
        }
    }
    Ok(())
}

/// Serializes a frame and writes it to this session's socket.
async fn send_line<W>(
    writer: &mut W,
    session: &SessionHandle,
    message: &Message,
) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    let line = message.to_line()?;
    writer.write_all(&line).await?;
    session.add_bytes_sent(line.len() as u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use burrow_common::crypto::{CryptoEngine, KeyContext};
    use burrow_common::types::ALGORITHM;
    use std::net::SocketAddr;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn test_state() -> Arc<ServerState> {
        let config = ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            max_conns: 16,
            max_frame: 64 * 1024,
            queue_depth: 8,
            stats_interval: 0,
            shutdown_grace: 1,
            algorithm: ALGORITHM.to_string(),
            console: false,
        };
        Arc::new(ServerState::new(config, CryptoEngine::new(KeyContext::generate())))
    }

    fn register(state: &ServerState) -> (Arc<SessionHandle>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        (state.registry.register(test_addr(), tx), rx)
    }

    async fn read_message<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Message {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        Message::from_line(line.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn ping_is_answered_with_matching_pong() {
        let state = test_state();
        let (session, _rx) = register(&state);
        let (mut server_io, client_io) = tokio::io::duplex(1024);
        let mut client = BufReader::new(client_io);

        process_message(Message::ping(-123), &session, &state, &mut server_io)
            .await
            .unwrap();

        assert_eq!(read_message(&mut client).await, Message::pong(-123));
    }

    #[tokio::test]
    async fn tunnel_request_is_acknowledged_each_time() {
        let state = test_state();
        let (session, _rx) = register(&state);
        let (mut server_io, client_io) = tokio::io::duplex(1024);
        let mut client = BufReader::new(client_io);

        for _ in 0..2 {
            process_message(Message::tunnel_establish(), &session, &state, &mut server_io)
                .await
                .unwrap();
            assert_eq!(read_message(&mut client).await, Message::tunnel_established());
        }
        assert_eq!(session.state(), SessionState::TunnelEstablished);
    }

    #[tokio::test]
    async fn unrecognized_tunnel_verb_is_ignored() {
        let state = test_state();
        let (session, _rx) = register(&state);
        let (mut server_io, client_io) = tokio::io::duplex(1024);

        let frame = Message::Tunnel {
            request: "teardown".to_string(),
        };
        process_message(frame, &session, &state, &mut server_io)
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        drop(server_io);
        let mut written = Vec::new();
        BufReader::new(client_io).read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn data_frame_decrypts_and_broadcasts_to_peers() {
        let state = test_state();
        let (sender, mut sender_rx) = register(&state);
        let (_peer, mut peer_rx) = register(&state);
        let (mut server_io, _client_io) = tokio::io::duplex(1024);

        let ciphertext = state.crypto.encrypt(b"hello");
        process_message(Message::data(&ciphertext), &sender, &state, &mut server_io)
            .await
            .unwrap();

        let line = peer_rx.try_recv().unwrap();
        assert_eq!(
            Message::from_line(&line).unwrap(),
            Message::relay(sender.id, b"hello")
        );
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn garbage_hex_payload_is_contained() {
        let state = test_state();
        let (sender, _sender_rx) = register(&state);
        let (_peer, mut peer_rx) = register(&state);
        let (mut server_io, _client_io) = tokio::io::duplex(1024);

        let frame = Message::Data {
            encrypted: true,
            payload: "zz not hex".to_string(),
        };
        process_message(frame, &sender, &state, &mut server_io)
            .await
            .unwrap();

        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wrong_length_ciphertext_is_contained() {
        let state = test_state();
        let (sender, _sender_rx) = register(&state);
        let (_peer, mut peer_rx) = register(&state);
        let (mut server_io, _client_io) = tokio::io::duplex(1024);

        let frame = Message::Data {
            encrypted: true,
            payload: "deadbeef".to_string(),
        };
        process_message(frame, &sender, &state, &mut server_io)
            .await
            .unwrap();

        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn plaintext_data_is_dropped() {
        let state = test_state();
        let (sender, _sender_rx) = register(&state);
        let (_peer, mut peer_rx) = register(&state);
        let (mut server_io, _client_io) = tokio::io::duplex(1024);

        let frame = Message::Data {
            encrypted: false,
            payload: hex::encode(state.crypto.encrypt(b"hello")),
        };
        process_message(frame, &sender, &state, &mut server_io)
            .await
            .unwrap();

        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_direction_frames_are_ignored() {
        let state = test_state();
        let (session, _rx) = register(&state);
        let (_peer, mut peer_rx) = register(&state);
        let (mut server_io, client_io) = tokio::io::duplex(1024);

        let frames = vec![
            Message::welcome(9, "hi", "00".repeat(32), "11".repeat(16)),
            Message::pong(1),
            Message::tunnel_established(),
            Message::relay(9, b"loop"),
            Message::Unknown,
        ];
        for frame in frames {
            process_message(frame, &session, &state, &mut server_io)
                .await
                .unwrap();
        }

        assert!(peer_rx.try_recv().is_err());
        drop(server_io);
        let mut written = Vec::new();
        BufReader::new(client_io).read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty());
    }
}
