//! Interactive terminal client for the burrow relay.
//!
//! Connects, learns the shared key from the welcome frame, then turns
//! every stdin line into an encrypted data frame. Relay frames arriving
//! from other clients were already decrypted by the relay, so they print
//! as plain text.

#![forbid(unsafe_code)]

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use burrow_common::crypto::{unix_millis, CryptoEngine, KeyContext};
use burrow_common::message::Message;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── ANSI style helpers ──────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";

fn tty() -> bool {
    std::io::stderr().is_terminal()
}

fn style(code: &'static str) -> &'static str {
    if tty() {
        code
    } else {
        ""
    }
}

#[derive(Parser, Debug)]
#[command(name = "burrowc")]
#[command(about = "Interactive client for the burrow relay")]
#[command(version)]
struct Args {
    /// Relay address to connect to.
    #[arg(long, default_value = "127.0.0.1:8080", env = "BURROWC_SERVER")]
    server: String,

    /// Seconds between automatic pings (0 disables them).
    #[arg(long, default_value = "30", env = "BURROWC_PING_INTERVAL")]
    ping_interval: u64,

    /// Verbose logging (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let stream = TcpStream::connect(&args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let (reader, mut writer) = stream.into_split();
    let mut socket_lines = BufReader::new(reader).lines();

    let welcome = match socket_lines.next_line().await? {
        Some(line) => {
            Message::from_line(line.as_bytes()).context("relay sent an invalid welcome")?
        }
        None => bail!("relay closed the connection before the welcome frame"),
    };
    let kind = welcome.kind();
    let Message::Welcome {
        client_id,
        message,
        encryption_key,
        encryption_iv,
    } = welcome
    else {
        bail!("expected a welcome frame, got a {} frame", kind);
    };
    let key = KeyContext::from_hex(&encryption_key, &encryption_iv)
        .context("relay sent unusable key material")?;
    let engine = CryptoEngine::new(key);

    eprintln!();
    eprintln!(
        "  {}burrowc{} v{}",
        style(BOLD),
        style(RESET),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("  {}relay:{}     {}", style(DIM), style(RESET), args.server);
    eprintln!("  {}client id:{} {}", style(DIM), style(RESET), client_id);
    eprintln!("  {}greeting:{}  {}", style(DIM), style(RESET), message);
    eprintln!();
    eprintln!(
        "  type a line to send it; {}/ping{}, {}/tunnel{} and {}/quit{} are commands",
        style(BOLD),
        style(RESET),
        style(BOLD),
        style(RESET),
        style(BOLD),
        style(RESET)
    );
    eprintln!();

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let pings_enabled = args.ping_interval > 0;
    let mut ping_timer =
        tokio::time::interval(Duration::from_secs(args.ping_interval.max(1)));

    loop {
        tokio::select! {
            line = socket_lines.next_line() => {
                match line? {
                    Some(line) => handle_frame(&line),
                    None => {
                        eprintln!("relay closed the connection");
                        break;
                    }
                }
            }
            line = stdin_lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_input(line.trim(), &engine, &mut writer).await? {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_timer.tick(), if pings_enabled => {
                send(&mut writer, &Message::ping(unix_millis())).await?;
            }
        }
    }

    Ok(())
}

/// Prints one frame from the relay.
fn handle_frame(line: &str) {
    let frame = match Message::from_line(line.as_bytes()) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("ignoring undecodable frame: {}", e);
            return;
        }
    };
    match frame {
        Message::Relay { from_client, data } => match hex::decode(&data) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                println!(
                    "{}[client {}]{} {}",
                    style(CYAN),
                    from_client,
                    style(RESET),
                    text
                );
            }
            Err(e) => debug!("relay data from client {} is not hex: {}", from_client, e),
        },
        Message::Pong { timestamp } => {
            let rtt = unix_millis().saturating_sub(timestamp);
            println!("{}pong{} {} ms", style(GREEN), style(RESET), rtt);
        }
        Message::TunnelEstablished { status } => {
            println!("{}tunnel{} {}", style(GREEN), style(RESET), status);
        }
        Message::Welcome { client_id, .. } => {
            debug!("ignoring extra welcome addressed to client {}", client_id);
        }
        other => debug!("ignoring {} frame", other.kind()),
    }
}

/// Handles one stdin line. Returns `false` when the client should exit.
async fn handle_input(
    input: &str,
    engine: &CryptoEngine,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    match input {
        "" => {}
        "/quit" => return Ok(false),
        "/ping" => send(writer, &Message::ping(unix_millis())).await?,
        "/tunnel" => send(writer, &Message::tunnel_establish()).await?,
        text => {
            let ciphertext = engine.encrypt(text.as_bytes());
            send(writer, &Message::data(&ciphertext)).await?;
        }
    }
    Ok(true)
}

async fn send(writer: &mut OwnedWriteHalf, message: &Message) -> Result<()> {
    writer.write_all(&message.to_line()?).await?;
    Ok(())
}
