//! Interactive admin console, enabled with `--console`.
//!
//! Reads commands from stdin and prints over stdout, next to the tracing
//! output on stderr. `quit` asks the caller to shut the relay down via the
//! provided channel.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::ServerState;
use crate::stats;

/// Runs the console until stdin closes or `quit` is entered.
pub async fn run(state: Arc<ServerState>, quit: mpsc::Sender<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("admin console ready, type 'help' for commands");

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !dispatch(line.trim(), &state, &quit).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("console read error: {}", e);
                break;
            }
        }
    }
}

/// Handles one command line. Returns `false` once the console should stop.
async fn dispatch(command: &str, state: &ServerState, quit: &mpsc::Sender<()>) -> bool {
    match command {
        "" => {}
        "stats" => println!("{}", stats::snapshot(state)),
        "sessions" => {
            let mut sessions = state.registry.snapshot();
            if sessions.is_empty() {
                println!("no sessions");
            }
            sessions.sort_by_key(|s| s.id);
            for s in sessions {
                println!(
                    "{:>6}  {:<21}  {:?}  rx={} tx={} age={}s",
                    s.id,
                    s.addr.to_string(),
                    s.state(),
                    s.bytes_received(),
                    s.bytes_sent(),
                    s.connected_at.elapsed().as_secs(),
                );
            }
        }
        "key" => {
            let ctx = state.crypto.context();
            println!("key {}", ctx.key_hex());
            println!("iv  {}", ctx.iv_hex());
        }
        "help" => print_help(),
        "quit" | "exit" => {
            let _ = quit.send(()).await;
            return false;
        }
        other => println!("unknown command: {other} (try 'help')"),
    }
    true
}

fn print_help() {
    println!("commands:");
    println!("  stats     aggregate counters for the live sessions");
    println!("  sessions  one line per connected client");
    println!("  key       the process key material, hex encoded");
    println!("  help      this text");
    println!("  quit      shut the relay down");
}
