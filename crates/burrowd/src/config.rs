//! CLI argument parsing and server configuration.

use std::net::SocketAddr;

use burrow_common::types::ALGORITHM;
use clap::Parser;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "burrowd")]
#[command(about = "Encrypted tunnel relay server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "BURROWD_LISTEN")]
    pub listen: SocketAddr,

    /// Socket address for the Prometheus metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "BURROWD_METRICS")]
    pub metrics_addr: SocketAddr,

    /// Maximum concurrent client sessions.
    #[arg(long, default_value = "1024", env = "BURROWD_MAX_CONNS")]
    pub max_conns: usize,

    /// Maximum bytes a single frame may occupy before the connection is
    /// closed.
    #[arg(long, default_value = "1048576", env = "BURROWD_MAX_FRAME")]
    pub max_frame: usize,

    /// Frames queued per session before broadcasts skip it.
    #[arg(long, default_value = "256", env = "BURROWD_QUEUE_DEPTH")]
    pub queue_depth: usize,

    /// Seconds between aggregate stats log lines (0 disables them).
    #[arg(long, default_value = "60", env = "BURROWD_STATS_INTERVAL")]
    pub stats_interval: u64,

    /// Seconds to wait for sessions to drain during shutdown.
    #[arg(long, default_value = "30", env = "BURROWD_SHUTDOWN_GRACE")]
    pub shutdown_grace: u64,

    /// Symmetric cipher advertised to clients.
    #[arg(long, default_value = ALGORITHM, env = "BURROWD_ALGORITHM")]
    pub algorithm: String,

    /// Run the interactive admin console on stdin.
    #[arg(long)]
    pub console: bool,
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent client sessions.
    pub max_conns: usize,
    /// Frame size cap in bytes.
    pub max_frame: usize,
    /// Per-session outbound queue depth in frames.
    pub queue_depth: usize,
    /// Seconds between stats log lines, 0 to disable.
    pub stats_interval: u64,
    /// Shutdown drain timeout in seconds.
    pub shutdown_grace: u64,
    /// Cipher name advertised to clients.
    pub algorithm: String,
    /// Whether the admin console is enabled.
    pub console: bool,
}

impl ServerConfig {
    /// Checks every bound and returns a description of the first violation.
    ///
    /// # Errors
    ///
    /// Returns a human readable message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 100_000 {
            return Err("max_conns exceeds reasonable limit (100,000)".to_string());
        }
        if self.max_frame < 256 {
            return Err("max_frame must be at least 256 bytes".to_string());
        }
        if self.max_frame > 64 * 1024 * 1024 {
            return Err("max_frame exceeds reasonable limit (64 MiB)".to_string());
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".to_string());
        }
        if self.queue_depth > 65_536 {
            return Err("queue_depth exceeds reasonable limit (65,536)".to_string());
        }
        if self.stats_interval > 86_400 {
            return Err("stats_interval exceeds reasonable limit (86,400 seconds)".to_string());
        }
        if self.shutdown_grace == 0 {
            return Err("shutdown_grace must be greater than 0".to_string());
        }
        if self.shutdown_grace > 600 {
            return Err("shutdown_grace exceeds reasonable limit (600 seconds)".to_string());
        }
        if self.algorithm != ALGORITHM {
            return Err(format!(
                "unsupported algorithm {:?} ({} is the only supported cipher)",
                self.algorithm, ALGORITHM
            ));
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            max_frame: args.max_frame,
            queue_depth: args.queue_depth,
            stats_interval: args.stats_interval,
            shutdown_grace: args.shutdown_grace,
            algorithm: args.algorithm,
            console: args.console,
        }
    }
}
