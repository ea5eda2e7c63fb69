//! Command line interface for the `wsroute` binary.

use std::{net::SocketAddr, num::NonZeroUsize};

use clap::Parser;

/// Command line arguments for the `wsroute` binary.
#[derive(Debug, Parser)]
#[command(name = "wsroute", version, about = "WebSocket message router")]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,
    /// Messages dispatched concurrently per connection; 1 keeps arrival order.
    #[arg(short, long, default_value_t = NonZeroUsize::MIN)]
    pub parallelism: NonZeroUsize,
    /// Largest reassembled message in bytes.
    #[arg(long, default_value_t = NonZeroUsize::new(1024 * 1024).unwrap_or(NonZeroUsize::MIN))]
    pub max_message_size: NonZeroUsize,
    /// Bytes read from the transport per receive.
    #[arg(long, default_value_t = NonZeroUsize::new(4 * 1024).unwrap_or(NonZeroUsize::MIN))]
    pub chunk_size: NonZeroUsize,
    /// Message buffers shared across all connections.
    #[arg(long, default_value_t = NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN))]
    pub pool_capacity: NonZeroUsize,
    /// Seconds a negotiated handshake token stays redeemable.
    #[arg(long, default_value_t = 60)]
    pub token_ttl_secs: u64,
    /// Reject upgrades without a negotiated token.
    #[arg(long)]
    pub require_token: bool,
    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}
