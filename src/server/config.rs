//! Server-wide settings.

use std::{
    net::{Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    time::Duration,
};

use super::BackoffConfig;
use crate::{
    config::{ConfigError, ProcessingConfig},
    session::DEFAULT_TOKEN_TTL,
};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_POOL_CAPACITY: NonZeroUsize = NonZeroUsize::new(64).unwrap();

/// Settings for a [`WsRouteServer`](super::WsRouteServer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind: SocketAddr,
    /// Number of message buffers shared by all connections.
    pub pool_capacity: NonZeroUsize,
    /// How long an issued handshake token stays redeemable.
    pub token_ttl: Duration,
    /// Reject upgrades that do not present a negotiated token.
    ///
    /// When `false`, a request without a token negotiates its format from
    /// the `Sec-WebSocket-Protocol` header (JSON if absent) on the spot.
    pub require_token: bool,
    /// Per-connection processing settings.
    pub processing: ProcessingConfig,
    /// Accept-loop retry pacing.
    pub backoff: BackoffConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            token_ttl: DEFAULT_TOKEN_TTL,
            require_token: false,
            processing: ProcessingConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate the processing settings and normalise the back-off.
    ///
    /// # Errors
    ///
    /// Propagates [`ProcessingConfig::validate`] failures.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.processing = self.processing.validate()?;
        self.backoff = self.backoff.normalized();
        Ok(self)
    }
}
