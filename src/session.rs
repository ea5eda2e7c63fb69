//! Handshake tokens and the registry of live connections.
//!
//! Opening a connection takes two steps. [`ConnectionManager::negotiate`]
//! picks a serialization format and issues a single-use token;
//! [`ConnectionManager::upgrade`] redeems it when the WebSocket upgrade
//! arrives and registers the resulting [`ConnectionInfo`]. Unredeemed tokens
//! expire after a configurable TTL.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use log::debug;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::serializer::SerializationFormat;

/// Default lifetime of an unredeemed handshake token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// An upgraded connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    id: ConnectionId,
    format: SerializationFormat,
    lifetime: CancellationToken,
}

impl ConnectionInfo {
    /// Describe a connection outside of a [`ConnectionManager`].
    #[must_use]
    pub fn new(id: ConnectionId, format: SerializationFormat, lifetime: CancellationToken) -> Self {
        Self {
            id,
            format,
            lifetime,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Format negotiated during the handshake.
    #[must_use]
    pub fn format(&self) -> SerializationFormat { self.format }

    /// Token cancelled when the connection is torn down.
    #[must_use]
    pub fn lifetime(&self) -> &CancellationToken { &self.lifetime }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.lifetime.is_cancelled() }
}

/// Handshake failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandshakeError {
    /// None of the requested sub-protocols is supported.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    /// The upgrade request carried no token.
    #[error("missing connection token")]
    MissingToken,
    /// The token was never issued or has already been redeemed.
    #[error("unknown connection token")]
    UnknownToken,
    /// The token outlived its TTL.
    #[error("connection token expired")]
    TokenExpired,
}

/// Result of a successful negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiation {
    /// Single-use token to present on upgrade.
    pub token: String,
    /// Format the connection will use.
    pub format: SerializationFormat,
}

impl Negotiation {
    /// Sub-protocol name to echo back to the client.
    #[must_use]
    pub fn protocol(&self) -> &'static str { self.format.protocol_name() }
}

#[derive(Debug)]
struct PendingUpgrade {
    format: SerializationFormat,
    issued: Instant,
}

/// Issues handshake tokens and tracks active connections.
#[derive(Debug)]
pub struct ConnectionManager {
    pending: DashMap<String, PendingUpgrade>,
    active: DashMap<ConnectionId, Arc<ConnectionInfo>>,
    next_id: AtomicU64,
    token_ttl: Duration,
    shutdown: CancellationToken,
}

impl Default for ConnectionManager {
    fn default() -> Self { Self::new(DEFAULT_TOKEN_TTL) }
}

impl ConnectionManager {
    /// Create a manager whose tokens expire after `token_ttl`.
    #[must_use]
    pub fn new(token_ttl: Duration) -> Self { Self::with_shutdown(token_ttl, CancellationToken::new()) }

    /// Create a manager whose connection tokens are children of `shutdown`.
    #[must_use]
    pub fn with_shutdown(token_ttl: Duration, shutdown: CancellationToken) -> Self {
        Self {
            pending: DashMap::new(),
            active: DashMap::new(),
            next_id: AtomicU64::new(1),
            token_ttl,
            shutdown,
        }
    }

    /// Pick the first supported format from a comma-separated protocol list
    /// and issue a token for it.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::UnsupportedProtocol`] when no listed
    /// protocol is supported.
    pub fn negotiate(&self, requested: &str) -> Result<Negotiation, HandshakeError> {
        let format = requested
            .split(',')
            .find_map(SerializationFormat::from_protocol)
            .ok_or_else(|| HandshakeError::UnsupportedProtocol(requested.trim().to_owned()))?;
        let token = Uuid::new_v4().simple().to_string();
        self.pending.insert(
            token.clone(),
            PendingUpgrade {
                format,
                issued: Instant::now(),
            },
        );
        debug!("handshake token issued: protocol={}", format.protocol_name());
        Ok(Negotiation { token, format })
    }

    /// Redeem `token` and register a new active connection.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::UnknownToken`] for tokens that were never
    /// issued or were already redeemed, and [`HandshakeError::TokenExpired`]
    /// for tokens older than the TTL. Either way the token is gone afterwards.
    pub fn upgrade(&self, token: &str) -> Result<Arc<ConnectionInfo>, HandshakeError> {
        let (_, pending) = self.pending.remove(token).ok_or(HandshakeError::UnknownToken)?;
        if pending.issued.elapsed() >= self.token_ttl {
            return Err(HandshakeError::TokenExpired);
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = Arc::new(ConnectionInfo::new(
            id,
            pending.format,
            self.shutdown.child_token(),
        ));
        self.active.insert(id, Arc::clone(&info));
        Ok(info)
    }

    /// Look up an active connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionInfo>> {
        self.active.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a connection and cancel its lifetime token.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionInfo>> {
        let (_, info) = self.active.remove(&id)?;
        info.lifetime.cancel();
        Some(info)
    }

    /// Identifiers of all active connections.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> { self.active.iter().map(|e| *e.key()).collect() }

    #[must_use]
    pub fn active_count(&self) -> usize { self.active.len() }

    /// Number of tokens awaiting redemption.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.pending.len() }

    /// Drop expired tokens, returning how many were removed.
    ///
    /// `DashMap::retain` takes per-shard write locks, so concurrent
    /// negotiations may contend briefly.
    pub fn prune_expired(&self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.issued.elapsed() < self.token_ttl);
        before.saturating_sub(self.pending.len())
    }

    /// Cancel every connection's lifetime token.
    pub fn shutdown(&self) { self.shutdown.cancel(); }
}
