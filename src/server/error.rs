//! Error types for the server module.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that may occur while starting a [`WsRouteServer`](super::WsRouteServer).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
