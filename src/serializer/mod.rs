//! Wire formats negotiated per connection.
//!
//! A [`SerializationFormat`] knows how to pull a single top-level field out of
//! a payload without materialising the rest of it, and how to deserialize a
//! whole payload into an endpoint's request type.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::interner::RouteKeyInterner;

mod json;

/// Errors raised by [`SerializationFormat`] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SerializerError {
    /// The payload is not a well-formed top-level object.
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The payload could not be converted into the requested type.
    #[error("payload deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Serialization format negotiated during the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SerializationFormat {
    /// UTF-8 JSON text or binary frames.
    #[default]
    Json,
}

impl SerializationFormat {
    /// Formats this build can negotiate.
    pub const SUPPORTED: &'static [Self] = &[Self::Json];

    /// Match a sub-protocol name, ignoring ASCII case.
    #[must_use]
    pub fn from_protocol(name: &str) -> Option<Self> {
        Self::SUPPORTED
            .iter()
            .copied()
            .find(|format| format.protocol_name().eq_ignore_ascii_case(name.trim()))
    }

    /// Sub-protocol name advertised for this format.
    #[must_use]
    pub const fn protocol_name(self) -> &'static str {
        match self {
            Self::Json => "json",
        }
    }

    /// Extract the string value of the top-level `field`, interned through
    /// `interner`.
    ///
    /// Returns `Ok(None)` when the field is absent or is not a string. Other
    /// values are skipped without being materialised.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Malformed`] when `payload` is not a single
    /// well-formed object.
    pub fn extract_field(
        self,
        field: &str,
        payload: &[u8],
        interner: &RouteKeyInterner,
    ) -> Result<Option<Arc<str>>, SerializerError> {
        match self {
            Self::Json => json::extract_field(field, payload, interner),
        }
    }

    /// Deserialize the whole payload into `T`.
    ///
    /// A literal `null` payload yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Deserialize`] when the payload does not
    /// describe a `T`.
    pub fn deserialize<T: DeserializeOwned>(
        self,
        payload: &[u8],
    ) -> Result<Option<T>, SerializerError> {
        match self {
            Self::Json => json::deserialize(payload),
        }
    }
}
