//! Errors raised while building routers and dispatching messages.

use std::sync::Arc;

use thiserror::Error;

use crate::{endpoint::HandlerError, serializer::SerializerError, services::ServiceError};

/// Per-message dispatch failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The route key names no registered endpoint.
    #[error("no endpoint registered for route key {0:?}")]
    RouteNotFound(Arc<str>),
    /// The payload has no top-level string field carrying the route key.
    #[error("payload has no string field {field:?}")]
    RouteKeyMissing { field: Arc<str> },
    /// The payload is not a well-formed object.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] SerializerError),
    /// The endpoint instance could not be resolved from the message scope.
    #[error("endpoint for route {route_key:?} unavailable: {source}")]
    EndpointServiceUnavailable {
        route_key: Arc<str>,
        #[source]
        source: ServiceError,
    },
    /// The endpoint type has no cached invoker or resolved to another type.
    #[error("endpoint {type_name} misconfigured: {reason}")]
    EndpointMisconfigured {
        type_name: &'static str,
        reason: &'static str,
    },
    /// The payload could not be turned into the endpoint's request.
    #[error("failed to deserialize {type_name} request")]
    PayloadDeserializationFailed {
        type_name: &'static str,
        #[source]
        source: Option<HandlerError>,
    },
    /// The handler returned an error.
    #[error("handler for route {route_key:?} failed: {source}")]
    HandlerInvocationFailed {
        route_key: Arc<str>,
        #[source]
        source: HandlerError,
    },
    /// Dispatch was cancelled before or during the handler.
    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotFound(_) => "route_not_found",
            Self::RouteKeyMissing { .. } => "route_key_missing",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::EndpointServiceUnavailable { .. } => "endpoint_service_unavailable",
            Self::EndpointMisconfigured { .. } => "endpoint_misconfigured",
            Self::PayloadDeserializationFailed { .. } => "payload_deserialization_failed",
            Self::HandlerInvocationFailed { .. } => "handler_invocation_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Router construction failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouterError {
    /// A route key was registered twice.
    #[error("route key {0:?} was already registered")]
    DuplicateRoute(String),
    /// A service type was registered twice.
    #[error("service {0} was already registered")]
    DuplicateService(&'static str),
}
