//! Statically typed message handlers.
//!
//! An [`Endpoint`] declares the request type it expects through
//! [`FromPayload`] and receives a [`MessageContext`] describing the message
//! being dispatched.

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    dispatcher::DispatchError,
    serializer::SerializationFormat,
    services::Scope,
    session::ConnectionInfo,
};

pub mod invocation;
pub mod registry;

pub use invocation::InvocationCache;
pub use registry::{EndpointDescriptor, EndpointRegistry};

/// Error type returned by endpoint handlers and service factories.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a handler may inspect about the message it is handling.
#[derive(Debug)]
pub struct MessageContext<'a> {
    connection: &'a ConnectionInfo,
    route_key: Arc<str>,
    payload: &'a [u8],
    cancel: &'a CancellationToken,
    scope: &'a Scope,
}

impl<'a> MessageContext<'a> {
    /// Assemble a context for one message.
    #[must_use]
    pub fn new(
        connection: &'a ConnectionInfo,
        route_key: Arc<str>,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
        scope: &'a Scope,
    ) -> Self {
        Self {
            connection,
            route_key,
            payload,
            cancel,
            scope,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &'a ConnectionInfo { self.connection }

    #[must_use]
    pub fn route_key(&self) -> &Arc<str> { &self.route_key }

    /// Raw message bytes. Only valid for the duration of the handler call.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] { self.payload }

    #[must_use]
    pub fn format(&self) -> SerializationFormat { self.connection.format() }

    /// Token fired when dispatch is cancelled.
    #[must_use]
    pub fn cancellation(&self) -> &'a CancellationToken { self.cancel }

    /// Service scope opened for this message.
    #[must_use]
    pub fn scope(&self) -> &'a Scope { self.scope }
}

/// Request types an endpoint can be invoked with.
pub trait FromPayload: Sized + Send + 'static {
    /// Build the request from the raw message.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::PayloadDeserializationFailed`] when the
    /// payload does not describe a request.
    fn from_payload(format: SerializationFormat, payload: &[u8]) -> Result<Self, DispatchError>;
}

impl FromPayload for () {
    fn from_payload(_: SerializationFormat, _: &[u8]) -> Result<Self, DispatchError> { Ok(()) }
}

/// Request deserialized from the whole payload.
///
/// A payload that deserializes to nothing (`null`) is rejected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Consume the wrapper, returning the request.
    pub fn into_inner(self) -> T { self.0 }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T { &self.0 }
}

impl<T: DeserializeOwned + Send + 'static> FromPayload for Json<T> {
    fn from_payload(format: SerializationFormat, payload: &[u8]) -> Result<Self, DispatchError> {
        match format.deserialize::<T>(payload) {
            Ok(Some(value)) => Ok(Json(value)),
            Ok(None) => Err(DispatchError::PayloadDeserializationFailed {
                type_name: std::any::type_name::<T>(),
                source: None,
            }),
            Err(err) => Err(DispatchError::PayloadDeserializationFailed {
                type_name: std::any::type_name::<T>(),
                source: Some(Box::new(err)),
            }),
        }
    }
}

/// A message handler bound to one route key.
///
/// ```no_run
/// use async_trait::async_trait;
/// use wsroute::{Endpoint, HandlerError, Json, MessageContext};
///
/// #[derive(serde::Deserialize)]
/// struct Say {
///     text: String,
/// }
///
/// struct Echo;
///
/// #[async_trait]
/// impl Endpoint for Echo {
///     type Request = Json<Say>;
///
///     async fn handle(&self, ctx: &MessageContext<'_>, req: Json<Say>) -> Result<(), HandlerError> {
///         log::info!("echo: route={} text={}", ctx.route_key(), req.text);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Request extracted from the payload before `handle` runs.
    type Request: FromPayload;

    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Any error is reported to the dispatcher as a handler failure.
    async fn handle(&self, ctx: &MessageContext<'_>, request: Self::Request) -> Result<(), HandlerError>;
}
