//! Route messages to endpoints.
//!
//! [`MessageDispatcher`] is the production [`Dispatch`] implementation. For
//! each message it reads the route key with a partial parse, interns it,
//! looks up the endpoint, opens a service [`Scope`](crate::services::Scope)
//! and invokes the endpoint through the [`InvocationCache`]. The scope is
//! released before the outcome is returned, whichever way dispatch ends.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    endpoint::{EndpointRegistry, InvocationCache, MessageContext},
    interner::RouteKeyInterner,
    metrics,
    services::ServiceProvider,
    session::ConnectionInfo,
};

mod builder;
mod error;

pub use builder::{DEFAULT_ROUTE_FIELD, Router};
pub use error::{DispatchError, RouterError};

/// Seam between the processors and whatever handles a complete message.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Handle one complete message.
    ///
    /// `payload` is only borrowed for the duration of the call.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] describing why the message was not
    /// handled.
    async fn dispatch(
        &self,
        connection: &ConnectionInfo,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError>;
}

#[async_trait]
impl<D: Dispatch + ?Sized> Dispatch for Arc<D> {
    async fn dispatch(
        &self,
        connection: &ConnectionInfo,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        (**self).dispatch(connection, payload, cancel).await
    }
}

/// Dispatcher produced by [`Router::build`].
///
/// The registry, interner and invoker cache are fixed at build time and
/// shared between connections without locking.
pub struct MessageDispatcher {
    registry: EndpointRegistry,
    interner: RouteKeyInterner,
    invokers: InvocationCache,
    services: Arc<ServiceProvider>,
    route_field: Arc<str>,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("routes", &self.registry.len())
            .field("route_field", &self.route_field)
            .field("intern_mode", &self.interner.mode())
            .finish_non_exhaustive()
    }
}

impl MessageDispatcher {
    #[must_use]
    pub fn registry(&self) -> &EndpointRegistry { &self.registry }

    #[must_use]
    pub fn interner(&self) -> &RouteKeyInterner { &self.interner }

    /// Name of the payload field carrying the route key.
    #[must_use]
    pub fn route_field(&self) -> &str { &self.route_field }

    async fn route(
        &self,
        connection: &ConnectionInfo,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Arc<str>, DispatchError> {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let route_key = connection
            .format()
            .extract_field(&self.route_field, payload, &self.interner)
            .map_err(DispatchError::MalformedPayload)?
            .ok_or_else(|| DispatchError::RouteKeyMissing {
                field: Arc::clone(&self.route_field),
            })?;
        let descriptor = self
            .registry
            .resolve(&route_key)
            .ok_or_else(|| DispatchError::RouteNotFound(Arc::clone(&route_key)))?;

        let scope = self.services.create_scope();
        let instance = scope
            .resolve_erased(descriptor.type_id(), descriptor.type_name())
            .map_err(|source| DispatchError::EndpointServiceUnavailable {
                route_key: Arc::clone(&route_key),
                source,
            })?;
        let ctx = MessageContext::new(connection, Arc::clone(&route_key), payload, cancel, &scope);

        let outcome = tokio::select! {
            biased;

            () = cancel.cancelled() => Err(DispatchError::Cancelled),
            outcome = self.invokers.invoke(
                descriptor.type_id(),
                descriptor.type_name(),
                instance,
                &ctx,
            ) => outcome,
        };
        drop(ctx);
        drop(scope);
        outcome.map(|()| route_key)
    }
}

#[async_trait]
impl Dispatch for MessageDispatcher {
    async fn dispatch(
        &self,
        connection: &ConnectionInfo,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        match self.route(connection, payload, cancel).await {
            Ok(route_key) => {
                metrics::inc_dispatched(&route_key);
                Ok(())
            }
            Err(DispatchError::Cancelled) => {
                debug!("dispatch cancelled: connection={}", connection.id());
                Err(DispatchError::Cancelled)
            }
            Err(err) => {
                warn!(
                    "dispatch failed: connection={}, kind={}, error={err}",
                    connection.id(),
                    err.kind()
                );
                metrics::inc_dispatch_errors(err.kind());
                Err(err)
            }
        }
    }
}
