//! Builder assembling a [`MessageDispatcher`].

use std::sync::Arc;

use super::{MessageDispatcher, RouterError};
use crate::{
    endpoint::{Endpoint, EndpointDescriptor, EndpointRegistry, HandlerError, InvocationCache},
    interner::{InternMode, RouteKeyInterner},
    services::{Lifetime, Scope, ServiceProvider},
};

/// Payload field read for the route key unless configured otherwise.
pub const DEFAULT_ROUTE_FIELD: &str = "key";

/// Registers endpoints and services, then builds a [`MessageDispatcher`].
///
/// Registration methods return [`Result<Self, RouterError>`] so they can be
/// chained with `?`.
///
/// ```no_run
/// use async_trait::async_trait;
/// use wsroute::{Endpoint, HandlerError, Lifetime, MessageContext, Router};
///
/// struct Ping;
///
/// #[async_trait]
/// impl Endpoint for Ping {
///     type Request = ();
///
///     async fn handle(&self, _: &MessageContext<'_>, _req: ()) -> Result<(), HandlerError> { Ok(()) }
/// }
///
/// # fn main() -> Result<(), wsroute::RouterError> {
/// let dispatcher = Router::builder()
///     .endpoint("ping", Lifetime::Singleton, |_| Ok(Ping))?
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct Router {
    registry: EndpointRegistry,
    services: ServiceProvider,
    invokers: InvocationCache,
    route_field: Arc<str>,
    intern_mode: InternMode,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            registry: EndpointRegistry::default(),
            services: ServiceProvider::default(),
            invokers: InvocationCache::default(),
            route_field: Arc::from(DEFAULT_ROUTE_FIELD),
            intern_mode: InternMode::default(),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.registry.len())
            .field("services", &self.services.len())
            .field("route_field", &self.route_field)
            .field("intern_mode", &self.intern_mode)
            .finish()
    }
}

impl Router {
    /// Start an empty router.
    #[must_use]
    pub fn builder() -> Self { Self::default() }

    /// Bind endpoint type `E` to `route_key`.
    ///
    /// `factory` builds the endpoint from the message scope according to
    /// `lifetime`. Each endpoint type may be bound to one key only.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateRoute`] if `route_key` is taken and
    /// [`RouterError::DuplicateService`] if `E` is already registered.
    pub fn endpoint<E, F>(mut self, route_key: &str, lifetime: Lifetime, factory: F) -> Result<Self, RouterError>
    where
        E: Endpoint,
        F: Fn(&Scope) -> Result<E, HandlerError> + Send + Sync + 'static,
    {
        if self.registry.resolve(route_key).is_some() {
            return Err(RouterError::DuplicateRoute(route_key.to_owned()));
        }
        self.services.register::<E, F>(lifetime, factory)?;
        self.registry
            .insert(EndpointDescriptor::of::<E>(route_key, lifetime))?;
        self.invokers.get_or_insert::<E>();
        Ok(self)
    }

    /// Bind an already constructed singleton endpoint to `route_key`.
    ///
    /// # Errors
    ///
    /// As for [`Router::endpoint`].
    pub fn endpoint_instance<E: Endpoint>(mut self, route_key: &str, endpoint: E) -> Result<Self, RouterError> {
        if self.registry.resolve(route_key).is_some() {
            return Err(RouterError::DuplicateRoute(route_key.to_owned()));
        }
        self.services.register_instance(endpoint)?;
        self.registry
            .insert(EndpointDescriptor::of::<E>(route_key, Lifetime::Singleton))?;
        self.invokers.get_or_insert::<E>();
        Ok(self)
    }

    /// Register a service endpoints can resolve from their scope.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateService`] if `T` is already registered.
    pub fn service<T, F>(mut self, lifetime: Lifetime, factory: F) -> Result<Self, RouterError>
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, HandlerError> + Send + Sync + 'static,
    {
        self.services.register::<T, F>(lifetime, factory)?;
        Ok(self)
    }

    /// Register a shared service value.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateService`] if `T` is already registered.
    pub fn service_instance<T: Send + Sync + 'static>(mut self, value: T) -> Result<Self, RouterError> {
        self.services.register_instance(value)?;
        Ok(self)
    }

    /// Read the route key from `field` instead of [`DEFAULT_ROUTE_FIELD`].
    #[must_use]
    pub fn route_field(mut self, field: &str) -> Self {
        self.route_field = Arc::from(field);
        self
    }

    /// How the interner treats hash hits.
    #[must_use]
    pub fn intern_mode(mut self, mode: InternMode) -> Self {
        self.intern_mode = mode;
        self
    }

    /// Freeze the registrations into a dispatcher.
    #[must_use]
    pub fn build(self) -> MessageDispatcher {
        let interner = RouteKeyInterner::with_mode(self.registry.keys().cloned(), self.intern_mode);
        MessageDispatcher {
            registry: self.registry,
            interner,
            invokers: self.invokers,
            services: Arc::new(self.services),
            route_field: self.route_field,
        }
    }
}
