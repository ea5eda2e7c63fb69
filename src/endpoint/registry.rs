//! Route key to endpoint lookup.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    sync::Arc,
};

use super::Endpoint;
use crate::{dispatcher::RouterError, services::Lifetime};

/// What the dispatcher needs to know about a registered endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    route_key: Arc<str>,
    type_id: TypeId,
    type_name: &'static str,
    lifetime: Lifetime,
}

impl EndpointDescriptor {
    /// Describe endpoint type `E` bound to `route_key`.
    #[must_use]
    pub fn of<E: Endpoint>(route_key: impl Into<Arc<str>>, lifetime: Lifetime) -> Self {
        Self {
            route_key: route_key.into(),
            type_id: TypeId::of::<E>(),
            type_name: type_name::<E>(),
            lifetime,
        }
    }

    #[must_use]
    pub fn route_key(&self) -> &Arc<str> { &self.route_key }

    #[must_use]
    pub fn type_id(&self) -> TypeId { self.type_id }

    #[must_use]
    pub fn type_name(&self) -> &'static str { self.type_name }

    #[must_use]
    pub fn lifetime(&self) -> Lifetime { self.lifetime }
}

/// Immutable map from route key to [`EndpointDescriptor`].
#[derive(Clone, Debug, Default)]
pub struct EndpointRegistry {
    routes: HashMap<Arc<str>, EndpointDescriptor>,
}

impl EndpointRegistry {
    /// Add a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateRoute`] if the key is already bound.
    pub fn insert(&mut self, descriptor: EndpointDescriptor) -> Result<(), RouterError> {
        if self.routes.contains_key(descriptor.route_key()) {
            return Err(RouterError::DuplicateRoute(descriptor.route_key().to_string()));
        }
        self.routes
            .insert(Arc::clone(descriptor.route_key()), descriptor);
        Ok(())
    }

    /// Descriptor bound to `route_key`, if any.
    #[must_use]
    pub fn resolve(&self, route_key: &str) -> Option<&EndpointDescriptor> { self.routes.get(route_key) }

    /// Registered route keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> { self.routes.keys() }

    #[must_use]
    pub fn len(&self) -> usize { self.routes.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }
}
