//! Type-keyed service registrations and per-message scopes.
//!
//! A [`ServiceProvider`] maps concrete types to factories and a [`Lifetime`].
//! Each dispatched message opens its own [`Scope`]: scoped services are built
//! at most once per scope, singletons at most once per provider, and
//! transient services on every resolution. Dropping the scope releases every
//! scoped instance it built.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use dashmap::DashMap;
use log::debug;
use thiserror::Error;

use crate::{dispatcher::RouterError, endpoint::HandlerError};

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Scope) -> Result<Instance, HandlerError> + Send + Sync>;

/// How long a resolved instance lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// One instance for the whole provider.
    Singleton,
    /// One instance per message scope.
    #[default]
    Scoped,
    /// A new instance on every resolution.
    Transient,
}

/// Errors raised while resolving services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// No factory is registered for this type.
    #[error("no service registered for {type_name}")]
    NotRegistered { type_name: &'static str },
    /// The factory failed.
    #[error("failed to construct {type_name}: {source}")]
    Construction {
        type_name: &'static str,
        #[source]
        source: HandlerError,
    },
}

struct Registration {
    lifetime: Lifetime,
    type_name: &'static str,
    factory: Factory,
}

/// Registry of service factories.
#[derive(Default)]
pub struct ServiceProvider {
    registrations: HashMap<TypeId, Registration>,
    singletons: DashMap<TypeId, Instance>,
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("registrations", &self.registrations.len())
            .field("singletons", &self.singletons.len())
            .finish()
    }
}

impl ServiceProvider {
    /// Register `factory` as the source of `T` values.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateService`] if `T` is already registered.
    pub fn register<T, F>(&mut self, lifetime: Lifetime, factory: F) -> Result<(), RouterError>
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, HandlerError> + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |scope: &Scope| factory(scope).map(|value| Arc::new(value) as Instance));
        self.insert::<T>(lifetime, factory)
    }

    /// Register an already constructed singleton.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateService`] if `T` is already registered.
    pub fn register_instance<T>(&mut self, value: T) -> Result<(), RouterError>
    where
        T: Send + Sync + 'static,
    {
        let instance: Instance = Arc::new(value);
        self.insert::<T>(Lifetime::Singleton, Arc::new(move |_| Ok(Arc::clone(&instance))))
    }

    fn insert<T: 'static>(&mut self, lifetime: Lifetime, factory: Factory) -> Result<(), RouterError> {
        let type_name = type_name::<T>();
        if self.registrations.contains_key(&TypeId::of::<T>()) {
            return Err(RouterError::DuplicateService(type_name));
        }
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                lifetime,
                type_name,
                factory,
            },
        );
        Ok(())
    }

    /// Whether a factory exists for `type_id`.
    #[must_use]
    pub fn contains(&self, type_id: TypeId) -> bool { self.registrations.contains_key(&type_id) }

    /// Lifetime registered for `type_id`.
    #[must_use]
    pub fn lifetime(&self, type_id: TypeId) -> Option<Lifetime> {
        self.registrations.get(&type_id).map(|r| r.lifetime)
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize { self.registrations.len() }

    /// Whether no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.registrations.is_empty() }

    /// Open a fresh resolution scope.
    #[must_use]
    pub fn create_scope(self: &Arc<Self>) -> Scope {
        Scope {
            provider: Arc::clone(self),
            instances: Mutex::new(HashMap::new()),
        }
    }
}

/// Isolated resolution scope for a single message.
pub struct Scope {
    provider: Arc<ServiceProvider>,
    instances: Mutex<HashMap<TypeId, Instance>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("scoped_instances", &lock(&self.instances).len())
            .finish_non_exhaustive()
    }
}

impl Scope {
    /// Resolve a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotRegistered`] if `T` has no factory and
    /// [`ServiceError::Construction`] if its factory fails.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ServiceError> {
        let instance = self.resolve_erased(TypeId::of::<T>(), type_name::<T>())?;
        instance
            .downcast::<T>()
            .map_err(|_| ServiceError::NotRegistered {
                type_name: type_name::<T>(),
            })
    }

    /// Resolve the instance registered under `type_id` without knowing its
    /// concrete type.
    ///
    /// `type_name` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// As for [`Scope::resolve`].
    pub fn resolve_erased(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<Instance, ServiceError> {
        let registration = self
            .provider
            .registrations
            .get(&type_id)
            .ok_or(ServiceError::NotRegistered { type_name })?;

        match registration.lifetime {
            Lifetime::Transient => self.build(registration),
            Lifetime::Scoped => {
                if let Some(existing) = lock(&self.instances).get(&type_id) {
                    return Ok(Arc::clone(existing));
                }
                // Built outside the lock so factories can resolve dependencies.
                let built = self.build(registration)?;
                Ok(Arc::clone(lock(&self.instances).entry(type_id).or_insert(built)))
            }
            Lifetime::Singleton => {
                if let Some(existing) = self.provider.singletons.get(&type_id) {
                    return Ok(Arc::clone(existing.value()));
                }
                let built = self.build(registration)?;
                Ok(Arc::clone(
                    self.provider.singletons.entry(type_id).or_insert(built).value(),
                ))
            }
        }
    }

    fn build(&self, registration: &Registration) -> Result<Instance, ServiceError> {
        (registration.factory)(self).map_err(|source| ServiceError::Construction {
            type_name: registration.type_name,
            source,
        })
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let released = lock(&self.instances).len();
        debug!("scope released: scoped_instances={released}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
