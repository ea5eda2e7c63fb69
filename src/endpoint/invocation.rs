//! Cached, type-erased call thunks for endpoints.
//!
//! Dispatch only knows an endpoint by its [`TypeId`] and a resolved
//! `Arc<dyn Any>` instance. The cache keeps one typed invoker per endpoint
//! type that downcasts the instance, extracts the request and awaits the
//! handler.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use async_trait::async_trait;

use super::{Endpoint, FromPayload, MessageContext};
use crate::dispatcher::DispatchError;

#[async_trait]
trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        instance: Arc<dyn Any + Send + Sync>,
        ctx: &MessageContext<'_>,
    ) -> Result<(), DispatchError>;
}

struct TypedInvoker<E>(PhantomData<fn() -> E>);

#[async_trait]
impl<E: Endpoint> Invoker for TypedInvoker<E> {
    async fn invoke(
        &self,
        instance: Arc<dyn Any + Send + Sync>,
        ctx: &MessageContext<'_>,
    ) -> Result<(), DispatchError> {
        let endpoint = instance
            .downcast::<E>()
            .map_err(|_| DispatchError::EndpointMisconfigured {
                type_name: type_name::<E>(),
                reason: "resolved instance has a different concrete type",
            })?;
        let request = E::Request::from_payload(ctx.format(), ctx.payload())?;
        endpoint
            .handle(ctx, request)
            .await
            .map_err(|source| DispatchError::HandlerInvocationFailed {
                route_key: Arc::clone(ctx.route_key()),
                source,
            })
    }
}

/// Invokers keyed by endpoint type.
///
/// Filled while the router is built and read-only afterwards.
#[derive(Default)]
pub struct InvocationCache {
    invokers: HashMap<TypeId, Arc<dyn Invoker>>,
}

impl fmt::Debug for InvocationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationCache")
            .field("invokers", &self.invokers.len())
            .finish()
    }
}

impl InvocationCache {
    /// Build and cache the invoker for `E` unless it already exists.
    pub fn get_or_insert<E: Endpoint>(&mut self) {
        self.invokers
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Arc::new(TypedInvoker::<E>(PhantomData)));
    }

    /// Whether an invoker exists for `type_id`.
    #[must_use]
    pub fn contains(&self, type_id: TypeId) -> bool { self.invokers.contains_key(&type_id) }

    #[must_use]
    pub fn len(&self) -> usize { self.invokers.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.invokers.is_empty() }

    /// Invoke the endpoint type `type_id` on `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EndpointMisconfigured`] when no invoker is
    /// cached for `type_id` or `instance` is not of that type, and otherwise
    /// whatever request extraction or the handler report.
    pub async fn invoke(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        instance: Arc<dyn Any + Send + Sync>,
        ctx: &MessageContext<'_>,
    ) -> Result<(), DispatchError> {
        let invoker = self
            .invokers
            .get(&type_id)
            .ok_or(DispatchError::EndpointMisconfigured {
                type_name,
                reason: "no invoker cached for endpoint type",
            })?;
        invoker.invoke(instance, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        any::{Any, TypeId, type_name},
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use async_trait::async_trait;
    use rstest::{fixture, rstest};
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    use super::InvocationCache;
    use crate::{
        dispatcher::DispatchError,
        endpoint::{Endpoint, HandlerError, Json, MessageContext},
        serializer::SerializationFormat,
        services::ServiceProvider,
        session::{ConnectionId, ConnectionInfo},
    };

    #[derive(Deserialize)]
    struct Add {
        n: usize,
    }

    #[derive(Default)]
    struct Total(AtomicUsize);

    #[async_trait]
    impl Endpoint for Total {
        type Request = Json<Add>;

        async fn handle(&self, _: &MessageContext<'_>, req: Json<Add>) -> Result<(), HandlerError> {
            if req.n == 0 {
                return Err("zero is not a number worth adding".into());
            }
            self.0.fetch_add(req.n, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        connection: ConnectionInfo,
        cancel: CancellationToken,
        provider: Arc<ServiceProvider>,
    }

    #[fixture]
    fn harness() -> Harness {
        Harness {
            connection: ConnectionInfo::new(
                ConnectionId::new(1),
                SerializationFormat::Json,
                CancellationToken::new(),
            ),
            cancel: CancellationToken::new(),
            provider: Arc::new(ServiceProvider::default()),
        }
    }

    async fn invoke(
        cache: &InvocationCache,
        harness: &Harness,
        instance: Arc<dyn Any + Send + Sync>,
        payload: &[u8],
    ) -> Result<(), DispatchError> {
        let scope = harness.provider.create_scope();
        let ctx = MessageContext::new(
            &harness.connection,
            Arc::from("add"),
            payload,
            &harness.cancel,
            &scope,
        );
        cache
            .invoke(TypeId::of::<Total>(), type_name::<Total>(), instance, &ctx)
            .await
    }

    #[rstest]
    #[tokio::test]
    async fn invoker_is_built_once_and_reused(harness: Harness) {
        let mut cache = InvocationCache::default();
        cache.get_or_insert::<Total>();
        cache.get_or_insert::<Total>();
        assert_eq!(cache.len(), 1);

        let total = Arc::new(Total::default());
        for payload in [br#"{"n":2}"#, br#"{"n":5}"#] {
            invoke(&cache, &harness, total.clone(), payload)
                .await
                .expect("invoke");
        }
        assert_eq!(total.0.load(Ordering::SeqCst), 7);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_invoker_is_misconfigured(harness: Harness) {
        let cache = InvocationCache::default();
        let err = invoke(&cache, &harness, Arc::new(Total::default()), br#"{"n":1}"#)
            .await
            .expect_err("not cached");
        assert!(matches!(err, DispatchError::EndpointMisconfigured { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn wrong_instance_type_is_misconfigured(harness: Harness) {
        let mut cache = InvocationCache::default();
        cache.get_or_insert::<Total>();
        let err = invoke(&cache, &harness, Arc::new(17_u32), br#"{"n":1}"#)
            .await
            .expect_err("wrong type");
        assert!(matches!(err, DispatchError::EndpointMisconfigured { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn payload_and_handler_failures_are_distinguished(harness: Harness) {
        let mut cache = InvocationCache::default();
        cache.get_or_insert::<Total>();
        let total = Arc::new(Total::default());

        let err = invoke(&cache, &harness, total.clone(), b"null")
            .await
            .expect_err("null request");
        assert!(matches!(err, DispatchError::PayloadDeserializationFailed { .. }));

        let err = invoke(&cache, &harness, total, br#"{"n":0}"#)
            .await
            .expect_err("handler failed");
        assert!(
            matches!(err, DispatchError::HandlerInvocationFailed { ref route_key, .. } if &**route_key == "add")
        );
    }
}
