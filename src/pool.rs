//! Capacity-bounded asynchronous object pool.
//!
//! [`BoundedPool`] manufactures at most `capacity` objects, lazily, and hands
//! them out wrapped in a [`Pooled`] guard that returns the object when
//! dropped. Once every object has been built, further renters queue on a fair
//! semaphore until an object comes back. Waiting holds no lock and can be
//! abandoned through a [`CancellationToken`] without disturbing the pool's
//! accounting.

use std::{
    collections::VecDeque,
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use log::debug;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Errors returned by [`BoundedPool`] operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool was disposed.
    #[error("object pool has been disposed")]
    Disposed,
    /// The rent was cancelled while waiting for a returned object.
    #[error("pool rent cancelled")]
    Cancelled,
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct PoolInner<T> {
    capacity: usize,
    factory: Factory<T>,
    /// Objects ever built and not detached. Held while constructing so racing
    /// renters cannot overshoot `capacity`.
    created: Mutex<usize>,
    available: Mutex<VecDeque<T>>,
    /// One permit per queued object.
    ready: Semaphore,
    disposed: AtomicBool,
}

/// Shared handle to a bounded object pool.
pub struct BoundedPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BoundedPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for BoundedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedPool")
            .field("capacity", &self.inner.capacity)
            .field("created", &self.created())
            .field("available", &self.available())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + 'static> BoundedPool<T> {
    /// Create a pool that builds up to `capacity` objects with `factory`.
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        debug_assert!(capacity > 0, "pool capacity must be greater than zero");
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                factory: Box::new(factory),
                created: Mutex::new(0),
                available: Mutex::new(VecDeque::with_capacity(capacity)),
                ready: Semaphore::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Rent an object, waiting for a return when all objects are in use.
    ///
    /// Queued objects are reused first; a new object is built only while
    /// fewer than `capacity` exist.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Disposed`] if the pool is or becomes disposed, and
    /// [`PoolError::Cancelled`] if `cancel` fires while waiting.
    pub async fn rent(&self, cancel: &CancellationToken) -> Result<Pooled<T>, PoolError> {
        self.ensure_live()?;

        if let Ok(permit) = self.inner.ready.try_acquire() {
            permit.forget();
            return self.take_queued();
        }
        if let Some(item) = self.try_create() {
            return Ok(Pooled::new(item, self.clone()));
        }

        debug!(
            "pool exhausted; waiting for return: capacity={}",
            self.inner.capacity
        );
        let permit = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(PoolError::Cancelled),
            permit = self.inner.ready.acquire() => permit.map_err(|_| PoolError::Disposed)?,
        };
        permit.forget();
        self.take_queued()
    }

    /// Hand `item` back for future renters.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Disposed`] if the pool was disposed; the item is
    /// dropped in that case.
    pub fn return_item(&self, item: T) -> Result<(), PoolError> {
        {
            let mut available = lock(&self.inner.available);
            if self.is_disposed() {
                drop(available);
                drop(item);
                return Err(PoolError::Disposed);
            }
            available.push_back(item);
        }
        self.inner.ready.add_permits(1);
        Ok(())
    }

    /// Drop every queued object and reject later operations.
    ///
    /// Rented objects are untouched; they are dropped when their guards are.
    /// Calling this more than once has no further effect.
    pub fn dispose(&self) {
        let drained: Vec<T> = {
            let mut available = lock(&self.inner.available);
            if self.inner.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            available.drain(..).collect()
        };
        self.inner.ready.close();
        debug!("pool disposed: released={}", drained.len());
        drop(drained);
    }

    fn take_queued(&self) -> Result<Pooled<T>, PoolError> {
        let item = lock(&self.inner.available).pop_front();
        item.map(|item| Pooled::new(item, self.clone()))
            .ok_or(PoolError::Disposed)
    }

    fn try_create(&self) -> Option<T> {
        let mut created = lock(&self.inner.created);
        if *created >= self.inner.capacity {
            return None;
        }
        let item = (self.inner.factory)();
        *created += 1;
        Some(item)
    }

    fn forget_one(&self) {
        let mut created = lock(&self.inner.created);
        *created = created.saturating_sub(1);
    }
}

impl<T> BoundedPool<T> {
    /// Maximum number of live objects.
    #[must_use]
    pub fn capacity(&self) -> usize { self.inner.capacity }

    /// Number of objects built so far and still owned by the pool.
    #[must_use]
    pub fn created(&self) -> usize { *lock(&self.inner.created) }

    /// Number of objects queued for reuse.
    #[must_use]
    pub fn available(&self) -> usize { lock(&self.inner.available).len() }

    /// Whether [`dispose`](BoundedPool::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool { self.inner.disposed.load(Ordering::Acquire) }

    fn ensure_live(&self) -> Result<(), PoolError> {
        if self.is_disposed() {
            Err(PoolError::Disposed)
        } else {
            Ok(())
        }
    }
}

/// A rented object that returns to its pool on drop.
pub struct Pooled<T: Send + 'static> {
    item: ManuallyDrop<T>,
    pool: BoundedPool<T>,
}

impl<T: Send + 'static> Pooled<T> {
    fn new(item: T, pool: BoundedPool<T>) -> Self {
        Self {
            item: ManuallyDrop::new(item),
            pool,
        }
    }

    /// Take the object out of the pool permanently, freeing its slot.
    #[must_use]
    pub fn detach(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `item` and `pool` are each moved
        // out exactly once.
        let (item, pool) = unsafe { (ManuallyDrop::take(&mut this.item), ptr::read(&this.pool)) };
        pool.forget_one();
        item
    }
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T { &self.item }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T { &mut self.item }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&*self.item).finish()
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        // SAFETY: `item` is never touched again after this point.
        let item = unsafe { ManuallyDrop::take(&mut self.item) };
        // A disposed pool simply drops the object.
        let _ = self.pool.return_item(item);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use rstest::rstest;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{BoundedPool, PoolError};

    fn counting_pool(capacity: usize) -> (BoundedPool<usize>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let pool = BoundedPool::new(capacity, move || counter.fetch_add(1, Ordering::SeqCst));
        (pool, built)
    }

    #[tokio::test]
    async fn returned_objects_are_reused() {
        let (pool, built) = counting_pool(2);
        let token = CancellationToken::new();

        let first = pool.rent(&token).await.expect("rent");
        let id = *first;
        drop(first);
        let again = pool.rent(&token).await.expect("rent");

        assert_eq!(*again, id);
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn double_demand_builds_exactly_capacity(#[case] capacity: usize) {
        let (pool, built) = counting_pool(capacity);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..capacity * 2 {
            let pool = pool.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let item = pool.rent(&CancellationToken::new()).await.expect("rent");
                tx.send(item).expect("receiver alive");
            });
        }
        drop(tx);

        let mut first_wave = Vec::new();
        for _ in 0..capacity {
            first_wave.push(rx.recv().await.expect("first wave"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(built.load(Ordering::SeqCst), capacity);
        assert!(rx.try_recv().is_err(), "excess renters must wait");

        drop(first_wave);
        let mut second_wave = Vec::new();
        while let Some(item) = rx.recv().await {
            second_wave.push(item);
        }

        assert_eq!(second_wave.len(), capacity);
        assert_eq!(built.load(Ordering::SeqCst), capacity);
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_accounting_intact() {
        let (pool, _) = counting_pool(1);
        let held = pool.rent(&CancellationToken::new()).await.expect("rent");

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(pool.rent(&token).await.unwrap_err(), PoolError::Cancelled);

        drop(held);
        assert_eq!(pool.available(), 1);
        let again = pool.rent(&CancellationToken::new()).await.expect("rent");
        assert_eq!(*again, 0);
    }

    #[tokio::test]
    async fn detach_frees_a_slot() {
        let (pool, built) = counting_pool(1);
        let token = CancellationToken::new();

        let owned = pool.rent(&token).await.expect("rent").detach();
        assert_eq!(owned, 0);
        assert_eq!(pool.created(), 0);

        let fresh = pool.rent(&token).await.expect("rent");
        assert_eq!(*fresh, 1);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispose_rejects_later_operations_and_wakes_waiters() {
        let (pool, _) = counting_pool(1);
        let held = pool.rent(&CancellationToken::new()).await.expect("rent");

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.rent(&CancellationToken::new()).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        pool.dispose();
        pool.dispose();

        assert_eq!(waiter.await.expect("join"), Err(PoolError::Disposed));
        assert_eq!(
            pool.rent(&CancellationToken::new()).await.unwrap_err(),
            PoolError::Disposed
        );
        assert_eq!(pool.return_item(7), Err(PoolError::Disposed));
        drop(held);
        assert_eq!(pool.available(), 0);
    }
}
