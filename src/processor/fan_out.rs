//! Bounded fan-out over a shared pull source.
//!
//! [`for_each_bounded`] drives up to `max_workers` tasks that take turns
//! pulling from one [`PullSource`] behind an async mutex. Workers are launched
//! lazily: worker `k + 1` only starts once worker `k` has obtained its first
//! item, so a quiet connection never holds more than one idle task.
//!
//! The first failure cancels an internal child token, which stops both the
//! source and every sibling. Failures caused purely by that cancellation are
//! not reported; everything else is returned once all workers have unwound.

use std::{
    future::Future,
    mem,
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use log::debug;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::panic::format_panic;

/// Source of work items pulled one at a time.
#[async_trait]
pub trait PullSource: Send + 'static {
    type Item: Send + 'static;
    type Error: Send + 'static;

    /// Pull the next item; `Ok(None)` ends the sequence.
    ///
    /// # Errors
    ///
    /// Implementations report source failures, including cancellation
    /// through `cancel`.
    async fn pull(&mut self, cancel: &CancellationToken) -> Result<Option<Self::Item>, Self::Error>;
}

/// Failure type a fan-out worker can report.
pub trait WorkerFailure: Send + 'static {
    /// Whether this failure only reflects cancellation.
    fn is_cancellation(&self) -> bool;

    /// Build a failure from a worker panic message.
    fn from_panic(message: String) -> Self;
}

/// Why [`for_each_bounded`] did not complete normally.
#[derive(Debug)]
pub enum FanOutError<E> {
    /// Recorded worker failures, in the order they were observed.
    Failed(Vec<E>),
    /// The external token fired and no worker failed.
    Cancelled,
}

struct State<P, F, E> {
    source: Arc<AsyncMutex<P>>,
    work: F,
    internal: CancellationToken,
    errors: Mutex<Vec<E>>,
}

impl<P, F, E: WorkerFailure> State<P, F, E> {
    fn record(&self, err: E) {
        if err.is_cancellation() && self.internal.is_cancelled() {
            return;
        }
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
        self.internal.cancel();
    }
}

/// Run `work` on every item from `source`, at most `max_workers` at a time.
///
/// `work` receives each item together with the internal cancellation token
/// and should stop promptly once it fires.
///
/// # Errors
///
/// Returns [`FanOutError::Failed`] with every non-cancellation failure from
/// the source, the work function or a panicking worker, and
/// [`FanOutError::Cancelled`] if `cancel` fired without any failure.
pub async fn for_each_bounded<P, F, Fut, E>(
    source: Arc<AsyncMutex<P>>,
    max_workers: NonZeroUsize,
    cancel: &CancellationToken,
    work: F,
) -> Result<(), FanOutError<E>>
where
    P: PullSource,
    F: Fn(P::Item, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: WorkerFailure + From<P::Error>,
{
    let state = Arc::new(State {
        source,
        work,
        internal: cancel.child_token(),
        errors: Mutex::new(Vec::new()),
    });
    let max_workers = max_workers.get();
    let (launch_tx, mut launch_rx) = mpsc::unbounded_channel::<()>();
    let mut workers = JoinSet::new();

    // A worker only carries a launch signal while another may still follow.
    let signal = |launched: usize| (launched < max_workers).then(|| launch_tx.clone());
    workers.spawn(worker(Arc::clone(&state), signal(1)));
    let mut launched = 1;

    loop {
        tokio::select! {
            biased;

            Some(()) = launch_rx.recv(), if launched < max_workers => {
                launched += 1;
                debug!("fan-out worker launched: workers={launched}");
                workers.spawn(worker(Arc::clone(&state), signal(launched)));
            }
            joined = workers.join_next() => match joined {
                None => break,
                Some(Ok(())) => {}
                Some(Err(err)) if err.is_panic() => {
                    state.record(E::from_panic(format_panic(err.into_panic()).to_string()));
                }
                Some(Err(err)) => debug!("fan-out worker stopped: error={err}"),
            },
        }
    }

    let errors = mem::take(&mut *state.errors.lock().unwrap_or_else(PoisonError::into_inner));
    if !errors.is_empty() {
        return Err(FanOutError::Failed(errors));
    }
    if cancel.is_cancelled() {
        return Err(FanOutError::Cancelled);
    }
    Ok(())
}

async fn worker<P, F, Fut, E>(
    state: Arc<State<P, F, E>>,
    mut launch: Option<mpsc::UnboundedSender<()>>,
) where
    P: PullSource,
    F: Fn(P::Item, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: WorkerFailure + From<P::Error>,
{
    loop {
        let pulled = {
            let mut source = tokio::select! {
                biased;

                () = state.internal.cancelled() => return,
                guard = state.source.lock() => guard,
            };
            source.pull(&state.internal).await
        };
        let item = match pulled {
            Ok(Some(item)) => item,
            Ok(None) => return,
            Err(err) => {
                state.record(E::from(err));
                return;
            }
        };

        if let Some(signal) = launch.take() {
            // The coordinator outlives every worker.
            let _ = signal.send(());
        }

        if let Err(err) = (state.work)(item, state.internal.clone()).await {
            state.record(err);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        num::NonZeroUsize,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use rstest::rstest;
    use tokio::sync::{Barrier, Mutex};
    use tokio_util::sync::CancellationToken;

    use super::{FanOutError, PullSource, WorkerFailure, for_each_bounded};

    #[derive(Debug, PartialEq, Eq)]
    enum Failure {
        Item(u32),
        Source,
        Cancelled,
        Panicked(String),
    }

    impl WorkerFailure for Failure {
        fn is_cancellation(&self) -> bool { matches!(self, Self::Cancelled) }

        fn from_panic(message: String) -> Self { Self::Panicked(message) }
    }

    impl From<SourceFailed> for Failure {
        fn from(_: SourceFailed) -> Self { Self::Source }
    }

    #[derive(Debug)]
    struct SourceFailed;

    /// Yields queued items, then either ends, fails or stalls.
    struct Items {
        items: VecDeque<u32>,
        tail: Tail,
    }

    #[derive(Clone, Copy)]
    enum Tail {
        End,
        Fail,
        Stall,
    }

    impl Items {
        fn new(items: impl IntoIterator<Item = u32>, tail: Tail) -> Arc<Mutex<Self>> {
            Arc::new(Mutex::new(Self {
                items: items.into_iter().collect(),
                tail,
            }))
        }
    }

    #[async_trait]
    impl PullSource for Items {
        type Item = u32;
        type Error = SourceFailed;

        async fn pull(&mut self, cancel: &CancellationToken) -> Result<Option<u32>, SourceFailed> {
            if let Some(item) = self.items.pop_front() {
                return Ok(Some(item));
            }
            match self.tail {
                Tail::End => Ok(None),
                Tail::Fail => Err(SourceFailed),
                Tail::Stall => {
                    cancel.cancelled().await;
                    Ok(None)
                }
            }
        }
    }

    fn workers(n: usize) -> NonZeroUsize { NonZeroUsize::new(n).expect("non-zero") }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn processes_every_item_within_bound(#[case] max: usize) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let (in_flight_w, peak_w, total_w) = (in_flight.clone(), peak.clone(), total.clone());

        for_each_bounded(
            Items::new(1..=20, Tail::End),
            workers(max),
            &CancellationToken::new(),
            move |item, _| {
                let (in_flight, peak, total) = (in_flight_w.clone(), peak_w.clone(), total_w.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    total.fetch_add(item as usize, Ordering::SeqCst);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), Failure>(())
                }
            },
        )
        .await
        .expect("completes");

        assert_eq!(total.load(Ordering::SeqCst), 210);
        assert!(peak.load(Ordering::SeqCst) <= max);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn first_failure_cancels_siblings() {
        let err = for_each_bounded(
            Items::new(0..100, Tail::Stall),
            workers(4),
            &CancellationToken::new(),
            |item, token: CancellationToken| async move {
                if item == 3 {
                    return Err(Failure::Item(3));
                }
                tokio::select! {
                    () = token.cancelled() => Err(Failure::Cancelled),
                    () = tokio::time::sleep(Duration::from_millis(5)) => Ok(()),
                }
            },
        )
        .await
        .expect_err("fails");

        assert!(matches!(err, FanOutError::Failed(ref errors) if errors == &[Failure::Item(3)]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_failures_are_aggregated() {
        let barrier = Arc::new(Barrier::new(2));
        let err = for_each_bounded(
            Items::new([1, 2], Tail::End),
            workers(2),
            &CancellationToken::new(),
            move |item, _| {
                let barrier = Arc::clone(&barrier);
                async move {
                    barrier.wait().await;
                    Err::<(), _>(Failure::Item(item))
                }
            },
        )
        .await
        .expect_err("fails");

        let FanOutError::Failed(mut errors) = err else {
            panic!("expected failures, got {err:?}");
        };
        errors.sort_by_key(|e| match e {
            Failure::Item(n) => *n,
            _ => u32::MAX,
        });
        assert_eq!(errors, vec![Failure::Item(1), Failure::Item(2)]);
    }

    #[tokio::test]
    async fn worker_panic_is_reported() {
        let err = for_each_bounded(
            Items::new([1], Tail::End),
            workers(2),
            &CancellationToken::new(),
            |item, _| async move {
                if item == 1 {
                    panic!("handler exploded");
                }
                Ok::<(), Failure>(())
            },
        )
        .await
        .expect_err("panics");

        assert!(matches!(
            err,
            FanOutError::Failed(ref errors) if errors == &[Failure::Panicked("handler exploded".into())]
        ));
    }

    #[tokio::test]
    async fn source_failure_is_reported() {
        let err = for_each_bounded(
            Items::new([], Tail::Fail),
            workers(2),
            &CancellationToken::new(),
            |_, _| async { Ok::<(), Failure>(()) },
        )
        .await
        .expect_err("source fails");

        assert!(matches!(err, FanOutError::Failed(ref errors) if errors == &[Failure::Source]));
    }

    #[tokio::test]
    async fn external_cancellation_stops_idle_workers() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let err = for_each_bounded(
            Items::new([1, 2], Tail::Stall),
            workers(3),
            &cancel,
            |_, _| async { Ok::<(), Failure>(()) },
        )
        .await
        .expect_err("cancelled");

        assert!(matches!(err, FanOutError::Cancelled));
    }
}
