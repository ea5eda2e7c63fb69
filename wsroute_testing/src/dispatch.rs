//! [`Dispatch`] double recording what it is handed.

use std::{
    sync::{
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wsroute::{ConnectionId, ConnectionInfo, Dispatch, DispatchError};

/// Records every dispatched payload together with the peak number of
/// dispatches in flight at once.
///
/// An optional delay keeps each dispatch busy so concurrency limits become
/// observable. A payload equal to the configured failure trigger is rejected
/// with [`DispatchError::RouteNotFound`].
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    delay: Option<Duration>,
    fail_on: Option<Vec<u8>>,
    seen: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingDispatcher {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Hold each dispatch for `delay` before completing it.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail dispatches whose payload equals `payload`.
    #[must_use]
    pub fn failing_on(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.fail_on = Some(payload.into());
        self
    }

    /// Payloads dispatched successfully, in completion order.
    #[must_use]
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    /// Connections that successfully dispatched, one entry per message.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionId> { self.lock().iter().map(|(c, _)| *c).collect() }

    /// Highest number of dispatches observed in flight at once.
    #[must_use]
    pub fn peak(&self) -> usize { self.peak.load(Ordering::SeqCst) }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ConnectionId, Vec<u8>)>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Dispatch for RecordingDispatcher {
    async fn dispatch(
        &self,
        connection: &ConnectionInfo,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        if self.fail_on.as_deref() == Some(payload) {
            return Err(DispatchError::RouteNotFound(
                String::from_utf8_lossy(payload).into(),
            ));
        }
        self.lock().push((connection.id(), payload.to_vec()));
        Ok(())
    }
}
