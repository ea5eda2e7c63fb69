#![cfg(test)]
//! Test-only helpers shared by unit tests.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    dispatcher::{Dispatch, DispatchError},
    session::ConnectionInfo,
    transport::{FrameSource, Received},
};

/// One scripted transport event.
#[derive(Debug)]
pub(crate) enum Step {
    /// Deliver bytes; `true` marks the end of the logical message.
    Chunk(Vec<u8>, bool),
    /// Report a close frame.
    Close,
    /// Fail the read.
    Fail(io::ErrorKind),
    /// Never complete the read.
    Stall,
}

/// In-memory [`FrameSource`] replaying a fixed script.
///
/// Chunks larger than the caller's buffer are handed out across several
/// reads. An exhausted script reports a close.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSource {
    steps: VecDeque<Step>,
}

impl ScriptedSource {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Script each message as a single final chunk, then close.
    pub(crate) fn messages<'a>(messages: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut steps: Vec<Step> = messages
            .into_iter()
            .map(|m| Step::Chunk(m.to_vec(), true))
            .collect();
        steps.push(Step::Close);
        Self::new(steps)
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<Received> {
        match self.steps.pop_front() {
            None | Some(Step::Close) => Ok(Received::close()),
            Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
            Some(Step::Stall) => futures::future::pending().await,
            Some(Step::Chunk(mut bytes, end)) => {
                let count = buf.len().min(bytes.len());
                buf[..count].copy_from_slice(&bytes[..count]);
                if count < bytes.len() {
                    let rest = bytes.split_off(count);
                    self.steps.push_front(Step::Chunk(rest, end));
                    return Ok(Received::data(count, false));
                }
                Ok(Received::data(count, end))
            }
        }
    }
}

/// [`Dispatch`] double recording payloads and peak concurrency.
///
/// Payloads equal to `fail_on` are rejected with
/// [`DispatchError::RouteNotFound`].
#[derive(Debug, Default)]
pub(crate) struct RecordingDispatch {
    pub(crate) delay: Option<Duration>,
    pub(crate) fail_on: Option<Vec<u8>>,
    payloads: Mutex<Vec<Vec<u8>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingDispatch {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn failing_on(payload: &[u8]) -> Self {
        Self {
            fail_on: Some(payload.to_vec()),
            ..Self::default()
        }
    }

    pub(crate) fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().expect("payload lock").clone()
    }

    pub(crate) fn peak(&self) -> usize { self.peak.load(Ordering::SeqCst) }
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn dispatch(
        &self,
        _connection: &ConnectionInfo,
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
            return Err(DispatchError::RouteNotFound(String::from_utf8_lossy(payload).into()));
        }
        self.payloads
            .lock()
            .expect("payload lock")
            .push(payload.to_vec());
        Ok(())
    }
}
