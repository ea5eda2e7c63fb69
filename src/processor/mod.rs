//! Per-connection message processing loops.
//!
//! A processor drives a [`FrameReassembler`] and hands every complete message
//! to a [`Dispatch`] implementation. Whatever the dispatch outcome, the
//! message buffer is truncated (and optionally shrunk) before it returns to
//! the pool.
//!
//! [`SequentialProcessor`] handles messages strictly in arrival order and
//! stops at the first failure. [`ParallelProcessor`] dispatches up to a
//! configured number of messages at once through
//! [`fan_out::for_each_bounded`], giving up ordering across messages.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::{BufferError, MessageBuffer},
    config::ProcessingConfig,
    dispatcher::{Dispatch, DispatchError},
    reassembler::{FrameReassembler, ReceiveError},
    session::ConnectionInfo,
    transport::FrameSource,
};

pub mod fan_out;
mod parallel;
mod sequential;

pub use parallel::ParallelProcessor;
pub use sequential::SequentialProcessor;

/// Reasons a processing loop ended abnormally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessError {
    /// Receiving a message failed.
    #[error("receive failed: {0}")]
    Receive(#[source] ReceiveError),
    /// Dispatching a message failed.
    #[error("dispatch failed: {0}")]
    Dispatch(#[source] DispatchError),
    /// Resetting a message buffer failed.
    #[error("buffer cleanup failed: {0}")]
    Buffer(#[from] BufferError),
    /// A parallel dispatch worker panicked.
    #[error("dispatch worker panicked: {0}")]
    WorkerPanicked(String),
    /// Several parallel workers failed.
    #[error("{} message processing failures", .0.len())]
    Multiple(Vec<ProcessError>),
    /// Processing was cancelled by the caller.
    #[error("processing cancelled")]
    Cancelled,
}

impl From<ReceiveError> for ProcessError {
    fn from(err: ReceiveError) -> Self {
        match err {
            ReceiveError::Cancelled => Self::Cancelled,
            other => Self::Receive(other),
        }
    }
}

impl From<DispatchError> for ProcessError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Cancelled => Self::Cancelled,
            other => Self::Dispatch(other),
        }
    }
}

impl fan_out::WorkerFailure for ProcessError {
    fn is_cancellation(&self) -> bool { matches!(self, Self::Cancelled) }

    fn from_panic(message: String) -> Self { Self::WorkerPanicked(message) }
}

/// Processing loop chosen from a [`ProcessingConfig`].
#[derive(Debug)]
pub enum Processor<S, D> {
    Sequential(SequentialProcessor<S, D>),
    Parallel(ParallelProcessor<S, D>),
}

impl<S, D> Processor<S, D>
where
    S: FrameSource + 'static,
    D: Dispatch,
{
    /// Sequential for a maximum parallelism of one, parallel otherwise.
    pub fn from_config(
        config: &ProcessingConfig,
        reassembler: FrameReassembler<S>,
        dispatcher: Arc<D>,
        connection: Arc<ConnectionInfo>,
    ) -> Self {
        if config.max_parallelism().get() == 1 {
            Self::Sequential(SequentialProcessor::new(
                reassembler,
                dispatcher,
                connection,
                config.shrink_on_return(),
            ))
        } else {
            Self::Parallel(ParallelProcessor::new(
                reassembler,
                dispatcher,
                connection,
                config.max_parallelism(),
                config.shrink_on_return(),
            ))
        }
    }

    /// Run until the peer closes, the connection lifetime ends or a failure
    /// stops the loop.
    ///
    /// # Errors
    ///
    /// See [`SequentialProcessor::run`] and [`ParallelProcessor::run`].
    pub async fn run(self, cancel: &CancellationToken) -> Result<(), ProcessError> {
        match self {
            Self::Sequential(p) => p.run(cancel).await,
            Self::Parallel(p) => p.run(cancel).await,
        }
    }
}

/// Dispatch one message, then reset its buffer regardless of the outcome.
async fn dispatch_and_recycle<D: Dispatch + ?Sized>(
    dispatcher: &D,
    connection: &ConnectionInfo,
    message: &mut MessageBuffer,
    shrink_on_return: bool,
    cancel: &CancellationToken,
) -> Result<(), ProcessError> {
    let outcome = match message.as_slice() {
        Ok(payload) => dispatcher
            .dispatch(connection, payload, cancel)
            .await
            .map_err(ProcessError::from),
        Err(err) => Err(err.into()),
    };
    recycle(message, shrink_on_return)?;
    outcome
}

/// Reset `message` for reuse, shrinking it back to its baseline if asked.
pub(crate) fn recycle(message: &mut MessageBuffer, shrink_on_return: bool) -> Result<(), BufferError> {
    message.set_length(0)?;
    if shrink_on_return {
        message.shrink()?;
    }
    Ok(())
}
