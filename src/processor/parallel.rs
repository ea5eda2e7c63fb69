//! Bounded-concurrency processing loop.

use std::{num::NonZeroUsize, sync::Arc};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    ProcessError,
    dispatch_and_recycle,
    fan_out::{FanOutError, for_each_bounded},
};
use crate::{
    buffer::MessageBuffer,
    dispatcher::Dispatch,
    pool::Pooled,
    reassembler::FrameReassembler,
    session::ConnectionInfo,
    transport::FrameSource,
};

/// Dispatches up to `max_parallelism` messages of one connection at once.
///
/// Messages may complete in any order.
pub struct ParallelProcessor<S, D> {
    reassembler: FrameReassembler<S>,
    dispatcher: Arc<D>,
    connection: Arc<ConnectionInfo>,
    max_parallelism: NonZeroUsize,
    shrink_on_return: bool,
}

impl<S, D> std::fmt::Debug for ParallelProcessor<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelProcessor")
            .field("connection", &self.connection.id())
            .field("max_parallelism", &self.max_parallelism)
            .field("shrink_on_return", &self.shrink_on_return)
            .finish_non_exhaustive()
    }
}

impl<S: FrameSource + 'static, D: Dispatch> ParallelProcessor<S, D> {
    pub fn new(
        reassembler: FrameReassembler<S>,
        dispatcher: Arc<D>,
        connection: Arc<ConnectionInfo>,
        max_parallelism: NonZeroUsize,
        shrink_on_return: bool,
    ) -> Self {
        Self {
            reassembler,
            dispatcher,
            connection,
            max_parallelism,
            shrink_on_return,
        }
    }

    /// Process messages concurrently until the sequence ends.
    ///
    /// # Errors
    ///
    /// Returns the single failure when one worker failed,
    /// [`ProcessError::Multiple`] when several did, and
    /// [`ProcessError::Cancelled`] if `cancel` fired without failures.
    pub async fn run(self, cancel: &CancellationToken) -> Result<(), ProcessError> {
        let Self {
            reassembler,
            dispatcher,
            connection,
            max_parallelism,
            shrink_on_return,
        } = self;

        let outcome = for_each_bounded(
            Arc::new(Mutex::new(reassembler)),
            max_parallelism,
            cancel,
            move |mut message: Pooled<MessageBuffer>, token: CancellationToken| {
                let dispatcher = Arc::clone(&dispatcher);
                let connection = Arc::clone(&connection);
                async move {
                    dispatch_and_recycle(
                        &*dispatcher,
                        &connection,
                        &mut message,
                        shrink_on_return,
                        &token,
                    )
                    .await
                }
            },
        )
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(FanOutError::Cancelled) => Err(ProcessError::Cancelled),
            Err(FanOutError::Failed(mut errors)) if errors.len() == 1 => {
                Err(errors.pop().unwrap_or(ProcessError::Cancelled))
            }
            Err(FanOutError::Failed(errors)) => Err(ProcessError::Multiple(errors)),
        }
    }
}
