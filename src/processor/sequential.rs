//! Order-preserving processing loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ProcessError, dispatch_and_recycle};
use crate::{
    dispatcher::Dispatch,
    reassembler::FrameReassembler,
    session::ConnectionInfo,
    transport::FrameSource,
};

/// Receives and dispatches one message at a time.
pub struct SequentialProcessor<S, D> {
    reassembler: FrameReassembler<S>,
    dispatcher: Arc<D>,
    connection: Arc<ConnectionInfo>,
    shrink_on_return: bool,
}

impl<S, D> std::fmt::Debug for SequentialProcessor<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialProcessor")
            .field("connection", &self.connection.id())
            .field("shrink_on_return", &self.shrink_on_return)
            .finish_non_exhaustive()
    }
}

impl<S: FrameSource, D: Dispatch> SequentialProcessor<S, D> {
    pub fn new(
        reassembler: FrameReassembler<S>,
        dispatcher: Arc<D>,
        connection: Arc<ConnectionInfo>,
        shrink_on_return: bool,
    ) -> Self {
        Self {
            reassembler,
            dispatcher,
            connection,
            shrink_on_return,
        }
    }

    /// Process messages in arrival order until the sequence ends.
    ///
    /// # Errors
    ///
    /// Returns the first receive or dispatch failure, or
    /// [`ProcessError::Cancelled`] if `cancel` fires.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<(), ProcessError> {
        while let Some(mut message) = self.reassembler.next_message(cancel).await? {
            dispatch_and_recycle(
                &*self.dispatcher,
                &self.connection,
                &mut message,
                self.shrink_on_return,
                cancel,
            )
            .await?;
        }
        Ok(())
    }
}
