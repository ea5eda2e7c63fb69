//! Inbound helper that stitches transport reads back into whole messages.
//!
//! [`FrameReassembler`] owns one connection's [`FrameSource`] and yields one
//! complete message per [`next_message`](FrameReassembler::next_message) call.
//! Each message lands in a [`MessageBuffer`] rented from a shared
//! [`BufferPool`]; the buffer is reused across the fragments of that message
//! and handed to the caller once the final fragment arrives. The buffer is
//! only rented once the first fragment has been read, so an idle connection
//! holds none. A partially received message is never yielded: a close, an
//! oversize message or a transport error discards it and returns the buffer
//! to the pool, shrunk to its baseline when the config asks for it.

use std::{io, num::NonZeroUsize};

use async_trait::async_trait;
use futures::{Stream, stream};
use log::debug;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::{BufferError, MessageBuffer},
    config::ProcessingConfig,
    pool::{BoundedPool, PoolError, Pooled},
    processor::{fan_out::PullSource, recycle},
    transport::{FrameKind, FrameSource, Received},
};

/// Pool of message buffers shared across connections.
pub type BufferPool = BoundedPool<MessageBuffer>;

/// Build a [`BufferPool`] of `capacity` buffers, each starting at `baseline`
/// bytes.
#[must_use]
pub fn buffer_pool(capacity: usize, baseline: usize) -> BufferPool {
    BoundedPool::new(capacity, move || MessageBuffer::new(baseline))
}

/// Errors raised while receiving a message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReceiveError {
    /// The accumulated message would exceed the configured maximum.
    #[error("message too large: attempted={attempted}, limit={limit}")]
    MessageTooLarge {
        attempted: usize,
        limit: NonZeroUsize,
    },
    /// The caller's token fired while waiting.
    #[error("receive cancelled")]
    Cancelled,
    /// The transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The message buffer rejected an operation.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
    /// The buffer pool was disposed.
    #[error("buffer pool error: {0}")]
    Pool(PoolError),
}

impl From<PoolError> for ReceiveError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Cancelled => Self::Cancelled,
            other => Self::Pool(other),
        }
    }
}

/// Reassembles fragments from a single [`FrameSource`].
///
/// Only one consumer may pull at a time; the parallel processor serialises
/// access behind a mutex.
pub struct FrameReassembler<S> {
    source: S,
    pool: BufferPool,
    scratch: Box<[u8]>,
    max_message_size: NonZeroUsize,
    shrink_on_return: bool,
    lifetime: CancellationToken,
    finished: bool,
}

impl<S: FrameSource> FrameReassembler<S> {
    /// Create a reassembler reading from `source`.
    ///
    /// `lifetime` is the connection's token: when it fires the message
    /// sequence simply ends.
    pub fn new(
        source: S,
        pool: BufferPool,
        config: &ProcessingConfig,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            source,
            pool,
            scratch: vec![0; config.receive_chunk_size().get()].into_boxed_slice(),
            max_message_size: config.max_message_size(),
            shrink_on_return: config.shrink_on_return(),
            lifetime,
            finished: false,
        }
    }

    /// Whether the message sequence has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool { self.finished }

    /// Receive the next complete message.
    ///
    /// Returns `Ok(None)` once the peer closes or the connection lifetime
    /// token fires, and on every call after that.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::Cancelled`] if `cancel` fires during a wait,
    /// [`ReceiveError::MessageTooLarge`] when a message outgrows the limit,
    /// and transport, buffer or pool errors otherwise. The sequence ends
    /// after any error.
    pub async fn next_message(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Pooled<MessageBuffer>>, ReceiveError> {
        if self.finished {
            return Ok(None);
        }
        let result = self.assemble(cancel).await;
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    async fn assemble(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Pooled<MessageBuffer>>, ReceiveError> {
        // No buffer is held while the peer is silent.
        let Some(first) = self.read(cancel).await? else {
            return Ok(None);
        };
        if first.kind == FrameKind::Close {
            return Ok(None);
        }

        let mut buffer = tokio::select! {
            biased;

            () = self.lifetime.cancelled() => return Ok(None),
            rented = self.pool.rent(cancel) => rented?,
        };
        buffer.set_length(0)?;

        match self.fill(&mut buffer, first, cancel).await {
            Ok(true) => Ok(Some(buffer)),
            Ok(false) => {
                recycle(&mut buffer, self.shrink_on_return)?;
                Ok(None)
            }
            Err(err) => {
                recycle(&mut buffer, self.shrink_on_return)?;
                Err(err)
            }
        }
    }

    /// Append fragments to `buffer` starting with the one already in
    /// `scratch`. Returns `false` if the sequence ended mid-message.
    async fn fill(
        &mut self,
        buffer: &mut MessageBuffer,
        mut received: Received,
        cancel: &CancellationToken,
    ) -> Result<bool, ReceiveError> {
        loop {
            if received.kind == FrameKind::Close {
                if !buffer.is_empty() {
                    debug!("close discarded partial message: buffered={}", buffer.len());
                }
                return Ok(false);
            }

            let count = received.count.min(self.scratch.len());
            let attempted = buffer.len().saturating_add(count);
            if attempted > self.max_message_size.get() {
                return Err(ReceiveError::MessageTooLarge {
                    attempted,
                    limit: self.max_message_size,
                });
            }
            buffer.write(&self.scratch[..count])?;

            if received.end_of_message {
                return Ok(true);
            }
            match self.read(cancel).await? {
                Some(next) => received = next,
                None => return Ok(false),
            }
        }
    }

    /// Read one fragment into `scratch`; `None` once the lifetime fires.
    async fn read(&mut self, cancel: &CancellationToken) -> Result<Option<Received>, ReceiveError> {
        tokio::select! {
            biased;

            () = self.lifetime.cancelled() => Ok(None),
            () = cancel.cancelled() => Err(ReceiveError::Cancelled),
            received = self.source.receive(&mut self.scratch) => Ok(Some(received?)),
        }
    }
}

impl<S: FrameSource + 'static> FrameReassembler<S> {
    /// Adapt the reassembler into a [`Stream`] of messages.
    ///
    /// The stream ends after the sequence finishes or after the first error.
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Pooled<MessageBuffer>, ReceiveError>> + Send {
        stream::unfold((self, cancel), |(mut reassembler, cancel)| async move {
            match reassembler.next_message(&cancel).await {
                Ok(Some(message)) => Some((Ok(message), (reassembler, cancel))),
                Ok(None) => None,
                Err(err) => Some((Err(err), (reassembler, cancel))),
            }
        })
    }
}

#[async_trait]
impl<S: FrameSource + 'static> PullSource for FrameReassembler<S> {
    type Item = Pooled<MessageBuffer>;
    type Error = ReceiveError;

    async fn pull(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::Item>, Self::Error> {
        self.next_message(cancel).await
    }
}
