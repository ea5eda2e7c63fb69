//! Per-connection processing configuration.
//!
//! [`ProcessingConfig`] is produced once the handshake has completed and stays
//! fixed for the lifetime of the connection.

use std::num::NonZeroUsize;

use thiserror::Error;

const DEFAULT_CHUNK: NonZeroUsize = NonZeroUsize::new(4 * 1024).unwrap();
const DEFAULT_MAX_MESSAGE: NonZeroUsize = NonZeroUsize::new(1024 * 1024).unwrap();
const DEFAULT_BASELINE: usize = 4 * 1024;

/// Rejected configuration values.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A single message could never hold one full receive chunk.
    #[error("max message size {max} is smaller than the receive chunk size {chunk}")]
    MessageSmallerThanChunk { max: usize, chunk: usize },
}

/// Settings governing how a connection's messages are received and processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessingConfig {
    receive_chunk_size: NonZeroUsize,
    max_message_size: NonZeroUsize,
    max_parallelism: NonZeroUsize,
    shrink_on_return: bool,
    buffer_baseline: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            receive_chunk_size: DEFAULT_CHUNK,
            max_message_size: DEFAULT_MAX_MESSAGE,
            max_parallelism: NonZeroUsize::MIN,
            shrink_on_return: true,
            buffer_baseline: DEFAULT_BASELINE,
        }
    }
}

impl ProcessingConfig {
    /// Size of each transport read.
    #[must_use]
    pub fn with_receive_chunk_size(mut self, size: NonZeroUsize) -> Self {
        self.receive_chunk_size = size;
        self
    }

    /// Largest reassembled message accepted.
    #[must_use]
    pub fn with_max_message_size(mut self, size: NonZeroUsize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Upper bound on concurrently dispatched messages. `1` selects
    /// sequential, order-preserving processing.
    #[must_use]
    pub fn with_max_parallelism(mut self, parallelism: NonZeroUsize) -> Self {
        self.max_parallelism = parallelism;
        self
    }

    /// Whether buffers are shrunk back to their baseline after each message.
    #[must_use]
    pub fn with_shrink_on_return(mut self, shrink: bool) -> Self {
        self.shrink_on_return = shrink;
        self
    }

    /// Initial capacity of pooled message buffers.
    #[must_use]
    pub fn with_buffer_baseline(mut self, baseline: usize) -> Self {
        self.buffer_baseline = baseline;
        self
    }

    #[must_use]
    pub fn receive_chunk_size(&self) -> NonZeroUsize { self.receive_chunk_size }

    #[must_use]
    pub fn max_message_size(&self) -> NonZeroUsize { self.max_message_size }

    #[must_use]
    pub fn max_parallelism(&self) -> NonZeroUsize { self.max_parallelism }

    #[must_use]
    pub fn shrink_on_return(&self) -> bool { self.shrink_on_return }

    #[must_use]
    pub fn buffer_baseline(&self) -> usize { self.buffer_baseline }

    /// Check the settings are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MessageSmallerThanChunk`] when the maximum
    /// message size is below the receive chunk size.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_message_size < self.receive_chunk_size {
            return Err(ConfigError::MessageSmallerThanChunk {
                max: self.max_message_size.get(),
                chunk: self.receive_chunk_size.get(),
            });
        }
        Ok(self)
    }
}
