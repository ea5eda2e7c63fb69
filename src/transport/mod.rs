//! Transport read primitive consumed by the reassembler.
//!
//! WebSocket framing (opcodes, masking, control frames) belongs to the
//! transport. The router only observes how many bytes each read produced,
//! whether they end the current logical message, and whether the peer closed.

use std::io;

use async_trait::async_trait;

#[cfg(feature = "tungstenite")]
mod tungstenite;

#[cfg(feature = "tungstenite")]
pub use tungstenite::TungsteniteSource;

/// Kind of frame a read observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Message payload bytes.
    Data,
    /// The peer closed the connection.
    Close,
}

/// Outcome of a single [`FrameSource::receive`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    /// Bytes written into the caller's buffer.
    pub count: usize,
    /// Whether these bytes complete the current logical message.
    pub end_of_message: bool,
    /// Frame kind observed.
    pub kind: FrameKind,
}

impl Received {
    /// A data read of `count` bytes.
    #[must_use]
    pub const fn data(count: usize, end_of_message: bool) -> Self {
        Self {
            count,
            end_of_message,
            kind: FrameKind::Data,
        }
    }

    /// A close observation.
    #[must_use]
    pub const fn close() -> Self {
        Self {
            count: 0,
            end_of_message: true,
            kind: FrameKind::Close,
        }
    }
}

/// Source of raw message fragments for a single connection.
///
/// Implementations fill `buf` with up to `buf.len()` bytes. Dropping the
/// returned future abandons the read; the reassembler only does so on
/// shutdown.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next fragment into `buf`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the underlying transport.
    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<Received>;
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<Received> {
        (**self).receive(buf).await
    }
}
