//! [`FrameSource`] adapter over `tokio-tungstenite` message streams.

use std::io;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use super::{FrameSource, Received};

/// Feeds tungstenite messages to the reassembler in caller-sized chunks.
///
/// Tungstenite delivers whole messages; each is handed out across as many
/// reads as the receive buffer requires, with the final read flagged as the
/// end of the message. Ping, pong and raw frames are skipped, and both a
/// close frame and the end of the stream surface as a close.
pub struct TungsteniteSource<St> {
    stream: St,
    pending: Bytes,
    closed: bool,
}

impl<St> TungsteniteSource<St> {
    /// Wrap the read half of a WebSocket stream.
    pub fn new(stream: St) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
            closed: false,
        }
    }

    /// Recover the wrapped stream.
    pub fn into_inner(self) -> St { self.stream }
}

#[async_trait]
impl<St> FrameSource for TungsteniteSource<St>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin,
{
    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<Received> {
        while self.pending.is_empty() {
            if self.closed {
                return Ok(Received::close());
            }
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.pending = Bytes::copy_from_slice(text.as_bytes());
                    if self.pending.is_empty() {
                        return Ok(Received::data(0, true));
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    self.pending = data;
                    if self.pending.is_empty() {
                        return Ok(Received::data(0, true));
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    self.closed = true;
                }
                Some(Err(err)) => return Err(io::Error::other(err)),
            }
        }

        let count = buf.len().min(self.pending.len());
        buf[..count].copy_from_slice(&self.pending[..count]);
        self.pending.advance(count);
        Ok(Received::data(count, self.pending.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::stream;
    use tokio_tungstenite::tungstenite::{self, Message};

    use super::TungsteniteSource;
    use crate::transport::{FrameKind, FrameSource, Received};

    #[tokio::test]
    async fn splits_messages_into_chunks_and_reports_close() {
        let messages: Vec<Result<Message, tungstenite::Error>> = vec![
            Ok(Message::text("abcde")),
            Ok(Message::Ping(Bytes::new())),
            Ok(Message::binary(vec![1_u8, 2])),
            Ok(Message::Close(None)),
        ];
        let mut source = TungsteniteSource::new(stream::iter(messages));
        let mut buf = [0_u8; 3];

        assert_eq!(source.receive(&mut buf).await.expect("read"), Received::data(3, false));
        assert_eq!(&buf, b"abc");
        assert_eq!(source.receive(&mut buf).await.expect("read"), Received::data(2, true));
        assert_eq!(&buf[..2], b"de");
        assert_eq!(source.receive(&mut buf).await.expect("read"), Received::data(2, true));
        assert_eq!(&buf[..2], &[1, 2]);

        let close = source.receive(&mut buf).await.expect("read");
        assert_eq!(close.kind, FrameKind::Close);
        assert_eq!(source.receive(&mut buf).await.expect("read").kind, FrameKind::Close);
    }
}
