//! In-memory [`FrameSource`] replaying a scripted transport.

use std::{collections::VecDeque, io, time::Duration};

use async_trait::async_trait;
use wsroute::{FrameSource, Received};

/// One scripted transport event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Deliver bytes; `true` marks the final fragment of a message.
    Chunk(Vec<u8>, bool),
    /// Wait before the next step.
    Pause(Duration),
    /// Report a close frame.
    Close,
    /// Fail the read with this error kind.
    Fail(io::ErrorKind),
    /// Never complete the read.
    Stall,
}

/// Transport double replaying a fixed list of [`Step`]s.
///
/// Chunks longer than the caller's buffer are handed out across several
/// reads, only the last of which carries the end-of-message flag. Once the
/// script is exhausted every read reports a close.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    reads: usize,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            reads: 0,
        }
    }

    /// Script each message as one final chunk followed by a close.
    pub fn messages<I, M>(messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: AsRef<[u8]>,
    {
        let mut steps: Vec<Step> = messages
            .into_iter()
            .map(|m| Step::Chunk(m.as_ref().to_vec(), true))
            .collect();
        steps.push(Step::Close);
        Self::new(steps)
    }

    /// Script `message` split into `parts` roughly equal fragments, then
    /// close.
    ///
    /// # Panics
    ///
    /// Panics if `parts` is zero.
    pub fn fragmented(message: &[u8], parts: usize) -> Self {
        assert!(parts > 0, "parts must be non-zero");
        let size = message.len().div_ceil(parts).max(1);
        let chunks: Vec<&[u8]> = message.chunks(size).collect();
        let last = chunks.len().saturating_sub(1);
        let mut steps: Vec<Step> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| Step::Chunk(c.to_vec(), i == last))
            .collect();
        if steps.is_empty() {
            steps.push(Step::Chunk(Vec::new(), true));
        }
        steps.push(Step::Close);
        Self::new(steps)
    }

    /// Number of `receive` calls served so far.
    #[must_use]
    pub fn reads(&self) -> usize { self.reads }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<Received> {
        self.reads += 1;
        loop {
            match self.steps.pop_front() {
                None | Some(Step::Close) => return Ok(Received::close()),
                Some(Step::Pause(delay)) => tokio::time::sleep(delay).await,
                Some(Step::Fail(kind)) => return Err(io::Error::from(kind)),
                Some(Step::Stall) => return futures::future::pending().await,
                Some(Step::Chunk(mut bytes, end)) => {
                    let count = buf.len().min(bytes.len());
                    buf[..count].copy_from_slice(&bytes[..count]);
                    if count < bytes.len() {
                        let rest = bytes.split_off(count);
                        self.steps.push_front(Step::Chunk(rest, end));
                        return Ok(Received::data(count, false));
                    }
                    return Ok(Received::data(count, end));
                }
            }
        }
    }
}
