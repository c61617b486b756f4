//! Scripted in-memory port for exercising sessions without hardware.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{DEFAULT_TIMEOUT, Port};

/// Port that answers each flushed write with the next scripted reply.
///
/// Reads with no pending input fail with `TimedOut`, like a serial port
/// whose read timeout expired.
#[derive(Debug, Default)]
pub(crate) struct MockPort {
    replies: VecDeque<Vec<u8>>,
    input: VecDeque<u8>,
    pending: Vec<u8>,
    /// Every flushed write, in order.
    pub(crate) sent: Vec<Vec<u8>>,
    /// Every timeout set on the port, in order.
    pub(crate) timeouts: Vec<Duration>,
    timeout: Option<Duration>,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply released after the next flushed write.
    pub(crate) fn reply(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.replies.push_back(raw.into());
        self
    }

    /// Queue a framed ACK reply.
    pub(crate) fn ack(self) -> Self {
        self.reply([0x7E, 0x02, 0x00, 0x00, 0x7E])
    }

    /// Queue a framed rejection carrying `code`.
    pub(crate) fn nak(self, code: u8) -> Self {
        self.reply([0x7E, 0x03, 0x00, code, 0x7E])
    }

    /// Queue silence: the next command gets no reply at all.
    pub(crate) fn silence(self) -> Self {
        self.reply(Vec::new())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock timeout"));
        }
        let n = buf.len().min(self.input.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.input.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.sent.push(std::mem::take(&mut self.pending));
            if let Some(reply) = self.replies.pop_front() {
                self.input.extend(reply);
            }
        }
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeouts.push(timeout);
        self.timeout = Some(timeout);
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.input.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
