use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one stream registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub(crate) fn next() -> Self {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes flow from the stream to the test
    Input,
    /// Bytes flow from the test into the stream
    Output,
}

/// Transfer state a driver shares with handler invocations
#[derive(Debug)]
pub(crate) struct StreamBuffers {
    pub(crate) inbound: VecDeque<u8>,
    pub(crate) outbound: Vec<u8>,
    pub(crate) capacity: usize,
    pub(crate) error: Option<io::Error>,
    pub(crate) bytes_read: usize,
    pub(crate) bytes_written: usize,
}

impl StreamBuffers {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            capacity: capacity.max(1),
            error: None,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Reset per-delivery counters
    pub(crate) fn begin_delivery(&mut self) {
        self.bytes_read = 0;
        self.bytes_written = 0;
    }
}

/// A handler's view of the stream an event belongs to.
///
/// Reads and writes never block: `read` drains bytes the driver already
/// received, `write` queues bytes up to the free transfer-buffer space and the
/// driver flushes them after the handler returns.
pub struct StreamContext<'a> {
    id: StreamId,
    direction: Direction,
    buffers: &'a mut StreamBuffers,
}

impl<'a> StreamContext<'a> {
    pub(crate) fn new(id: StreamId, direction: Direction, buffers: &'a mut StreamBuffers) -> Self {
        Self {
            id,
            direction,
            buffers,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bytes_available(&self) -> usize {
        self.buffers.inbound.len()
    }

    /// Copy up to `buf.len()` received bytes into `buf`, returning the count
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.buffers.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.buffers.inbound.drain(..n)) {
            *slot = byte;
        }
        self.buffers.bytes_read += n;
        n
    }

    /// Drain every received byte
    pub fn read_to_vec(&mut self) -> Vec<u8> {
        let bytes: Vec<u8> = self.buffers.inbound.drain(..).collect();
        self.buffers.bytes_read += bytes.len();
        bytes
    }

    pub fn space_available(&self) -> usize {
        match self.direction {
            Direction::Output if self.buffers.error.is_none() => {
                self.buffers.capacity.saturating_sub(self.buffers.outbound.len())
            }
            _ => 0,
        }
    }

    /// Queue bytes for the driver to write, returning how many were accepted
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.space_available());
        self.buffers.outbound.extend_from_slice(&data[..n]);
        self.buffers.bytes_written += n;
        n
    }

    /// The error behind an error-occurred event
    pub fn error(&self) -> Option<&io::Error> {
        self.buffers.error.as_ref()
    }
}

impl fmt::Debug for StreamContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContext")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("bytes_available", &self.bytes_available())
            .field("space_available", &self.space_available())
            .finish()
    }
}
