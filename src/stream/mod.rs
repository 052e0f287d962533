//! Stream event bridge
//!
//! Streams registered with a test case are driven on the listener loop and
//! report their lifecycle as [`StreamEvent`]s to the test's handler:
//!
//! - read sides: open-completed, has-bytes-available, end-encountered
//! - write sides: open-completed, has-space-available (after every flush of
//!   handler writes or [`OutputHandle`] writes)
//! - both: error-occurred
//!
//! [`linked_pair`] builds an in-process pipe for observing bytes written by
//! code under test.

pub mod bridge;
pub mod context;
pub mod event;
pub mod pipe;

pub use bridge::{OutputHandle, Registration, StreamDelegate, StreamHandler};
pub use context::{Direction, StreamContext, StreamId};
pub use event::{EventMask, StreamEvent};
pub use pipe::{linked_pair, PipeReader, PipeWriter};

use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream that can be registered on a listener loop
pub enum ByteStream {
    Input(Box<dyn AsyncRead + Send + Unpin>),
    Output(Box<dyn AsyncWrite + Send + Unpin>),
}

impl ByteStream {
    pub fn input<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        ByteStream::Input(Box::new(reader))
    }

    pub fn output<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        ByteStream::Output(Box::new(writer))
    }

    pub fn direction(&self) -> Direction {
        match self {
            ByteStream::Input(_) => Direction::Input,
            ByteStream::Output(_) => Direction::Output,
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ByteStream").field(&self.direction()).finish()
    }
}
