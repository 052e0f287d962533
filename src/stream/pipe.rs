use super::ByteStream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::debug;

/// Read end of a linked stream pair
#[derive(Debug)]
pub struct PipeReader {
    inner: DuplexStream,
}

/// Write end of a linked stream pair
#[derive(Debug)]
pub struct PipeWriter {
    inner: DuplexStream,
}

/// Create an in-process pipe: bytes written to the writer become readable
/// from the reader, in order.
///
/// At most `transfer_buffer_size` bytes are in flight; a writer with more to
/// send waits until the reader drains the buffer. Dropping or shutting down
/// the writer ends the reader's stream, dropping the reader makes further
/// writes fail with `BrokenPipe`.
pub fn linked_pair(transfer_buffer_size: usize) -> (PipeReader, PipeWriter) {
    let transfer_buffer_size = transfer_buffer_size.max(1);
    let (write_end, read_end) = tokio::io::duplex(transfer_buffer_size);
    debug!("Created linked stream pair with {} byte buffer", transfer_buffer_size);

    (
        PipeReader { inner: read_end },
        PipeWriter { inner: write_end },
    )
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl From<PipeReader> for ByteStream {
    fn from(reader: PipeReader) -> Self {
        ByteStream::input(reader)
    }
}

impl From<PipeWriter> for ByteStream {
    fn from(writer: PipeWriter) -> Self {
        ByteStream::output(writer)
    }
}
