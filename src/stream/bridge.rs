use super::context::{Direction, StreamBuffers, StreamContext, StreamId};
use super::event::{EventMask, StreamEvent};
use super::ByteStream;
use crate::error::Result;
use crate::runloop::ListenerContext;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Upper bound on closing a write side during deregistration
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Handler invoked on the listener thread for each matching stream event
pub type StreamHandler = Box<dyn FnMut(&mut StreamContext<'_>, StreamEvent) + Send + 'static>;

struct MaskedHandler {
    mask: EventMask,
    handler: StreamHandler,
}

/// Event delegate shared by every stream a test case registers
#[derive(Default)]
pub struct StreamDelegate {
    handler: Mutex<Option<MaskedHandler>>,
}

impl StreamDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler, replacing any previous one. Waits for an
    /// in-flight invocation of the previous handler to return.
    pub fn set_handler(&self, mask: EventMask, handler: StreamHandler) {
        *self.lock() = Some(MaskedHandler { mask, handler });
    }

    pub fn clear_handler(&self) {
        *self.lock() = None;
    }

    pub fn has_handler(&self) -> bool {
        self.lock().is_some()
    }

    fn dispatch(&self, ctx: &mut StreamContext<'_>, event: StreamEvent) -> bool {
        let mut slot = self.lock();
        match slot.as_mut() {
            Some(masked) if masked.mask.matches(event) => {
                (masked.handler)(ctx, event);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<MaskedHandler>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StreamDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDelegate")
            .field("has_handler", &self.has_handler())
            .finish()
    }
}

struct RegistrationShared {
    id: StreamId,
    direction: Direction,
    delegate: Mutex<Option<Arc<StreamDelegate>>>,
}

impl RegistrationShared {
    /// Hand one event to the delegate. The slot stays locked for the whole
    /// handler call so detaching waits for it.
    fn deliver(&self, buffers: &mut StreamBuffers, event: StreamEvent) -> bool {
        let slot = self.delegate.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(delegate) = slot.as_ref() else {
            trace!("{} detached, dropping {}", self.id, event);
            return false;
        };

        trace!("{} delivering {}", self.id, event);
        buffers.begin_delivery();
        let mut ctx = StreamContext::new(self.id, self.direction, buffers);
        delegate.dispatch(&mut ctx, event)
    }

    fn detach(&self) -> bool {
        self.delegate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    fn is_attached(&self) -> bool {
        self.delegate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Writes into a registered write side from outside its handler.
///
/// Bytes are queued for the driver, which flushes them on the listener loop
/// and signals has-space-available afterwards, the same as for handler writes.
#[derive(Clone, Debug)]
pub struct OutputHandle {
    id: StreamId,
    writes: mpsc::UnboundedSender<Vec<u8>>,
}

impl OutputHandle {
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Queue `data` for writing. Returns `false` once the stream has failed
    /// or been deregistered.
    pub fn write(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return !self.writes.is_closed();
        }
        self.writes.send(data.to_vec()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.writes.is_closed()
    }
}

/// A stream scheduled on a listener loop with a delegate attached
pub struct Registration {
    shared: Arc<RegistrationShared>,
    close: Option<oneshot::Sender<()>>,
    output: Option<OutputHandle>,
    task: JoinHandle<()>,
}

impl Registration {
    /// Attach `delegate`, schedule the stream's driver on `listener` and open it
    pub fn start(
        listener: &ListenerContext,
        stream: ByteStream,
        delegate: Arc<StreamDelegate>,
        transfer_buffer_size: usize,
    ) -> Result<Self> {
        let id = StreamId::next();
        let shared = Arc::new(RegistrationShared {
            id,
            direction: stream.direction(),
            delegate: Mutex::new(Some(delegate)),
        });
        let (close_tx, close_rx) = oneshot::channel();
        let (writes_tx, queued) = mpsc::unbounded_channel();
        let output = match shared.direction {
            Direction::Output => Some(OutputHandle {
                id,
                writes: writes_tx,
            }),
            Direction::Input => None,
        };

        let driver_shared = Arc::clone(&shared);
        let task = listener.spawn_task(async move {
            match stream {
                ByteStream::Input(reader) => {
                    drive_input(reader, &driver_shared, close_rx, transfer_buffer_size).await
                }
                ByteStream::Output(writer) => {
                    drive_output(writer, &driver_shared, close_rx, queued, transfer_buffer_size)
                        .await
                }
            }
            debug!("{} driver finished", driver_shared.id);
        })?;

        debug!(
            "Registered {} ({:?}) on listener '{}'",
            id,
            shared.direction,
            listener.name()
        );

        Ok(Self {
            shared,
            close: Some(close_tx),
            output,
            task,
        })
    }

    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    pub fn is_attached(&self) -> bool {
        self.shared.is_attached()
    }

    /// Writer for a registered write side, `None` for read sides
    pub fn output_handle(&self) -> Option<OutputHandle> {
        self.output.clone()
    }

    /// Whether the driver task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Detach the delegate, then have the driver close and drop the stream.
    ///
    /// Returns `false` if the registration was already closed.
    pub fn close(&mut self) -> bool {
        let Some(close) = self.close.take() else {
            return false;
        };
        self.shared.detach();
        let _ = close.send(());
        debug!("Deregistered {}", self.shared.id);
        true
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.shared.id)
            .field("direction", &self.shared.direction)
            .field("attached", &self.is_attached())
            .finish()
    }
}

async fn drive_input(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    shared: &RegistrationShared,
    mut close: oneshot::Receiver<()>,
    transfer_buffer_size: usize,
) {
    let mut buffers = StreamBuffers::new(transfer_buffer_size);
    let mut chunk = vec![0u8; buffers.capacity];

    shared.deliver(&mut buffers, StreamEvent::OpenCompleted);

    loop {
        if buffers.inbound.len() >= buffers.capacity {
            trace!("{} inbound buffer full, waiting for deregistration", shared.id);
            break;
        }

        let read = tokio::select! {
            _ = &mut close => return,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                if buffers.inbound.is_empty() {
                    shared.deliver(&mut buffers, StreamEvent::EndEncountered);
                } else {
                    trace!("{} reached EOF with unread bytes", shared.id);
                }
                break;
            }
            Ok(n) => {
                buffers.inbound.extend(&chunk[..n]);
                deliver_available(shared, &mut buffers);
            }
            Err(e) => {
                warn!("{} read failed: {}", shared.id, e);
                buffers.error = Some(e);
                shared.deliver(&mut buffers, StreamEvent::ErrorOccurred);
                break;
            }
        }
    }

    let _ = close.await;
}

/// Signal has-bytes-available until the handler stops consuming
fn deliver_available(shared: &RegistrationShared, buffers: &mut StreamBuffers) {
    loop {
        if !shared.deliver(buffers, StreamEvent::HasBytesAvailable) {
            return;
        }
        if buffers.inbound.is_empty() || buffers.bytes_read == 0 {
            return;
        }
    }
}

async fn drive_output(
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
    shared: &RegistrationShared,
    mut close: oneshot::Receiver<()>,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
    transfer_buffer_size: usize,
) {
    let mut buffers = StreamBuffers::new(transfer_buffer_size);

    shared.deliver(&mut buffers, StreamEvent::OpenCompleted);
    shared.deliver(&mut buffers, StreamEvent::HasSpaceAvailable);

    loop {
        if buffers.outbound.is_empty() {
            let bytes = tokio::select! {
                _ = &mut close => break,
                bytes = queued.recv() => bytes,
            };
            match bytes {
                Some(bytes) => {
                    buffers.outbound.extend_from_slice(&bytes);
                    while let Ok(more) = queued.try_recv() {
                        buffers.outbound.extend_from_slice(&more);
                    }
                }
                None => {
                    let _ = (&mut close).await;
                    break;
                }
            }
            continue;
        }

        let flushed = tokio::select! {
            _ = &mut close => break,
            flushed = flush_outbound(&mut writer, &mut buffers.outbound) => flushed,
        };

        match flushed {
            Ok(()) => {
                shared.deliver(&mut buffers, StreamEvent::HasSpaceAvailable);
            }
            Err(e) => {
                warn!("{} write failed: {}", shared.id, e);
                buffers.outbound.clear();
                buffers.error = Some(e);
                queued.close();
                shared.deliver(&mut buffers, StreamEvent::ErrorOccurred);
                let _ = (&mut close).await;
                break;
            }
        }
    }

    finish_output(&mut writer, shared.id).await;
}

async fn flush_outbound(
    writer: &mut Box<dyn AsyncWrite + Send + Unpin>,
    outbound: &mut Vec<u8>,
) -> io::Result<()> {
    writer.write_all(outbound.as_slice()).await?;
    outbound.clear();
    writer.flush().await
}

async fn finish_output(writer: &mut Box<dyn AsyncWrite + Send + Unpin>, id: StreamId) {
    match tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("{} shutdown failed: {}", id, e),
        Err(_) => debug!("{} shutdown timed out", id),
    }
}
