use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::runloop::{shared_listener_with, ListenerContext, MainLoop, MainLoopHandle};
use crate::stream::{
    linked_pair, ByteStream, EventMask, OutputHandle, PipeReader, PipeWriter, Registration,
    StreamContext, StreamDelegate, StreamEvent, StreamId,
};
use crate::wait::{self, Completion};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-test helper for exercising asynchronous and stream-based code.
///
/// Holds the listener context work is scheduled on, the calling thread's own
/// event loop, and the delegate every registered stream reports to.
pub struct AsyncTestCase {
    listener: Arc<ListenerContext>,
    main_loop: MainLoop,
    config: HarnessConfig,
    delegate: Arc<StreamDelegate>,
    registrations: HashMap<StreamId, Registration>,
    current_test_name: Option<String>,
}

impl AsyncTestCase {
    /// Create a test case on an explicitly constructed listener
    pub fn new(listener: Arc<ListenerContext>) -> Result<Self> {
        Self::with_config(listener, HarnessConfig::default())
    }

    pub fn with_config(listener: Arc<ListenerContext>, config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            listener,
            main_loop: MainLoop::new()?,
            config,
            delegate: Arc::new(StreamDelegate::new()),
            registrations: HashMap::new(),
            current_test_name: None,
        })
    }

    /// Create a test case on the process-wide listener, configured from the
    /// first configuration file found by [`HarnessConfig::load`]
    pub fn shared() -> Result<Self> {
        let config = HarnessConfig::load().map_err(|e| HarnessError::Config(format!("{:#}", e)))?;
        let listener = shared_listener_with(&config)?;
        Self::with_config(listener, config)
    }

    /// Label failures and logs with the running test's name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.set_current_test_name(name);
        self
    }

    pub fn set_current_test_name(&mut self, name: impl Into<String>) {
        self.current_test_name = Some(name.into());
    }

    pub fn current_test_name(&self) -> Option<&str> {
        self.current_test_name.as_deref()
    }

    /// The listener context asynchronous code under test runs on
    pub fn listener(&self) -> &Arc<ListenerContext> {
        &self.listener
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Handle for delivering callbacks to this test's own thread
    pub fn main_loop(&self) -> MainLoopHandle {
        self.main_loop.handle()
    }

    /// Pump this thread's event loop for `duration`
    pub fn run_main_loop_for(&mut self, duration: Duration) {
        self.main_loop.run_for(duration);
    }

    fn test_label(&self) -> String {
        self.current_test_name
            .clone()
            .or_else(|| std::thread::current().name().map(str::to_string))
            .unwrap_or_else(|| "async test".to_string())
    }

    /// Run `operation` and wait up to `timeout` for it to complete.
    ///
    /// Returns the time waited. On timeout, returns `HarnessError::Timeout`.
    pub fn try_wait_for_async<F>(&mut self, timeout: Duration, operation: F) -> Result<Duration>
    where
        F: FnOnce(Completion),
    {
        let label = self.test_label();
        let poll_slice = self.config.poll_slice();
        wait::try_wait_for_async(&mut self.main_loop, timeout, poll_slice, &label, operation)
    }

    /// Run `operation` and wait up to `timeout` for it to complete, failing
    /// the test if it does not.
    #[track_caller]
    pub fn wait_for_async<F>(&mut self, timeout: Duration, operation: F) -> Duration
    where
        F: FnOnce(Completion),
    {
        let label = self.test_label();
        let poll_slice = self.config.poll_slice();
        wait::wait_for_async(&mut self.main_loop, timeout, poll_slice, &label, operation)
    }

    /// [`wait_for_async`](Self::wait_for_async) with the configured default timeout
    #[track_caller]
    pub fn wait_for_async_default<F>(&mut self, operation: F) -> Duration
    where
        F: FnOnce(Completion),
    {
        let timeout = self.config.default_timeout();
        self.wait_for_async(timeout, operation)
    }

    /// Make this test case the stream's delegate, schedule it on the listener
    /// loop and open it.
    ///
    /// Keep the returned id to deregister the stream.
    pub fn register_stream(&mut self, stream: impl Into<ByteStream>) -> Result<StreamId> {
        let registration = Registration::start(
            &self.listener,
            stream.into(),
            Arc::clone(&self.delegate),
            self.config.transfer_buffer_size,
        )?;
        let id = registration.id();
        self.registrations.insert(id, registration);
        Ok(id)
    }

    /// Remove the stream from the listener loop, close it and detach the
    /// delegate. Returns `false` for a stream that is not registered.
    pub fn deregister_stream(&mut self, id: StreamId) -> bool {
        match self.registrations.remove(&id) {
            Some(mut registration) => registration.close(),
            None => {
                debug!("Ignoring deregistration of unknown {}", id);
                false
            }
        }
    }

    /// Writer for a registered write side, usable between events
    pub fn output_handle(&self, id: StreamId) -> Option<OutputHandle> {
        self.registrations
            .get(&id)
            .and_then(Registration::output_handle)
    }

    pub fn is_registered(&self, id: StreamId) -> bool {
        self.registrations.contains_key(&id)
    }

    pub fn registered_streams(&self) -> usize {
        self.registrations.len()
    }

    /// Create an in-process pipe. Neither end is registered.
    pub fn create_linked_stream_pair(&self, transfer_buffer_size: usize) -> (PipeReader, PipeWriter) {
        linked_pair(transfer_buffer_size)
    }

    /// Handle every event matching `mask` on streams registered with this
    /// test case. Runs on the listener thread, once per event.
    pub fn on_stream_event<F>(&self, mask: EventMask, handler: F)
    where
        F: FnMut(&mut StreamContext<'_>, StreamEvent) + Send + 'static,
    {
        self.delegate.set_handler(mask, Box::new(handler));
    }

    pub fn clear_stream_handler(&self) {
        self.delegate.clear_handler();
    }
}

impl Drop for AsyncTestCase {
    fn drop(&mut self) {
        for (id, mut registration) in self.registrations.drain() {
            warn!(
                "{}: {} was never deregistered, closing it",
                self.current_test_name.as_deref().unwrap_or("async test"),
                id
            );
            registration.close();
        }
    }
}

impl std::fmt::Debug for AsyncTestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTestCase")
            .field("listener", &self.listener)
            .field("current_test_name", &self.current_test_name)
            .field("registered_streams", &self.registrations.len())
            .finish()
    }
}
