use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task;
use tracing::{debug, info, warn};

/// A dedicated background thread running a continuously pumped event loop.
///
/// Asynchronous operations and stream drivers under test are scheduled here so
/// that the test thread never blocks the loop it is observing. The loop is a
/// current-thread tokio runtime that stays inside `block_on` until shutdown.
pub struct ListenerContext {
    name: String,
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerContext {
    /// Start a listener thread named after `config.listener_thread_name`
    pub fn spawn(config: &HarnessConfig) -> Result<Self> {
        Self::spawn_named(&config.listener_thread_name)
    }

    pub fn spawn_named(name: &str) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread_name = name.to_string();

        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(HarnessError::RuntimeBuild(e)));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                debug!("Listener loop '{}' running", thread_name);

                runtime.block_on(async move {
                    // A dropped sender also ends the loop
                    let _ = shutdown_rx.await;
                });

                debug!("Listener loop '{}' stopped", thread_name);
            })
            .map_err(HarnessError::ListenerSpawn)?;

        let handle = match ready_rx.recv() {
            Ok(result) => result?,
            Err(_) => return Err(HarnessError::ListenerExited),
        };
        let thread_id = thread.thread().id();

        info!("Started listener context '{}'", name);

        Ok(Self {
            name: name.to_string(),
            handle,
            thread_id,
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime handle of the listener loop
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Identifier of the listener thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_listener_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn is_running(&self) -> bool {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Schedule a future on the listener loop
    pub fn spawn_task<F>(&self, future: F) -> Result<task::JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if !self.is_running() {
            return Err(HarnessError::ListenerShutDown);
        }
        Ok(self.handle.spawn(future))
    }

    /// Run a closure on the listener thread
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_task(async move { f() }).map(|_| ())
    }

    /// Stop the loop and join the thread. Idempotent.
    ///
    /// Called from the listener thread itself, the loop is told to stop but
    /// the thread is not joined.
    pub fn shutdown(&self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return;
        };
        let _ = sender.send(());

        if self.is_listener_thread() {
            warn!("Listener context '{}' shut down from its own thread", self.name);
            return;
        }

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("Listener thread '{}' panicked", self.name);
            }
        }
        info!("Stopped listener context '{}'", self.name);
    }
}

impl Drop for ListenerContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ListenerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerContext")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .field("running", &self.is_running())
            .finish()
    }
}
