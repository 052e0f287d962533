use crate::error::{HarnessError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tracing::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The calling thread's own event loop.
///
/// Callbacks posted through a [`MainLoopHandle`] and futures spawned on it only
/// make progress while the owning thread pumps the loop with
/// [`MainLoop::run_for`] or during a wait.
pub struct MainLoop {
    runtime: Runtime,
    jobs_tx: mpsc::UnboundedSender<Job>,
    jobs_rx: mpsc::UnboundedReceiver<Job>,
}

/// Cloneable, thread-safe access to a [`MainLoop`]
#[derive(Clone)]
pub struct MainLoopHandle {
    jobs: mpsc::UnboundedSender<Job>,
    runtime: Handle,
}

impl MainLoop {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HarnessError::RuntimeBuild)?;
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime,
            jobs_tx,
            jobs_rx,
        })
    }

    pub fn handle(&self) -> MainLoopHandle {
        MainLoopHandle {
            jobs: self.jobs_tx.clone(),
            runtime: self.runtime.handle().clone(),
        }
    }

    /// Pump the loop for `slice`
    pub fn run_for(&mut self, slice: Duration) {
        let Self {
            runtime, jobs_rx, ..
        } = self;

        runtime.block_on(async {
            let deadline = tokio::time::sleep(slice);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut deadline => break,
                    Some(job) = jobs_rx.recv() => job(),
                }
            }
        });
    }

    /// Pump the loop for at most `slice`, returning early once `signal` is true.
    ///
    /// Returns the value of the signal when the slice ended.
    pub fn run_until(&mut self, slice: Duration, signal: &mut watch::Receiver<bool>) -> bool {
        let Self {
            runtime, jobs_rx, ..
        } = self;

        runtime.block_on(async {
            let deadline = tokio::time::sleep(slice);
            tokio::pin!(deadline);

            loop {
                if *signal.borrow_and_update() {
                    return true;
                }

                tokio::select! {
                    _ = &mut deadline => {
                        trace!("Main loop slice of {:?} elapsed", slice);
                        return *signal.borrow();
                    }
                    changed = signal.changed() => {
                        // All senders gone; fall back to sleeping out the slice
                        if changed.is_err() {
                            deadline.as_mut().await;
                            return *signal.borrow();
                        }
                    }
                    Some(job) = jobs_rx.recv() => job(),
                }
            }
        })
    }

    /// Drive `future` to completion on this loop, running posted callbacks meanwhile
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl MainLoopHandle {
    /// Queue a callback for the owning thread. Returns `false` once the loop is gone.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs.send(Box::new(f)).is_ok()
    }

    /// Spawn a future that is driven whenever the owning thread pumps the loop
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop").finish_non_exhaustive()
    }
}
