//! Waiting on callback-driven asynchronous operations
//!
//! The operation under test receives a [`Completion`] and signals it when
//! its callback fires. The waiting thread pumps its own [`MainLoop`] in short
//! slices until the completion is signalled or the timeout elapses, so
//! callbacks delivered to the waiting thread itself still run.

pub mod completion;

pub use completion::Completion;

use crate::error::{HarnessError, Result};
use crate::runloop::MainLoop;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Run `operation` and wait for it to signal completion.
///
/// Returns the time waited. Fails with [`HarnessError::Timeout`] once
/// `timeout` has elapsed without completion, never earlier.
pub fn try_wait_for_async<F>(
    main_loop: &mut MainLoop,
    timeout: Duration,
    poll_slice: Duration,
    test: &str,
    operation: F,
) -> Result<Duration>
where
    F: FnOnce(Completion),
{
    let (completion, mut signal) = Completion::new();
    let poll_slice = poll_slice.max(Duration::from_millis(1));
    let start = Instant::now();

    operation(completion);

    let mut slices = 0u64;
    loop {
        if *signal.borrow() {
            let elapsed = start.elapsed();
            debug!(
                "{}: async operation completed after {:?} ({} slices)",
                test, elapsed, slices
            );
            return Ok(elapsed);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(HarnessError::Timeout {
                test: test.to_string(),
                timeout,
                elapsed,
            });
        }

        let slice = poll_slice.min(timeout - elapsed);
        main_loop.run_until(slice, &mut signal);
        slices += 1;
        trace!("{}: wait slice {} finished", test, slices);
    }
}

/// Like [`try_wait_for_async`], but a timeout fails the calling test.
///
/// # Panics
///
/// Panics with a descriptive message when the operation does not complete
/// within `timeout`.
#[track_caller]
pub fn wait_for_async<F>(
    main_loop: &mut MainLoop,
    timeout: Duration,
    poll_slice: Duration,
    test: &str,
    operation: F,
) -> Duration
where
    F: FnOnce(Completion),
{
    match try_wait_for_async(main_loop, timeout, poll_slice, test, operation) {
        Ok(elapsed) => elapsed,
        Err(e) => panic!("{}", e),
    }
}
