//! Helpers for testing asynchronous, callback-driven and stream-driven code,
//! plus benchmark timing utilities.
//!
//! ```no_run
//! use async_testcase::AsyncTestCase;
//! use std::time::Duration;
//!
//! let mut case = AsyncTestCase::shared()?.named("completes_in_background");
//! case.wait_for_async(Duration::from_secs(1), |done| {
//!     std::thread::spawn(move || done.complete());
//! });
//! # Ok::<(), async_testcase::HarnessError>(())
//! ```

pub mod bench;
pub mod case;
pub mod config;
pub mod error;
pub mod logging;
pub mod runloop;
pub mod stream;
pub mod wait;

// Re-export key types for easy testing
pub use bench::{run_timed, run_timed_averaged, timer_start, timer_stop, BenchmarkTimer};
pub use case::AsyncTestCase;
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use runloop::{shared_listener, ListenerContext, MainLoop, MainLoopHandle};
pub use stream::{
    ByteStream, Direction, EventMask, OutputHandle, PipeReader, PipeWriter, StreamContext,
    StreamEvent, StreamId,
};
pub use wait::{try_wait_for_async, wait_for_async, Completion};
