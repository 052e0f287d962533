//! Benchmark timing helpers
//!
//! Each helper logs a "began" line before the work and a "completed" (or
//! "mean") line after it. The free functions share one scratch timer per
//! thread, so `timer_start`/`timer_stop` pairs must not be nested on a thread;
//! use [`BenchmarkTimer`] directly for independent timers.

pub mod timer;

pub use timer::{format_seconds, BenchmarkTimer};

use std::cell::Cell;
use std::time::Duration;
use tracing::{info, warn};

thread_local! {
    static SCRATCH: Cell<BenchmarkTimer> = Cell::new(BenchmarkTimer::new());
}

/// Record the current time and log that `label` began
pub fn timer_start(label: &str) {
    SCRATCH.with(|scratch| {
        let mut timer = scratch.get();
        timer.start();
        scratch.set(timer);
    });
    info!(label = label, "benchmark timer began");
}

/// Log the time elapsed since the matching [`timer_start`] on this thread
pub fn timer_stop(label: &str) -> Option<Duration> {
    let elapsed = SCRATCH.with(|scratch| {
        let mut timer = scratch.get();
        let elapsed = timer.stop();
        scratch.set(timer);
        elapsed
    });

    match elapsed {
        Some(elapsed) => {
            info!(
                label = label,
                elapsed_secs = elapsed.as_secs_f64(),
                "benchmark completed in {} seconds",
                format_seconds(elapsed)
            );
            Some(elapsed)
        }
        None => {
            warn!(label = label, "benchmark timer stopped without being started");
            None
        }
    }
}

/// Time one run of `block`. A missing block is a no-op.
pub fn run_timed<F>(label: &str, block: Option<F>) -> Option<Duration>
where
    F: FnOnce(),
{
    let block = block?;

    let mut timer = BenchmarkTimer::new();
    info!(label = label, "benchmark timer began");
    timer.start();
    block();
    let elapsed = timer.stop()?;

    info!(
        label = label,
        elapsed_secs = elapsed.as_secs_f64(),
        "benchmark completed in {} seconds",
        format_seconds(elapsed)
    );
    Some(elapsed)
}

/// Run `block` `iterations` times back to back and log the mean run time.
///
/// A missing block is a no-op; zero iterations logs a warning and measures
/// nothing.
pub fn run_timed_averaged<F>(label: &str, iterations: u32, block: Option<F>) -> Option<Duration>
where
    F: FnMut(),
{
    let mut block = block?;

    if iterations == 0 {
        warn!(label = label, "benchmark requested with zero iterations");
        return None;
    }

    info!(
        label = label,
        iterations = iterations,
        "benchmark timer began, {} iterations",
        iterations
    );

    let mut timer = BenchmarkTimer::new();
    let mut total = Duration::ZERO;
    for _ in 0..iterations {
        timer.start();
        block();
        total += timer.stop().unwrap_or_default();
    }

    let mean = total / iterations;
    info!(
        label = label,
        iterations = iterations,
        mean_secs = mean.as_secs_f64(),
        "benchmark mean time {} seconds",
        format_seconds(mean)
    );
    Some(mean)
}
