use std::time::{Duration, Instant};

/// A restartable wall-clock stopwatch
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchmarkTimer {
    started: Option<Instant>,
}

impl BenchmarkTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Time since the last start, without stopping
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }

    /// Time since the last start; the timer must be started again afterwards
    pub fn stop(&mut self) -> Option<Duration> {
        self.started.take().map(|started| started.elapsed())
    }
}

/// Render a duration as fractional seconds with microsecond precision
pub fn format_seconds(elapsed: Duration) -> String {
    format!("{:.6}", elapsed.as_secs_f64())
}
