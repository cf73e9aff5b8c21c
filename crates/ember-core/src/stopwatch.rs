//! Small restartable stopwatch for frame timing.

use std::time::{Duration, Instant};

/// Accumulating stopwatch. `start` begins a measurement, `stop` latches it.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    started_at: Option<Instant>,
    elapsed: Duration,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new measurement, discarding any previous one.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.elapsed = Duration::ZERO;
    }

    /// Latches the time since `start`. A stop without a start leaves the
    /// last latched value untouched.
    pub fn stop(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.elapsed = started_at.elapsed();
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// The last latched duration, or the running time if still started.
    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => started_at.elapsed(),
            None => self.elapsed,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}
