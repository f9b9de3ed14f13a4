//! Elapsed-time measurement shared by host and device timers.

use std::time::Instant;

/// One-shot and accumulating interval timer.
///
/// `start_timing`/`stop_timing` bracket an interval; `accumulate_timing`
/// stops the current interval and adds it to a running total that survives
/// until `clear_timing`.
pub trait Timer {
    fn start_timing(&mut self);
    fn stop_timing(&mut self);
    fn accumulate_timing(&mut self);
    fn clear_timing(&mut self);
    /// Duration of the last completed interval.
    fn elapsed_micros(&self) -> f64;
    /// Sum of all accumulated intervals since the last clear.
    fn accumulated_micros(&self) -> f64;
}

/// Host wall-clock timer.
#[derive(Debug, Clone)]
pub struct WallClockTimer {
    start: Option<Instant>,
    elapsed_micros: f64,
    accumulated_micros: f64,
}

impl WallClockTimer {
    pub fn new() -> Self {
        Self {
            start: None,
            elapsed_micros: 0.0,
            accumulated_micros: 0.0,
        }
    }
}

impl Default for WallClockTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for WallClockTimer {
    fn start_timing(&mut self) {
        self.start = Some(Instant::now());
    }

    fn stop_timing(&mut self) {
        if let Some(start) = self.start {
            self.elapsed_micros = start.elapsed().as_secs_f64() * 1e6;
        }
    }

    fn accumulate_timing(&mut self) {
        self.stop_timing();
        self.accumulated_micros += self.elapsed_micros;
    }

    fn clear_timing(&mut self) {
        self.start = None;
        self.elapsed_micros = 0.0;
        self.accumulated_micros = 0.0;
    }

    fn elapsed_micros(&self) -> f64 {
        self.elapsed_micros
    }

    fn accumulated_micros(&self) -> f64 {
        self.accumulated_micros
    }
}

/// Timing record of one device dispatch, in microseconds of device time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallStats {
    pub queued_micros: u64,
    pub submit_micros: u64,
    pub start_micros: u64,
    pub end_micros: u64,
}

impl CallStats {
    /// Time spent executing on the device.
    pub fn run_micros(&self) -> u64 {
        self.end_micros.saturating_sub(self.start_micros)
    }

    /// Time between enqueue and start of execution.
    pub fn wait_micros(&self) -> u64 {
        self.start_micros.saturating_sub(self.queued_micros)
    }
}
