//! Device-side timing from OpenCL event profiling counters.

use nnrt_core::Timer;

use crate::api::EventTimestamps;
use crate::program::Event;
use crate::ClError;

/// A completed command whose device timestamps can be read.
pub trait ProfilingEvent {
    fn timestamps(&self) -> Result<EventTimestamps, ClError>;
}

impl ProfilingEvent for Event {
    fn timestamps(&self) -> Result<EventTimestamps, ClError> {
        Event::timestamps(self)
    }
}

/// [`Timer`] over device event timestamps.
///
/// `start_timing` is a marker only: both ends of the interval are read from
/// the event in `stop_timing`, after the caller has waited for completion.
pub struct OpenClProfilingTimer<'a> {
    event: Option<&'a dyn ProfilingEvent>,
    start_ns: u64,
    end_ns: u64,
    accumulated_micros: f64,
}

impl<'a> OpenClProfilingTimer<'a> {
    pub fn new(event: &'a dyn ProfilingEvent) -> Self {
        Self { event: Some(event), start_ns: 0, end_ns: 0, accumulated_micros: 0.0 }
    }

    /// A timer with no event yet; `stop_timing` is a no-op until one is set.
    pub fn detached() -> Self {
        Self { event: None, start_ns: 0, end_ns: 0, accumulated_micros: 0.0 }
    }

    /// Point the timer at the next dispatch, keeping the accumulated total.
    pub fn set_event(&mut self, event: &'a dyn ProfilingEvent) {
        self.event = Some(event);
    }
}

impl Timer for OpenClProfilingTimer<'_> {
    fn start_timing(&mut self) {}

    fn stop_timing(&mut self) {
        let Some(event) = self.event else {
            return;
        };
        match event.timestamps() {
            Ok(ts) => {
                self.start_ns = ts.start_ns;
                self.end_ns = ts.end_ns;
            }
            Err(err) => {
                tracing::warn!("read event profiling info: {}", err);
                self.start_ns = 0;
                self.end_ns = 0;
            }
        }
    }

    fn accumulate_timing(&mut self) {
        self.stop_timing();
        self.accumulated_micros += self.elapsed_micros();
    }

    fn clear_timing(&mut self) {
        self.start_ns = 0;
        self.end_ns = 0;
        self.accumulated_micros = 0.0;
    }

    fn elapsed_micros(&self) -> f64 {
        self.end_ns.saturating_sub(self.start_ns) as f64 / 1000.0
    }

    fn accumulated_micros(&self) -> f64 {
        self.accumulated_micros
    }
}
