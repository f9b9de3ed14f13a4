//! Owning wrappers over built programs, kernels and events.
//!
//! Each wrapper holds the [`ComputeApi`] by `Arc` so the driver library
//! stays loaded until the last native handle has been released.

use std::fmt;
use std::sync::Arc;

use crate::api::{ComputeApi, EventTimestamps, KernelArg, RawEvent, RawKernel, RawProgram};
use crate::build_key::BuildKey;
use crate::ClError;

/// Which tier of the build protocol produced a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildOrigin {
    /// Binary from the persisted kernel cache.
    PersistedCache,
    /// Binary from the precompiled bundle.
    Precompiled,
    /// Compiled from OpenCL C source this session.
    Source,
}

impl fmt::Display for BuildOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildOrigin::PersistedCache => "persisted cache",
            BuildOrigin::Precompiled => "precompiled bundle",
            BuildOrigin::Source => "source",
        };
        f.write_str(name)
    }
}

/// A program built for the runtime's device.
pub struct Program {
    api: Arc<dyn ComputeApi>,
    raw: RawProgram,
    key: BuildKey,
    origin: BuildOrigin,
}

impl Program {
    pub(crate) fn new(api: Arc<dyn ComputeApi>, raw: RawProgram, key: BuildKey, origin: BuildOrigin) -> Self {
        Self { api, raw, key, origin }
    }

    pub fn raw(&self) -> RawProgram {
        self.raw
    }

    pub fn key(&self) -> &BuildKey {
        &self.key
    }

    pub fn origin(&self) -> BuildOrigin {
        self.origin
    }

    /// Device binary, as stored in the kernel caches.
    pub fn binary(&self) -> Result<Vec<u8>, ClError> {
        self.api.program_binary(self.raw)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("key", &self.key.cache_key())
            .field("origin", &self.origin)
            .finish()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.api.release_program(self.raw);
    }
}

/// A kernel entry point of a built program.
pub struct Kernel {
    api: Arc<dyn ComputeApi>,
    raw: RawKernel,
    name: String,
    program: Arc<Program>,
}

impl Kernel {
    pub(crate) fn new(api: Arc<dyn ComputeApi>, raw: RawKernel, name: &str, program: Arc<Program>) -> Self {
        Self { api, raw, name: name.to_string(), program }
    }

    pub fn raw(&self) -> RawKernel {
        self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The program this kernel was extracted from.
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn set_arg(&self, index: u32, arg: KernelArg<'_>) -> Result<(), ClError> {
        self.api.set_kernel_arg(self.raw, index, arg)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("program", &self.program.key().cache_key())
            .finish()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.api.release_kernel(self.raw);
    }
}

/// Completion handle of one enqueued command.
pub struct Event {
    api: Arc<dyn ComputeApi>,
    raw: RawEvent,
}

impl Event {
    pub(crate) fn new(api: Arc<dyn ComputeApi>, raw: RawEvent) -> Self {
        Self { api, raw }
    }

    pub fn raw(&self) -> RawEvent {
        self.raw
    }

    /// Block until the command has completed.
    pub fn wait(&self) -> Result<(), ClError> {
        self.api.wait_for_event(self.raw)
    }

    /// Device timestamps. The event must have completed and the queue must
    /// have been created with profiling enabled.
    pub fn timestamps(&self) -> Result<EventTimestamps, ClError> {
        self.api.event_timestamps(self.raw)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Event").field(&self.raw).finish()
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.api.release_event(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_display() {
        assert_eq!(BuildOrigin::Source.to_string(), "source");
        assert_eq!(BuildOrigin::PersistedCache.to_string(), "persisted cache");
        assert_eq!(BuildOrigin::Precompiled.to_string(), "precompiled bundle");
    }
}
