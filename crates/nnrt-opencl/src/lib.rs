//! # nnrt-opencl
//!
//! OpenCL GPU backend for nnrt.
//!
//! Provides:
//! - Runtime-loaded OpenCL driver binding (no link-time dependency)
//! - `OpenClRuntime`: device selection, capability queries, and the
//!   in-memory / persisted / precompiled / source kernel build protocol
//! - `OpenClAllocator`: buffers and RGBA images in device memory
//! - `OpenClProfilingTimer`: device-time measurement from event counters
//! - `DeviceSession`: the allocator registry plus optional runtime

pub mod allocator;
pub mod api;
pub mod binaries;
pub mod build_key;
pub mod config;
pub mod device_info;
pub mod error;
pub mod ffi;
pub mod profiling;
pub mod program;
pub mod runtime;
pub mod session;
pub mod sources;

pub use allocator::OpenClAllocator;
pub use api::{ComputeApi, DeviceInfo, EventTimestamps, KernelArg, PlatformInfo};
pub use binaries::ProgramBundle;
pub use build_key::BuildKey;
pub use config::{GpuPerfHint, GpuPriorityHint, RuntimeConfig};
pub use device_info::GpuType;
pub use error::{cl_error_to_string, ClError};
pub use ffi::OpenClLibrary;
pub use profiling::{OpenClProfilingTimer, ProfilingEvent};
pub use program::{BuildOrigin, Event, Kernel, Program};
pub use runtime::{BuildStats, OpenClRuntime, OpenClRuntimeBuilder};
pub use session::DeviceSession;
pub use sources::{KernelSource, SourceDir, SourceMap};
