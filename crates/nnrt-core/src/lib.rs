//! # nnrt-core
//!
//! Device abstraction shared by every nnrt backend.
//!
//! Provides:
//! - `DeviceType` / `DType` identifiers
//! - The `Allocator` capability and the aligned, zero-filled `CpuAllocator`
//! - `AllocatorRegistry`: one allocator per device type, built at startup
//! - `Timer` + `WallClockTimer`, and `CallStats` for device dispatches
//! - `KvStorage` for persisting compiled kernel binaries

pub mod allocator;
pub mod device;
pub mod dtype;
pub mod error;
pub mod registry;
pub mod storage;
pub mod timer;

pub use allocator::{
    Allocator, CpuAllocator, ImageBlock, ImagePitch, ImageShape, MemoryBlock, ALIGNMENT,
};
pub use device::DeviceType;
pub use dtype::DType;
pub use error::CoreError;
pub use registry::AllocatorRegistry;
pub use storage::{FileStorage, KvStorage, MemoryStorage};
pub use timer::{CallStats, Timer, WallClockTimer};

pub type Result<T> = std::result::Result<T, CoreError>;
