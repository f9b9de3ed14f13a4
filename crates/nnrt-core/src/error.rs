use crate::{DType, DeviceType};

/// Errors raised by allocators, the allocator registry and kernel-cache storage.
///
/// Most variants describe programming or packaging defects and are reported
/// by [`CoreError::is_fatal`]. Callers are expected to stop using the runtime
/// when they see one; tests can intercept them instead of aborting.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("allocator for device type {0} registered twice")]
    DuplicateAllocator(DeviceType),

    #[error("no allocator registered for device type {0}")]
    UnregisteredDevice(DeviceType),

    #[error("{device} allocator does not support image memory ({op})")]
    ImageUnsupported { device: DeviceType, op: &'static str },

    #[error("image data type {0} is not supported")]
    UnsupportedImageType(DType),

    #[error("failed to allocate {nbytes} bytes on {device}")]
    AllocationFailed { device: DeviceType, nbytes: usize },

    #[error("map of {nbytes} bytes at offset {offset} exceeds buffer of {capacity} bytes")]
    MapOutOfRange { offset: usize, nbytes: usize, capacity: usize },

    #[error("{device} device error: {msg}")]
    Device { device: DeviceType, msg: String },

    #[error("kernel cache storage error: {0}")]
    Storage(String),

    #[error("kernel cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether this error indicates an unrecoverable defect.
    ///
    /// Storage failures are the only recoverable class: a missing or corrupt
    /// kernel cache just means kernels get rebuilt.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::Storage(_) | CoreError::Io(_))
    }
}

impl From<bincode::Error> for CoreError {
    fn from(err: bincode::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CoreError::DuplicateAllocator(DeviceType::Cpu).is_fatal());
        assert!(CoreError::UnregisteredDevice(DeviceType::Dsp).is_fatal());
        assert!(CoreError::ImageUnsupported { device: DeviceType::Cpu, op: "allocate_image" }.is_fatal());
        assert!(!CoreError::Storage("corrupt".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = CoreError::UnregisteredDevice(DeviceType::Gpu);
        assert_eq!(err.to_string(), "no allocator registered for device type gpu");
    }
}
