use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{Allocator, CoreError, CpuAllocator, DeviceType, Result};

/// Maps each device type to the one allocator serving it.
///
/// Built explicitly during engine startup: each backend registers once, and
/// a second registration for the same device type is rejected.
#[derive(Default)]
pub struct AllocatorRegistry {
    allocators: HashMap<DeviceType, Arc<dyn Allocator>>,
}

impl fmt::Debug for AllocatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorRegistry")
            .field("devices", &self.device_types())
            .finish()
    }
}

impl AllocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the host allocator already registered for `Cpu`.
    pub fn with_cpu() -> Self {
        let mut registry = Self::new();
        registry
            .allocators
            .insert(DeviceType::Cpu, Arc::new(CpuAllocator::new()));
        registry
    }

    /// Register `allocator` as the allocator for `device`.
    pub fn register(&mut self, device: DeviceType, allocator: Arc<dyn Allocator>) -> Result<()> {
        if self.allocators.contains_key(&device) {
            tracing::error!("allocator for device type {} registered twice", device);
            return Err(CoreError::DuplicateAllocator(device));
        }
        tracing::debug!("registered {:?} for device type {}", allocator, device);
        self.allocators.insert(device, allocator);
        Ok(())
    }

    /// Look up the allocator for `device`.
    pub fn get(&self, device: DeviceType) -> Result<Arc<dyn Allocator>> {
        self.allocators
            .get(&device)
            .cloned()
            .ok_or(CoreError::UnregisteredDevice(device))
    }

    pub fn contains(&self, device: DeviceType) -> bool {
        self.allocators.contains_key(&device)
    }

    /// Registered device types, sorted.
    pub fn device_types(&self) -> Vec<DeviceType> {
        let mut types: Vec<_> = self.allocators.keys().copied().collect();
        types.sort();
        types
    }
}
