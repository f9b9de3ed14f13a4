//! Top-level device context of an inference session.

use std::sync::Arc;

use nnrt_core::{Allocator, AllocatorRegistry, DeviceType};

use crate::allocator::OpenClAllocator;
use crate::config::RuntimeConfig;
use crate::runtime::OpenClRuntime;
use crate::ClError;

/// Owns the allocator registry and, when a GPU is in use, the OpenCL
/// runtime. Components receive it by reference.
///
/// Allocators are declared before the runtime so they are dropped first.
#[derive(Debug)]
pub struct DeviceSession {
    allocators: AllocatorRegistry,
    runtime: Option<Arc<OpenClRuntime>>,
}

impl DeviceSession {
    /// CPU only.
    pub fn cpu() -> Self {
        Self { allocators: AllocatorRegistry::with_cpu(), runtime: None }
    }

    /// CPU plus the GPU served by `runtime`.
    pub fn with_runtime(runtime: Arc<OpenClRuntime>) -> Result<Self, ClError> {
        let mut allocators = AllocatorRegistry::with_cpu();
        let gpu: Arc<dyn Allocator> = Arc::new(OpenClAllocator::new(Arc::clone(&runtime)));
        allocators.register(DeviceType::Gpu, gpu)?;
        Ok(Self { allocators, runtime: Some(runtime) })
    }

    /// Build a runtime from `config`, falling back to CPU only when no
    /// OpenCL driver or GPU is present.
    pub fn open(config: RuntimeConfig) -> Result<Self, ClError> {
        match OpenClRuntime::new(config) {
            Ok(runtime) => Self::with_runtime(Arc::new(runtime)),
            Err(err @ (ClError::NotAvailable(_) | ClError::NoPlatform | ClError::NoGpuDevice)) => {
                tracing::info!("GPU unavailable, using CPU only: {}", err);
                Ok(Self::cpu())
            }
            Err(err) => Err(err),
        }
    }

    pub fn allocators(&self) -> &AllocatorRegistry {
        &self.allocators
    }

    pub fn allocator(&self, device: DeviceType) -> Result<Arc<dyn Allocator>, ClError> {
        Ok(self.allocators.get(device)?)
    }

    pub fn runtime(&self) -> Option<&Arc<OpenClRuntime>> {
        self.runtime.as_ref()
    }

    pub fn has_gpu(&self) -> bool {
        self.runtime.is_some()
    }

    /// Persist built programs, then release allocators before the runtime.
    pub fn shutdown(self) -> Result<(), ClError> {
        let Self { allocators, runtime } = self;
        let saved = match &runtime {
            Some(runtime) => runtime.save_built_programs(),
            None => Ok(()),
        };
        drop(allocators);
        drop(runtime);
        saved
    }
}
