//! Device memory allocator backed by OpenCL buffers and images.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use nnrt_core::{
    Allocator, CoreError, DType, DeviceType, ImageBlock, ImagePitch, ImageShape, MemoryBlock,
};

use crate::api::{ImageChannelType, RawMem};
use crate::runtime::OpenClRuntime;

type CoreResult<T> = nnrt_core::Result<T>;

/// Allocates `cl_mem` objects in the runtime's context.
///
/// Block pointers are the `cl_mem` handles themselves; host access always
/// goes through [`Allocator::map`].
pub struct OpenClAllocator {
    runtime: Arc<OpenClRuntime>,
}

impl OpenClAllocator {
    pub fn new(runtime: Arc<OpenClRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<OpenClRuntime> {
        &self.runtime
    }

    fn channel_type(dtype: DType) -> CoreResult<ImageChannelType> {
        match dtype {
            DType::F32 => Ok(ImageChannelType::Float),
            DType::F16 => Ok(ImageChannelType::HalfFloat),
            other => {
                tracing::error!("image data type {} is not supported", other);
                Err(CoreError::UnsupportedImageType(other))
            }
        }
    }

    fn handle(mem: RawMem, nbytes: usize) -> CoreResult<NonNull<c_void>> {
        NonNull::new(mem.as_ptr()).ok_or(CoreError::AllocationFailed { device: DeviceType::Gpu, nbytes })
    }
}

impl fmt::Debug for OpenClAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClAllocator")
            .field("device", &self.runtime.device_info().name)
            .finish()
    }
}

impl Allocator for OpenClAllocator {
    fn device_type(&self) -> DeviceType {
        DeviceType::Gpu
    }

    fn allocate(&self, nbytes: usize) -> CoreResult<MemoryBlock> {
        tracing::trace!("allocate gpu buffer: {} bytes", nbytes);
        // Zero-sized cl_mem objects are invalid; back them with one byte.
        let mem = self
            .runtime
            .api()
            .create_buffer(self.runtime.context(), nbytes.max(1))
            .map_err(|err| {
                tracing::error!("allocate gpu buffer of {} bytes: {}", nbytes, err);
                CoreError::AllocationFailed { device: DeviceType::Gpu, nbytes }
            })?;
        let ptr = Self::handle(mem, nbytes)?;
        Ok(unsafe { MemoryBlock::from_raw_parts(ptr, nbytes) })
    }

    fn allocate_image(&self, shape: ImageShape, dtype: DType) -> CoreResult<ImageBlock> {
        tracing::trace!("allocate gpu image: {}x{} {}", shape.width, shape.height, dtype);
        let channel = Self::channel_type(dtype)?;
        let nbytes = shape
            .width
            .saturating_mul(shape.height)
            .saturating_mul(4 * dtype.element_size());
        let mem = self
            .runtime
            .api()
            .create_image_2d(self.runtime.context(), channel, shape.width, shape.height)
            .map_err(|err| {
                tracing::error!("allocate gpu image {}x{}: {}", shape.width, shape.height, err);
                CoreError::AllocationFailed { device: DeviceType::Gpu, nbytes }
            })?;
        let ptr = Self::handle(mem, nbytes)?;
        Ok(unsafe { ImageBlock::from_raw_parts(ptr, shape, dtype) })
    }

    unsafe fn deallocate(&self, block: MemoryBlock) {
        tracing::trace!("free gpu buffer: {} bytes", block.nbytes());
        self.runtime.api().release_mem(RawMem::from_ptr(block.as_ptr().as_ptr()));
    }

    unsafe fn deallocate_image(&self, image: ImageBlock) -> CoreResult<()> {
        tracing::trace!("free gpu image");
        self.runtime.api().release_mem(RawMem::from_ptr(image.as_ptr().as_ptr()));
        Ok(())
    }

    fn map(&self, block: &MemoryBlock, offset: usize, nbytes: usize) -> CoreResult<NonNull<c_void>> {
        let in_range = offset
            .checked_add(nbytes)
            .is_some_and(|end| end <= block.nbytes());
        if !in_range {
            return Err(CoreError::MapOutOfRange { offset, nbytes, capacity: block.nbytes() });
        }
        let mapped = self.runtime.api().map_buffer(
            self.runtime.queue(),
            RawMem::from_ptr(block.as_ptr().as_ptr()),
            offset,
            nbytes,
        )?;
        Ok(mapped)
    }

    fn map_image(&self, image: &ImageBlock) -> CoreResult<(NonNull<c_void>, ImagePitch)> {
        let shape = image.shape();
        let mapped = self.runtime.api().map_image(
            self.runtime.queue(),
            RawMem::from_ptr(image.as_ptr().as_ptr()),
            shape.width,
            shape.height,
        )?;
        Ok((
            mapped.ptr,
            ImagePitch { row_pitch: mapped.row_pitch, slice_pitch: mapped.slice_pitch },
        ))
    }

    fn unmap(&self, memory: NonNull<c_void>, mapped: NonNull<c_void>) -> CoreResult<()> {
        let api = self.runtime.api();
        api.unmap(self.runtime.queue(), RawMem::from_ptr(memory.as_ptr()), mapped)?;
        api.finish(self.runtime.queue())?;
        Ok(())
    }

    fn on_host(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type() {
        assert_eq!(OpenClAllocator::channel_type(DType::F32).unwrap(), ImageChannelType::Float);
        assert_eq!(OpenClAllocator::channel_type(DType::F16).unwrap(), ImageChannelType::HalfFloat);
        for dtype in [DType::BF16, DType::F64, DType::I8, DType::U8, DType::I32, DType::I64] {
            let err = OpenClAllocator::channel_type(dtype).unwrap_err();
            assert!(matches!(err, CoreError::UnsupportedImageType(d) if d == dtype));
            assert!(err.is_fatal());
        }
    }
}
