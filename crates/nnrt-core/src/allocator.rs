//! Device-independent memory allocation.
//!
//! Tensor code asks the [`AllocatorRegistry`](crate::AllocatorRegistry) for the
//! allocator of its target device and then allocates, maps and frees through
//! the [`Allocator`] trait without knowing what backs the memory.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::{CoreError, DType, DeviceType, Result};

/// Alignment of host allocations, in bytes.
#[cfg(target_arch = "hexagon")]
pub const ALIGNMENT: usize = 128;

/// Alignment of host allocations, in bytes (128-bit NEON lanes).
#[cfg(all(not(target_arch = "hexagon"), any(target_os = "android", target_os = "ios")))]
pub const ALIGNMENT: usize = 16;

/// Alignment of host allocations, in bytes (256-bit AVX lanes).
#[cfg(all(not(target_arch = "hexagon"), not(any(target_os = "android", target_os = "ios"))))]
pub const ALIGNMENT: usize = 32;

/// A linear buffer handed out by an [`Allocator`].
///
/// For host allocators `ptr` is the data itself; for device allocators it is
/// an opaque native handle that must be mapped before host access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    ptr: NonNull<c_void>,
    nbytes: usize,
}

// The block is a plain address/size pair; synchronisation of the memory it
// names is the caller's job (one stream per device).
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

impl MemoryBlock {
    /// Wrap an allocation produced by an allocator implementation.
    ///
    /// # Safety
    /// `ptr` must name a live allocation of at least `nbytes` bytes owned by
    /// the allocator that will later free this block.
    pub unsafe fn from_raw_parts(ptr: NonNull<c_void>, nbytes: usize) -> Self {
        Self { ptr, nbytes }
    }

    pub fn as_ptr(&self) -> NonNull<c_void> {
        self.ptr
    }

    /// Requested size in bytes.
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }
}

/// Width/height of a 2D image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageShape {
    pub width: usize,
    pub height: usize,
}

impl ImageShape {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

/// Device image memory with 2D addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBlock {
    ptr: NonNull<c_void>,
    shape: ImageShape,
    dtype: DType,
}

unsafe impl Send for ImageBlock {}
unsafe impl Sync for ImageBlock {}

impl ImageBlock {
    /// Wrap an image produced by an allocator implementation.
    ///
    /// # Safety
    /// `ptr` must be a live image handle owned by the allocator that will
    /// later free this block.
    pub unsafe fn from_raw_parts(ptr: NonNull<c_void>, shape: ImageShape, dtype: DType) -> Self {
        Self { ptr, shape, dtype }
    }

    pub fn as_ptr(&self) -> NonNull<c_void> {
        self.ptr
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

/// Row and slice pitch of a mapped image, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImagePitch {
    pub row_pitch: usize,
    pub slice_pitch: usize,
}

/// Allocates, maps and frees memory for one device family.
///
/// Implementations hold no per-call mutable state and can be shared across
/// threads; callers serialise allocation traffic per device stream.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Device family this allocator serves.
    fn device_type(&self) -> DeviceType;

    /// Allocate a zero-initialised buffer of at least `nbytes`.
    fn allocate(&self, nbytes: usize) -> Result<MemoryBlock>;

    /// Allocate 2D image memory. Unsupported allocators return a fatal error.
    fn allocate_image(&self, shape: ImageShape, dtype: DType) -> Result<ImageBlock>;

    /// Release a buffer.
    ///
    /// # Safety
    /// `block` must have been returned by `allocate` on this same allocator
    /// and must not be used afterwards.
    unsafe fn deallocate(&self, block: MemoryBlock);

    /// Release an image.
    ///
    /// # Safety
    /// `image` must have been returned by `allocate_image` on this same
    /// allocator and must not be used afterwards.
    unsafe fn deallocate_image(&self, image: ImageBlock) -> Result<()>;

    /// Make `nbytes` starting at `offset` addressable from the host.
    fn map(&self, block: &MemoryBlock, offset: usize, nbytes: usize) -> Result<NonNull<c_void>>;

    /// Make a whole image addressable from the host.
    fn map_image(&self, image: &ImageBlock) -> Result<(NonNull<c_void>, ImagePitch)>;

    /// Undo a `map`/`map_image`. `memory` is the block or image handle.
    fn unmap(&self, memory: NonNull<c_void>, mapped: NonNull<c_void>) -> Result<()>;

    /// Whether memory from this allocator is directly host-addressable.
    fn on_host(&self) -> bool;
}

impl dyn Allocator {
    /// Allocate room for `num_elements` values of `T`.
    ///
    /// Returns `Ok(None)` when the byte count would overflow `usize`, so the
    /// caller can reject the request without treating it as a defect.
    pub fn allocate_elements<T>(&self, num_elements: usize) -> Result<Option<MemoryBlock>> {
        match num_elements.checked_mul(std::mem::size_of::<T>()) {
            Some(nbytes) => self.allocate(nbytes).map(Some),
            None => Ok(None),
        }
    }
}

/// Aligned, zero-filled host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuAllocator;

impl CpuAllocator {
    pub fn new() -> Self {
        Self
    }

    fn layout(nbytes: usize) -> Result<Layout> {
        Layout::from_size_align(nbytes, ALIGNMENT).map_err(|_| CoreError::AllocationFailed {
            device: DeviceType::Cpu,
            nbytes,
        })
    }
}

impl Allocator for CpuAllocator {
    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn allocate(&self, nbytes: usize) -> Result<MemoryBlock> {
        tracing::trace!("allocate cpu buffer: {} bytes", nbytes);
        if nbytes == 0 {
            // Zero-sized blocks never touch the heap; the address only has
            // to be aligned and non-null.
            let dangling = NonNull::new(ALIGNMENT as *mut c_void).ok_or(CoreError::AllocationFailed {
                device: DeviceType::Cpu,
                nbytes,
            })?;
            return Ok(unsafe { MemoryBlock::from_raw_parts(dangling, 0) });
        }

        let layout = Self::layout(nbytes)?;
        // Zero-filled so kernels never observe uninitialised memory.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw as *mut c_void).ok_or(CoreError::AllocationFailed {
            device: DeviceType::Cpu,
            nbytes,
        })?;
        Ok(unsafe { MemoryBlock::from_raw_parts(ptr, nbytes) })
    }

    fn allocate_image(&self, _shape: ImageShape, _dtype: DType) -> Result<ImageBlock> {
        tracing::error!("allocate cpu image");
        Err(CoreError::ImageUnsupported { device: DeviceType::Cpu, op: "allocate_image" })
    }

    unsafe fn deallocate(&self, block: MemoryBlock) {
        tracing::trace!("free cpu buffer: {} bytes", block.nbytes());
        if block.nbytes() == 0 {
            return;
        }
        if let Ok(layout) = Self::layout(block.nbytes()) {
            alloc::dealloc(block.as_ptr().as_ptr() as *mut u8, layout);
        }
    }

    unsafe fn deallocate_image(&self, _image: ImageBlock) -> Result<()> {
        tracing::error!("free cpu image");
        Err(CoreError::ImageUnsupported { device: DeviceType::Cpu, op: "deallocate_image" })
    }

    fn map(&self, block: &MemoryBlock, offset: usize, nbytes: usize) -> Result<NonNull<c_void>> {
        let in_range = offset
            .checked_add(nbytes)
            .is_some_and(|end| end <= block.nbytes());
        if !in_range {
            return Err(CoreError::MapOutOfRange { offset, nbytes, capacity: block.nbytes() });
        }
        // SAFETY: offset + nbytes lies within the allocation checked above.
        let ptr = unsafe { (block.as_ptr().as_ptr() as *mut u8).add(offset) };
        NonNull::new(ptr as *mut c_void).ok_or(CoreError::MapOutOfRange {
            offset,
            nbytes,
            capacity: block.nbytes(),
        })
    }

    fn map_image(&self, _image: &ImageBlock) -> Result<(NonNull<c_void>, ImagePitch)> {
        tracing::error!("map cpu image");
        Err(CoreError::ImageUnsupported { device: DeviceType::Cpu, op: "map_image" })
    }

    fn unmap(&self, _memory: NonNull<c_void>, _mapped: NonNull<c_void>) -> Result<()> {
        Ok(())
    }

    fn on_host(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(block: &MemoryBlock) -> &[u8] {
        unsafe { std::slice::from_raw_parts(block.as_ptr().as_ptr() as *const u8, block.nbytes()) }
    }

    #[test]
    fn test_allocate_is_zeroed() {
        let alloc = CpuAllocator::new();
        let block = alloc.allocate(1000).unwrap();
        assert_eq!(block.nbytes(), 1000);
        assert!(bytes_of(&block).iter().all(|&b| b == 0));
        unsafe { alloc.deallocate(block) };
    }

    #[test]
    fn test_alignment() {
        let alloc = CpuAllocator::new();
        for n in [1, 3, 17, 255, 4096] {
            let block = alloc.allocate(n).unwrap();
            let addr = block.as_ptr().as_ptr() as usize;
            assert_eq!(addr % ALIGNMENT, 0, "{n}-byte buffer not aligned");
            unsafe { alloc.deallocate(block) };
        }
    }

    #[test]
    fn test_zero_sized() {
        let alloc = CpuAllocator::new();
        let block = alloc.allocate(0).unwrap();
        assert_eq!(block.nbytes(), 0);
        assert_eq!(block.as_ptr().as_ptr() as usize % ALIGNMENT, 0);
        unsafe { alloc.deallocate(block) };
    }

    #[test]
    fn test_image_ops_are_fatal() {
        let alloc = CpuAllocator::new();
        let err = alloc.allocate_image(ImageShape::new(4, 4), DType::F32).unwrap_err();
        assert!(matches!(err, CoreError::ImageUnsupported { op: "allocate_image", .. }));
        assert!(err.is_fatal());

        let fake = unsafe {
            ImageBlock::from_raw_parts(NonNull::dangling(), ImageShape::new(1, 1), DType::F32)
        };
        let err = unsafe { alloc.deallocate_image(fake) }.unwrap_err();
        assert!(err.is_fatal());
        assert!(alloc.map_image(&fake).unwrap_err().is_fatal());
    }

    #[test]
    fn test_map_is_pointer_offset() {
        let alloc = CpuAllocator::new();
        let block = alloc.allocate(64).unwrap();
        let mapped = alloc.map(&block, 16, 32).unwrap();
        assert_eq!(mapped.as_ptr() as usize, block.as_ptr().as_ptr() as usize + 16);
        alloc.unmap(block.as_ptr(), mapped).unwrap();
        assert!(alloc.map(&block, 48, 32).is_err());
        assert!(alloc.map(&block, usize::MAX, 2).is_err());
        unsafe { alloc.deallocate(block) };
    }

    #[test]
    fn test_on_host() {
        assert!(CpuAllocator::new().on_host());
        assert_eq!(CpuAllocator::new().device_type(), DeviceType::Cpu);
    }

    #[test]
    fn test_allocate_elements() {
        let alloc: &dyn Allocator = &CpuAllocator::new();
        let block = alloc.allocate_elements::<f32>(10).unwrap().unwrap();
        assert_eq!(block.nbytes(), 40);
        unsafe { alloc.deallocate(block) };
    }

    #[test]
    fn test_allocate_elements_overflow() {
        let alloc: &dyn Allocator = &CpuAllocator::new();
        assert!(alloc.allocate_elements::<f32>(usize::MAX).unwrap().is_none());
        assert!(alloc.allocate_elements::<u64>(usize::MAX / 4).unwrap().is_none());
    }

    #[test]
    fn test_oversized_request_fails() {
        let alloc = CpuAllocator::new();
        let err = alloc.allocate(usize::MAX - 8).unwrap_err();
        assert!(matches!(err, CoreError::AllocationFailed { .. }));
    }
}
