//! The native OpenCL surface the runtime and allocator depend on.
//!
//! [`ComputeApi`] is implemented by the runtime-loaded driver in
//! [`crate::ffi`]; tests substitute a recording implementation.

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::ClError;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// Stored as `usize` so handles satisfy `Send`/`Sync`; the driver
        /// objects they name are internally synchronised.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub usize);

        impl $name {
            pub fn as_ptr(self) -> *mut c_void {
                self.0 as *mut c_void
            }

            pub fn from_ptr(ptr: *mut c_void) -> Self {
                Self(ptr as usize)
            }
        }
    };
}

native_handle!(/// `cl_platform_id`
    PlatformId);
native_handle!(/// `cl_device_id`
    DeviceId);
native_handle!(/// `cl_context`
    RawContext);
native_handle!(/// `cl_command_queue`
    RawQueue);
native_handle!(/// `cl_program`
    RawProgram);
native_handle!(/// `cl_kernel`
    RawKernel);
native_handle!(/// `cl_mem`
    RawMem);
native_handle!(/// `cl_event`
    RawEvent);

/// Identification strings of a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub profile: String,
    pub version: String,
}

/// Static properties of a device, queried once at selection time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    /// `CL_DEVICE_VERSION`, e.g. `"OpenCL 2.0 Adreno(TM) 640"`.
    pub version: String,
    pub global_mem_cache_size: u64,
    pub compute_units: u32,
    pub max_work_group_size: u64,
}

/// `cl_context_properties` pairs passed at context creation, e.g. vendor
/// perf hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextProperties {
    pub hints: Vec<(isize, isize)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueProperties {
    pub profiling: bool,
}

/// Work-group queries on a built kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelWorkGroupParam {
    /// `CL_KERNEL_WORK_GROUP_SIZE`
    MaxSize,
    /// `CL_KERNEL_PREFERRED_WORK_GROUP_SIZE_MULTIPLE`
    PreferredMultiple,
    /// `CL_KERNEL_WAVE_SIZE_QCOM`
    WaveSizeQcom,
}

/// Device timestamps of one command, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventTimestamps {
    pub queued_ns: u64,
    pub submit_ns: u64,
    pub start_ns: u64,
    pub end_ns: u64,
}

/// Channel data type of an RGBA image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageChannelType {
    Float,
    HalfFloat,
}

/// A kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    Mem(RawMem),
    /// Raw bytes of a scalar or struct argument.
    Bytes(&'a [u8]),
    /// `__local` memory of the given size.
    Local(usize),
}

/// Mapped image pointer plus its pitches.
#[derive(Debug, Clone, Copy)]
pub struct MappedImage {
    pub ptr: NonNull<c_void>,
    pub row_pitch: usize,
    pub slice_pitch: usize,
}

/// Every native call the runtime makes.
///
/// Release methods are best effort: teardown never fails.
pub trait ComputeApi: Send + Sync {
    fn platform_ids(&self) -> Result<Vec<PlatformId>, ClError>;
    fn platform_info(&self, platform: PlatformId) -> Result<PlatformInfo, ClError>;
    /// GPU-class devices of `platform`; an empty list when there are none.
    fn gpu_device_ids(&self, platform: PlatformId) -> Result<Vec<DeviceId>, ClError>;
    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo, ClError>;

    fn create_context(&self, device: DeviceId, properties: &ContextProperties) -> Result<RawContext, ClError>;
    fn create_command_queue(
        &self,
        context: RawContext,
        device: DeviceId,
        properties: &QueueProperties,
    ) -> Result<RawQueue, ClError>;
    fn finish(&self, queue: RawQueue) -> Result<(), ClError>;

    fn create_program_with_source(&self, context: RawContext, source: &str) -> Result<RawProgram, ClError>;
    fn create_program_with_binary(
        &self,
        context: RawContext,
        device: DeviceId,
        binary: &[u8],
    ) -> Result<RawProgram, ClError>;
    /// Build for `device`. Failures carry the build log in
    /// [`ClError::BuildFailed`].
    fn build_program(&self, program: RawProgram, device: DeviceId, options: &str) -> Result<(), ClError>;
    /// Device binary of a built single-device program.
    fn program_binary(&self, program: RawProgram) -> Result<Vec<u8>, ClError>;

    fn create_kernel(&self, program: RawProgram, name: &str) -> Result<RawKernel, ClError>;
    fn kernel_work_group_info(
        &self,
        kernel: RawKernel,
        device: DeviceId,
        param: KernelWorkGroupParam,
    ) -> Result<u64, ClError>;
    fn set_kernel_arg(&self, kernel: RawKernel, index: u32, arg: KernelArg<'_>) -> Result<(), ClError>;
    fn enqueue_nd_range(
        &self,
        queue: RawQueue,
        kernel: RawKernel,
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<RawEvent, ClError>;

    fn wait_for_event(&self, event: RawEvent) -> Result<(), ClError>;
    fn event_timestamps(&self, event: RawEvent) -> Result<EventTimestamps, ClError>;

    fn create_buffer(&self, context: RawContext, nbytes: usize) -> Result<RawMem, ClError>;
    fn create_image_2d(
        &self,
        context: RawContext,
        channel_type: ImageChannelType,
        width: usize,
        height: usize,
    ) -> Result<RawMem, ClError>;
    fn map_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        offset: usize,
        nbytes: usize,
    ) -> Result<NonNull<c_void>, ClError>;
    fn map_image(
        &self,
        queue: RawQueue,
        mem: RawMem,
        width: usize,
        height: usize,
    ) -> Result<MappedImage, ClError>;
    fn unmap(&self, queue: RawQueue, mem: RawMem, mapped: NonNull<c_void>) -> Result<(), ClError>;

    fn release_mem(&self, mem: RawMem);
    fn release_event(&self, event: RawEvent);
    fn release_kernel(&self, kernel: RawKernel);
    fn release_program(&self, program: RawProgram);
    fn release_queue(&self, queue: RawQueue);
    fn release_context(&self, context: RawContext);
}
