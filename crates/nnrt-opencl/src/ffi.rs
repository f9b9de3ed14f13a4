//! Runtime-loaded OpenCL function pointers via dlopen.
//!
//! No build-time OpenCL dependency: the vendor ICD or driver library is
//! probed at runtime, which is the only option on Android where the library
//! lives under vendor paths.

use std::ffi::{c_char, c_void, CString};
use std::path::Path;
use std::ptr::NonNull;

use libloading::Library;

use crate::api::{
    ComputeApi, DeviceId, DeviceInfo, EventTimestamps, ImageChannelType, KernelArg,
    ContextProperties, KernelWorkGroupParam, MappedImage, PlatformId, PlatformInfo, QueueProperties, RawContext,
    RawEvent, RawKernel, RawMem, RawProgram, RawQueue,
};
use crate::error::{check_cl, ClError, CL_SUCCESS};

// ---------------------------------------------------------------------------
// OpenCL types and constants
// ---------------------------------------------------------------------------

pub type ClInt = i32;
pub type ClUint = u32;
pub type ClBitfield = u64;
pub type Handle = *mut c_void;

const CL_TRUE: ClUint = 1;

const CL_PLATFORM_PROFILE: ClUint = 0x0900;
const CL_PLATFORM_VERSION: ClUint = 0x0901;
const CL_PLATFORM_NAME: ClUint = 0x0902;
const CL_PLATFORM_VENDOR: ClUint = 0x0903;

const CL_DEVICE_TYPE_GPU: ClBitfield = 1 << 2;
const CL_DEVICE_NOT_FOUND: ClInt = -1;
const CL_DEVICE_MAX_COMPUTE_UNITS: ClUint = 0x1002;
const CL_DEVICE_MAX_WORK_GROUP_SIZE: ClUint = 0x1004;
const CL_DEVICE_GLOBAL_MEM_CACHE_SIZE: ClUint = 0x101E;
const CL_DEVICE_NAME: ClUint = 0x102B;
const CL_DEVICE_VENDOR: ClUint = 0x102C;
const CL_DEVICE_VERSION: ClUint = 0x102F;

const CL_QUEUE_PROFILING_ENABLE: ClBitfield = 1 << 1;
const CL_QUEUE_PROPERTIES: u64 = 0x1093;

const CL_PROGRAM_BINARY_SIZES: ClUint = 0x1165;
const CL_PROGRAM_BINARIES: ClUint = 0x1166;
const CL_PROGRAM_BUILD_LOG: ClUint = 0x1183;

const CL_KERNEL_WORK_GROUP_SIZE: ClUint = 0x11B0;
const CL_KERNEL_PREFERRED_WORK_GROUP_SIZE_MULTIPLE: ClUint = 0x11B3;
const CL_KERNEL_WAVE_SIZE_QCOM: ClUint = 0xAA02;

const CL_PROFILING_COMMAND_QUEUED: ClUint = 0x1280;
const CL_PROFILING_COMMAND_SUBMIT: ClUint = 0x1281;
const CL_PROFILING_COMMAND_START: ClUint = 0x1282;
const CL_PROFILING_COMMAND_END: ClUint = 0x1283;

const CL_MEM_READ_WRITE: ClBitfield = 1 << 0;
const CL_MEM_ALLOC_HOST_PTR: ClBitfield = 1 << 4;
const CL_MAP_READ: ClBitfield = 1 << 0;
const CL_MAP_WRITE: ClBitfield = 1 << 1;

const CL_RGBA: ClUint = 0x10B5;
const CL_HALF_FLOAT: ClUint = 0x10DD;
const CL_FLOAT: ClUint = 0x10DE;
const CL_MEM_OBJECT_IMAGE2D: ClUint = 0x10F1;

#[repr(C)]
struct ClImageFormat {
    channel_order: ClUint,
    channel_data_type: ClUint,
}

#[repr(C)]
struct ClImageDesc {
    image_type: ClUint,
    image_width: usize,
    image_height: usize,
    image_depth: usize,
    image_array_size: usize,
    image_row_pitch: usize,
    image_slice_pitch: usize,
    num_mip_levels: ClUint,
    num_samples: ClUint,
    buffer: Handle,
}

// ---------------------------------------------------------------------------
// OpenCL API function signatures
// ---------------------------------------------------------------------------

type InfoFn = unsafe extern "C" fn(Handle, ClUint, usize, *mut c_void, *mut usize) -> ClInt;
type FnGetPlatformIds = unsafe extern "C" fn(ClUint, *mut Handle, *mut ClUint) -> ClInt;
type FnGetDeviceIds =
    unsafe extern "C" fn(Handle, ClBitfield, ClUint, *mut Handle, *mut ClUint) -> ClInt;
type FnCreateContext = unsafe extern "C" fn(
    *const isize,
    ClUint,
    *const Handle,
    Option<unsafe extern "C" fn(*const c_char, *const c_void, usize, *mut c_void)>,
    *mut c_void,
    *mut ClInt,
) -> Handle;
type FnCreateCommandQueue = unsafe extern "C" fn(Handle, Handle, ClBitfield, *mut ClInt) -> Handle;
type FnCreateCommandQueueWithProperties =
    unsafe extern "C" fn(Handle, Handle, *const u64, *mut ClInt) -> Handle;
type FnHandleOnly = unsafe extern "C" fn(Handle) -> ClInt;
type FnCreateProgramWithSource = unsafe extern "C" fn(
    Handle,
    ClUint,
    *const *const c_char,
    *const usize,
    *mut ClInt,
) -> Handle;
type FnCreateProgramWithBinary = unsafe extern "C" fn(
    Handle,
    ClUint,
    *const Handle,
    *const usize,
    *const *const u8,
    *mut ClInt,
    *mut ClInt,
) -> Handle;
type FnBuildProgram = unsafe extern "C" fn(
    Handle,
    ClUint,
    *const Handle,
    *const c_char,
    Option<unsafe extern "C" fn(Handle, *mut c_void)>,
    *mut c_void,
) -> ClInt;
type FnGetProgramBuildInfo =
    unsafe extern "C" fn(Handle, Handle, ClUint, usize, *mut c_void, *mut usize) -> ClInt;
type FnCreateKernel = unsafe extern "C" fn(Handle, *const c_char, *mut ClInt) -> Handle;
type FnGetKernelWorkGroupInfo =
    unsafe extern "C" fn(Handle, Handle, ClUint, usize, *mut c_void, *mut usize) -> ClInt;
type FnSetKernelArg = unsafe extern "C" fn(Handle, ClUint, usize, *const c_void) -> ClInt;
type FnEnqueueNdRangeKernel = unsafe extern "C" fn(
    Handle,
    Handle,
    ClUint,
    *const usize,
    *const usize,
    *const usize,
    ClUint,
    *const Handle,
    *mut Handle,
) -> ClInt;
type FnWaitForEvents = unsafe extern "C" fn(ClUint, *const Handle) -> ClInt;
type FnCreateBuffer =
    unsafe extern "C" fn(Handle, ClBitfield, usize, *mut c_void, *mut ClInt) -> Handle;
type FnCreateImage = unsafe extern "C" fn(
    Handle,
    ClBitfield,
    *const ClImageFormat,
    *const ClImageDesc,
    *mut c_void,
    *mut ClInt,
) -> Handle;
type FnEnqueueMapBuffer = unsafe extern "C" fn(
    Handle,
    Handle,
    ClUint,
    ClBitfield,
    usize,
    usize,
    ClUint,
    *const Handle,
    *mut Handle,
    *mut ClInt,
) -> *mut c_void;
type FnEnqueueMapImage = unsafe extern "C" fn(
    Handle,
    Handle,
    ClUint,
    ClBitfield,
    *const usize,
    *const usize,
    *mut usize,
    *mut usize,
    ClUint,
    *const Handle,
    *mut Handle,
    *mut ClInt,
) -> *mut c_void;
type FnEnqueueUnmapMemObject =
    unsafe extern "C" fn(Handle, Handle, *mut c_void, ClUint, *const Handle, *mut Handle) -> ClInt;

// ---------------------------------------------------------------------------
// Loaded API struct
// ---------------------------------------------------------------------------

struct ClFns {
    get_platform_ids: FnGetPlatformIds,
    get_platform_info: InfoFn,
    get_device_ids: FnGetDeviceIds,
    get_device_info: InfoFn,
    create_context: FnCreateContext,
    release_context: FnHandleOnly,
    create_command_queue: FnCreateCommandQueue,
    create_command_queue_with_properties: Option<FnCreateCommandQueueWithProperties>,
    release_command_queue: FnHandleOnly,
    finish: FnHandleOnly,
    create_program_with_source: FnCreateProgramWithSource,
    create_program_with_binary: FnCreateProgramWithBinary,
    build_program: FnBuildProgram,
    get_program_build_info: FnGetProgramBuildInfo,
    get_program_info: InfoFn,
    release_program: FnHandleOnly,
    create_kernel: FnCreateKernel,
    get_kernel_work_group_info: FnGetKernelWorkGroupInfo,
    set_kernel_arg: FnSetKernelArg,
    release_kernel: FnHandleOnly,
    enqueue_nd_range_kernel: FnEnqueueNdRangeKernel,
    wait_for_events: FnWaitForEvents,
    get_event_profiling_info: InfoFn,
    release_event: FnHandleOnly,
    create_buffer: FnCreateBuffer,
    create_image: FnCreateImage,
    enqueue_map_buffer: FnEnqueueMapBuffer,
    enqueue_map_image: FnEnqueueMapImage,
    enqueue_unmap_mem_object: FnEnqueueUnmapMemObject,
    release_mem_object: FnHandleOnly,
}

/// The OpenCL driver library and its resolved entry points.
///
/// Objects created through it must be released before it is dropped; the
/// runtime guarantees that by holding it behind an `Arc` shared by every
/// wrapper that owns a native handle.
pub struct OpenClLibrary {
    fns: ClFns,
    path: String,
    _lib: Library,
}

// Safety: OpenCL entry points are thread-safe per the Khronos API (except
// clSetKernelArg on the same kernel, which callers serialise per kernel).
unsafe impl Send for OpenClLibrary {}
unsafe impl Sync for OpenClLibrary {}

/// Library names probed in order when no explicit path is given.
pub const LIBRARY_CANDIDATES: &[&str] = &[
    "libOpenCL.so",
    "libOpenCL.so.1",
    "/system/vendor/lib64/libOpenCL.so",
    "/system/lib64/libOpenCL.so",
    "/system/vendor/lib/libOpenCL.so",
    "/system/lib/libOpenCL.so",
    "/system/vendor/lib64/egl/libGLES_mali.so",
    "/system/lib64/egl/libGLES_mali.so",
    "/system/vendor/lib/egl/libGLES_mali.so",
    "/system/lib/egl/libGLES_mali.so",
    "/system/vendor/lib64/libPVROCL.so",
    "/system/vendor/lib/libPVROCL.so",
    "/System/Library/Frameworks/OpenCL.framework/OpenCL",
    "OpenCL.dll",
];

impl OpenClLibrary {
    /// Load `explicit` if given, otherwise the first loadable candidate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ClError> {
        if let Some(path) = explicit {
            let lib = unsafe { Library::new(path) }.map_err(|err| {
                ClError::NotAvailable(format!("{}: {err}", path.display()))
            })?;
            return Self::from_library(lib, path.display().to_string());
        }

        for candidate in LIBRARY_CANDIDATES {
            // SAFETY: probing only; no symbol is invoked before resolution.
            if let Ok(lib) = unsafe { Library::new(candidate) } {
                tracing::debug!("loaded OpenCL library {}", candidate);
                return Self::from_library(lib, candidate.to_string());
            }
        }
        Err(ClError::NotAvailable(format!(
            "tried {}",
            LIBRARY_CANDIDATES.join(", ")
        )))
    }

    /// Path or name the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn from_library(lib: Library, path: String) -> Result<Self, ClError> {
        // SAFETY: symbol types match the OpenCL 1.2/2.0 C API.
        let fns = unsafe {
            ClFns {
                get_platform_ids: load_symbol(&lib, b"clGetPlatformIDs\0")?,
                get_platform_info: load_symbol(&lib, b"clGetPlatformInfo\0")?,
                get_device_ids: load_symbol(&lib, b"clGetDeviceIDs\0")?,
                get_device_info: load_symbol(&lib, b"clGetDeviceInfo\0")?,
                create_context: load_symbol(&lib, b"clCreateContext\0")?,
                release_context: load_symbol(&lib, b"clReleaseContext\0")?,
                create_command_queue: load_symbol(&lib, b"clCreateCommandQueue\0")?,
                create_command_queue_with_properties: lib
                    .get::<FnCreateCommandQueueWithProperties>(b"clCreateCommandQueueWithProperties\0")
                    .ok()
                    .map(|sym| *sym),
                release_command_queue: load_symbol(&lib, b"clReleaseCommandQueue\0")?,
                finish: load_symbol(&lib, b"clFinish\0")?,
                create_program_with_source: load_symbol(&lib, b"clCreateProgramWithSource\0")?,
                create_program_with_binary: load_symbol(&lib, b"clCreateProgramWithBinary\0")?,
                build_program: load_symbol(&lib, b"clBuildProgram\0")?,
                get_program_build_info: load_symbol(&lib, b"clGetProgramBuildInfo\0")?,
                get_program_info: load_symbol(&lib, b"clGetProgramInfo\0")?,
                release_program: load_symbol(&lib, b"clReleaseProgram\0")?,
                create_kernel: load_symbol(&lib, b"clCreateKernel\0")?,
                get_kernel_work_group_info: load_symbol(&lib, b"clGetKernelWorkGroupInfo\0")?,
                set_kernel_arg: load_symbol(&lib, b"clSetKernelArg\0")?,
                release_kernel: load_symbol(&lib, b"clReleaseKernel\0")?,
                enqueue_nd_range_kernel: load_symbol(&lib, b"clEnqueueNDRangeKernel\0")?,
                wait_for_events: load_symbol(&lib, b"clWaitForEvents\0")?,
                get_event_profiling_info: load_symbol(&lib, b"clGetEventProfilingInfo\0")?,
                release_event: load_symbol(&lib, b"clReleaseEvent\0")?,
                create_buffer: load_symbol(&lib, b"clCreateBuffer\0")?,
                create_image: load_symbol(&lib, b"clCreateImage\0")?,
                enqueue_map_buffer: load_symbol(&lib, b"clEnqueueMapBuffer\0")?,
                enqueue_map_image: load_symbol(&lib, b"clEnqueueMapImage\0")?,
                enqueue_unmap_mem_object: load_symbol(&lib, b"clEnqueueUnmapMemObject\0")?,
                release_mem_object: load_symbol(&lib, b"clReleaseMemObject\0")?,
            }
        };
        Ok(Self { fns, path, _lib: lib })
    }

    fn info_string(&self, f: InfoFn, handle: Handle, param: ClUint, op: &'static str) -> Result<String, ClError> {
        let bytes = self.info_bytes(f, handle, param, op)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).trim().to_string())
    }

    fn info_bytes(&self, f: InfoFn, handle: Handle, param: ClUint, op: &'static str) -> Result<Vec<u8>, ClError> {
        let mut size = 0usize;
        // SAFETY: size query with a null value pointer.
        check_cl(unsafe { f(handle, param, 0, std::ptr::null_mut(), &mut size) }, op)?;
        let mut buf = vec![0u8; size];
        if size > 0 {
            // SAFETY: `buf` holds exactly the size the driver reported.
            check_cl(
                unsafe { f(handle, param, size, buf.as_mut_ptr() as *mut c_void, std::ptr::null_mut()) },
                op,
            )?;
        }
        Ok(buf)
    }

    fn info_scalar<T: Copy + Default>(&self, f: InfoFn, handle: Handle, param: ClUint, op: &'static str) -> Result<T, ClError> {
        let mut value = T::default();
        // SAFETY: `value` is a properly sized out parameter for `param`.
        check_cl(
            unsafe {
                f(
                    handle,
                    param,
                    std::mem::size_of::<T>(),
                    &mut value as *mut T as *mut c_void,
                    std::ptr::null_mut(),
                )
            },
            op,
        )?;
        Ok(value)
    }

    fn build_log(&self, program: RawProgram, device: DeviceId) -> String {
        let mut size = 0usize;
        let get = self.fns.get_program_build_info;
        // SAFETY: size query, then a read into a buffer of the reported size.
        unsafe {
            if get(program.as_ptr(), device.as_ptr(), CL_PROGRAM_BUILD_LOG, 0, std::ptr::null_mut(), &mut size)
                != CL_SUCCESS
            {
                return String::new();
            }
            let mut buf = vec![0u8; size];
            if get(
                program.as_ptr(),
                device.as_ptr(),
                CL_PROGRAM_BUILD_LOG,
                size,
                buf.as_mut_ptr() as *mut c_void,
                std::ptr::null_mut(),
            ) != CL_SUCCESS
            {
                return String::new();
            }
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..end]).trim().to_string()
        }
    }
}

impl ComputeApi for OpenClLibrary {
    fn platform_ids(&self) -> Result<Vec<PlatformId>, ClError> {
        let mut count: ClUint = 0;
        let code = unsafe { (self.fns.get_platform_ids)(0, std::ptr::null_mut(), &mut count) };
        // Some ICD loaders report "no platform" through -1001 instead of a zero count.
        if code == -1001 || count == 0 {
            return Ok(Vec::new());
        }
        check_cl(code, "clGetPlatformIDs")?;
        let mut ids = vec![std::ptr::null_mut(); count as usize];
        check_cl(
            unsafe { (self.fns.get_platform_ids)(count, ids.as_mut_ptr(), std::ptr::null_mut()) },
            "clGetPlatformIDs",
        )?;
        Ok(ids.into_iter().map(PlatformId::from_ptr).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> Result<PlatformInfo, ClError> {
        let f = self.fns.get_platform_info;
        let p = platform.as_ptr();
        Ok(PlatformInfo {
            name: self.info_string(f, p, CL_PLATFORM_NAME, "clGetPlatformInfo")?,
            vendor: self.info_string(f, p, CL_PLATFORM_VENDOR, "clGetPlatformInfo")?,
            profile: self.info_string(f, p, CL_PLATFORM_PROFILE, "clGetPlatformInfo")?,
            version: self.info_string(f, p, CL_PLATFORM_VERSION, "clGetPlatformInfo")?,
        })
    }

    fn gpu_device_ids(&self, platform: PlatformId) -> Result<Vec<DeviceId>, ClError> {
        let mut count: ClUint = 0;
        let code = unsafe {
            (self.fns.get_device_ids)(platform.as_ptr(), CL_DEVICE_TYPE_GPU, 0, std::ptr::null_mut(), &mut count)
        };
        if code == CL_DEVICE_NOT_FOUND || count == 0 {
            return Ok(Vec::new());
        }
        check_cl(code, "clGetDeviceIDs")?;
        let mut ids = vec![std::ptr::null_mut(); count as usize];
        check_cl(
            unsafe {
                (self.fns.get_device_ids)(
                    platform.as_ptr(),
                    CL_DEVICE_TYPE_GPU,
                    count,
                    ids.as_mut_ptr(),
                    std::ptr::null_mut(),
                )
            },
            "clGetDeviceIDs",
        )?;
        Ok(ids.into_iter().map(DeviceId::from_ptr).collect())
    }

    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo, ClError> {
        let f = self.fns.get_device_info;
        let d = device.as_ptr();
        let op = "clGetDeviceInfo";
        Ok(DeviceInfo {
            name: self.info_string(f, d, CL_DEVICE_NAME, op)?,
            vendor: self.info_string(f, d, CL_DEVICE_VENDOR, op)?,
            version: self.info_string(f, d, CL_DEVICE_VERSION, op)?,
            global_mem_cache_size: self.info_scalar::<u64>(f, d, CL_DEVICE_GLOBAL_MEM_CACHE_SIZE, op)?,
            compute_units: self.info_scalar::<u32>(f, d, CL_DEVICE_MAX_COMPUTE_UNITS, op)?,
            max_work_group_size: self.info_scalar::<usize>(f, d, CL_DEVICE_MAX_WORK_GROUP_SIZE, op)? as u64,
        })
    }

    fn create_context(&self, device: DeviceId, properties: &ContextProperties) -> Result<RawContext, ClError> {
        let mut err: ClInt = 0;
        let devices = [device.as_ptr()];
        let mut props = Vec::with_capacity(properties.hints.len() * 2 + 1);
        for &(key, value) in &properties.hints {
            props.push(key);
            props.push(value);
        }
        props.push(0);
        let props_ptr = if properties.hints.is_empty() { std::ptr::null() } else { props.as_ptr() };
        let ctx = unsafe {
            (self.fns.create_context)(props_ptr, 1, devices.as_ptr(), None, std::ptr::null_mut(), &mut err)
        };
        check_cl(err, "clCreateContext")?;
        Ok(RawContext::from_ptr(ctx))
    }

    fn create_command_queue(
        &self,
        context: RawContext,
        device: DeviceId,
        properties: &QueueProperties,
    ) -> Result<RawQueue, ClError> {
        let flags = if properties.profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        let mut err: ClInt = 0;

        if let Some(create) = self.fns.create_command_queue_with_properties {
            let props = [CL_QUEUE_PROPERTIES, flags, 0];
            let queue = unsafe { create(context.as_ptr(), device.as_ptr(), props.as_ptr(), &mut err) };
            check_cl(err, "clCreateCommandQueueWithProperties")?;
            return Ok(RawQueue::from_ptr(queue));
        }

        let queue = unsafe { (self.fns.create_command_queue)(context.as_ptr(), device.as_ptr(), flags, &mut err) };
        check_cl(err, "clCreateCommandQueue")?;
        Ok(RawQueue::from_ptr(queue))
    }

    fn finish(&self, queue: RawQueue) -> Result<(), ClError> {
        check_cl(unsafe { (self.fns.finish)(queue.as_ptr()) }, "clFinish")
    }

    fn create_program_with_source(&self, context: RawContext, source: &str) -> Result<RawProgram, ClError> {
        let ptrs = [source.as_ptr() as *const c_char];
        let lens = [source.len()];
        let mut err: ClInt = 0;
        let program = unsafe {
            (self.fns.create_program_with_source)(context.as_ptr(), 1, ptrs.as_ptr(), lens.as_ptr(), &mut err)
        };
        check_cl(err, "clCreateProgramWithSource")?;
        Ok(RawProgram::from_ptr(program))
    }

    fn create_program_with_binary(
        &self,
        context: RawContext,
        device: DeviceId,
        binary: &[u8],
    ) -> Result<RawProgram, ClError> {
        let devices = [device.as_ptr()];
        let lens = [binary.len()];
        let bins = [binary.as_ptr()];
        let mut status: ClInt = 0;
        let mut err: ClInt = 0;
        let program = unsafe {
            (self.fns.create_program_with_binary)(
                context.as_ptr(),
                1,
                devices.as_ptr(),
                lens.as_ptr(),
                bins.as_ptr(),
                &mut status,
                &mut err,
            )
        };
        check_cl(err, "clCreateProgramWithBinary")?;
        if status != CL_SUCCESS {
            let program = RawProgram::from_ptr(program);
            self.release_program(program);
            return Err(ClError::Api { op: "clCreateProgramWithBinary", code: status });
        }
        Ok(RawProgram::from_ptr(program))
    }

    fn build_program(&self, program: RawProgram, device: DeviceId, options: &str) -> Result<(), ClError> {
        let c_options = CString::new(options).map_err(|_| ClError::BuildFailed {
            program: String::new(),
            log: "build options contain NUL byte".to_string(),
        })?;
        let devices = [device.as_ptr()];
        let code = unsafe {
            (self.fns.build_program)(program.as_ptr(), 1, devices.as_ptr(), c_options.as_ptr(), None, std::ptr::null_mut())
        };
        if code != CL_SUCCESS {
            let log = self.build_log(program, device);
            return Err(ClError::BuildFailed {
                program: String::new(),
                log: format!("{} ({code}): {log}", crate::error::cl_error_to_string(code)),
            });
        }
        Ok(())
    }

    fn program_binary(&self, program: RawProgram) -> Result<Vec<u8>, ClError> {
        let size: usize = self.info_scalar(self.fns.get_program_info, program.as_ptr(), CL_PROGRAM_BINARY_SIZES, "clGetProgramInfo")?;
        let mut binary = vec![0u8; size];
        let mut ptrs = [binary.as_mut_ptr()];
        check_cl(
            unsafe {
                (self.fns.get_program_info)(
                    program.as_ptr(),
                    CL_PROGRAM_BINARIES,
                    std::mem::size_of::<*mut u8>(),
                    ptrs.as_mut_ptr() as *mut c_void,
                    std::ptr::null_mut(),
                )
            },
            "clGetProgramInfo",
        )?;
        Ok(binary)
    }

    fn create_kernel(&self, program: RawProgram, name: &str) -> Result<RawKernel, ClError> {
        let c_name = CString::new(name).map_err(|_| ClError::KernelNotFound {
            program: String::new(),
            kernel: name.to_string(),
        })?;
        let mut err: ClInt = 0;
        let kernel = unsafe { (self.fns.create_kernel)(program.as_ptr(), c_name.as_ptr(), &mut err) };
        check_cl(err, "clCreateKernel")?;
        Ok(RawKernel::from_ptr(kernel))
    }

    fn kernel_work_group_info(
        &self,
        kernel: RawKernel,
        device: DeviceId,
        param: KernelWorkGroupParam,
    ) -> Result<u64, ClError> {
        let param = match param {
            KernelWorkGroupParam::MaxSize => CL_KERNEL_WORK_GROUP_SIZE,
            KernelWorkGroupParam::PreferredMultiple => CL_KERNEL_PREFERRED_WORK_GROUP_SIZE_MULTIPLE,
            KernelWorkGroupParam::WaveSizeQcom => CL_KERNEL_WAVE_SIZE_QCOM,
        };
        let mut value: usize = 0;
        check_cl(
            unsafe {
                (self.fns.get_kernel_work_group_info)(
                    kernel.as_ptr(),
                    device.as_ptr(),
                    param,
                    std::mem::size_of::<usize>(),
                    &mut value as *mut usize as *mut c_void,
                    std::ptr::null_mut(),
                )
            },
            "clGetKernelWorkGroupInfo",
        )?;
        Ok(value as u64)
    }

    fn set_kernel_arg(&self, kernel: RawKernel, index: u32, arg: KernelArg<'_>) -> Result<(), ClError> {
        let code = match arg {
            KernelArg::Mem(mem) => {
                let handle = mem.as_ptr();
                unsafe {
                    (self.fns.set_kernel_arg)(
                        kernel.as_ptr(),
                        index,
                        std::mem::size_of::<Handle>(),
                        &handle as *const Handle as *const c_void,
                    )
                }
            }
            KernelArg::Bytes(bytes) => unsafe {
                (self.fns.set_kernel_arg)(kernel.as_ptr(), index, bytes.len(), bytes.as_ptr() as *const c_void)
            },
            KernelArg::Local(size) => unsafe {
                (self.fns.set_kernel_arg)(kernel.as_ptr(), index, size, std::ptr::null())
            },
        };
        check_cl(code, "clSetKernelArg")
    }

    fn enqueue_nd_range(
        &self,
        queue: RawQueue,
        kernel: RawKernel,
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<RawEvent, ClError> {
        let mut event: Handle = std::ptr::null_mut();
        let local_ptr = local.map_or(std::ptr::null(), |l| l.as_ptr());
        check_cl(
            unsafe {
                (self.fns.enqueue_nd_range_kernel)(
                    queue.as_ptr(),
                    kernel.as_ptr(),
                    global.len() as ClUint,
                    std::ptr::null(),
                    global.as_ptr(),
                    local_ptr,
                    0,
                    std::ptr::null(),
                    &mut event,
                )
            },
            "clEnqueueNDRangeKernel",
        )?;
        Ok(RawEvent::from_ptr(event))
    }

    fn wait_for_event(&self, event: RawEvent) -> Result<(), ClError> {
        let events = [event.as_ptr()];
        check_cl(unsafe { (self.fns.wait_for_events)(1, events.as_ptr()) }, "clWaitForEvents")
    }

    fn event_timestamps(&self, event: RawEvent) -> Result<EventTimestamps, ClError> {
        let f = self.fns.get_event_profiling_info;
        let e = event.as_ptr();
        let op = "clGetEventProfilingInfo";
        Ok(EventTimestamps {
            queued_ns: self.info_scalar(f, e, CL_PROFILING_COMMAND_QUEUED, op)?,
            submit_ns: self.info_scalar(f, e, CL_PROFILING_COMMAND_SUBMIT, op)?,
            start_ns: self.info_scalar(f, e, CL_PROFILING_COMMAND_START, op)?,
            end_ns: self.info_scalar(f, e, CL_PROFILING_COMMAND_END, op)?,
        })
    }

    fn create_buffer(&self, context: RawContext, nbytes: usize) -> Result<RawMem, ClError> {
        let mut err: ClInt = 0;
        let mem = unsafe {
            (self.fns.create_buffer)(
                context.as_ptr(),
                CL_MEM_READ_WRITE | CL_MEM_ALLOC_HOST_PTR,
                nbytes,
                std::ptr::null_mut(),
                &mut err,
            )
        };
        check_cl(err, "clCreateBuffer")?;
        Ok(RawMem::from_ptr(mem))
    }

    fn create_image_2d(
        &self,
        context: RawContext,
        channel_type: ImageChannelType,
        width: usize,
        height: usize,
    ) -> Result<RawMem, ClError> {
        let format = ClImageFormat {
            channel_order: CL_RGBA,
            channel_data_type: match channel_type {
                ImageChannelType::Float => CL_FLOAT,
                ImageChannelType::HalfFloat => CL_HALF_FLOAT,
            },
        };
        let desc = ClImageDesc {
            image_type: CL_MEM_OBJECT_IMAGE2D,
            image_width: width,
            image_height: height,
            image_depth: 0,
            image_array_size: 0,
            image_row_pitch: 0,
            image_slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: std::ptr::null_mut(),
        };
        let mut err: ClInt = 0;
        let mem = unsafe {
            (self.fns.create_image)(
                context.as_ptr(),
                CL_MEM_READ_WRITE | CL_MEM_ALLOC_HOST_PTR,
                &format,
                &desc,
                std::ptr::null_mut(),
                &mut err,
            )
        };
        check_cl(err, "clCreateImage")?;
        Ok(RawMem::from_ptr(mem))
    }

    fn map_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        offset: usize,
        nbytes: usize,
    ) -> Result<NonNull<c_void>, ClError> {
        let mut err: ClInt = 0;
        let ptr = unsafe {
            (self.fns.enqueue_map_buffer)(
                queue.as_ptr(),
                mem.as_ptr(),
                CL_TRUE,
                CL_MAP_READ | CL_MAP_WRITE,
                offset,
                nbytes,
                0,
                std::ptr::null(),
                std::ptr::null_mut(),
                &mut err,
            )
        };
        check_cl(err, "clEnqueueMapBuffer")?;
        NonNull::new(ptr).ok_or(ClError::Api { op: "clEnqueueMapBuffer", code: -12 })
    }

    fn map_image(
        &self,
        queue: RawQueue,
        mem: RawMem,
        width: usize,
        height: usize,
    ) -> Result<MappedImage, ClError> {
        let origin = [0usize; 3];
        let region = [width, height, 1];
        let mut row_pitch = 0usize;
        let mut slice_pitch = 0usize;
        let mut err: ClInt = 0;
        let ptr = unsafe {
            (self.fns.enqueue_map_image)(
                queue.as_ptr(),
                mem.as_ptr(),
                CL_TRUE,
                CL_MAP_READ | CL_MAP_WRITE,
                origin.as_ptr(),
                region.as_ptr(),
                &mut row_pitch,
                &mut slice_pitch,
                0,
                std::ptr::null(),
                std::ptr::null_mut(),
                &mut err,
            )
        };
        check_cl(err, "clEnqueueMapImage")?;
        let ptr = NonNull::new(ptr).ok_or(ClError::Api { op: "clEnqueueMapImage", code: -12 })?;
        Ok(MappedImage { ptr, row_pitch, slice_pitch })
    }

    fn unmap(&self, queue: RawQueue, mem: RawMem, mapped: NonNull<c_void>) -> Result<(), ClError> {
        check_cl(
            unsafe {
                (self.fns.enqueue_unmap_mem_object)(
                    queue.as_ptr(),
                    mem.as_ptr(),
                    mapped.as_ptr(),
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                )
            },
            "clEnqueueUnmapMemObject",
        )
    }

    fn release_mem(&self, mem: RawMem) {
        let _ = unsafe { (self.fns.release_mem_object)(mem.as_ptr()) };
    }

    fn release_event(&self, event: RawEvent) {
        let _ = unsafe { (self.fns.release_event)(event.as_ptr()) };
    }

    fn release_kernel(&self, kernel: RawKernel) {
        let _ = unsafe { (self.fns.release_kernel)(kernel.as_ptr()) };
    }

    fn release_program(&self, program: RawProgram) {
        let _ = unsafe { (self.fns.release_program)(program.as_ptr()) };
    }

    fn release_queue(&self, queue: RawQueue) {
        let _ = unsafe { (self.fns.release_command_queue)(queue.as_ptr()) };
    }

    fn release_context(&self, context: RawContext) {
        let _ = unsafe { (self.fns.release_context)(context.as_ptr()) };
    }
}

// ---------------------------------------------------------------------------
// Symbol helpers
// ---------------------------------------------------------------------------

/// Resolve a required symbol.
///
/// # Safety
/// `T` must be the exact function pointer type of the symbol.
unsafe fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, ClError> {
    let sym = lib.get::<T>(name).map_err(|err| {
        ClError::NotAvailable(format!(
            "failed to resolve {}: {err}",
            String::from_utf8_lossy(&name[..name.len().saturating_sub(1)])
        ))
    })?;
    Ok(*sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_explicit_path() {
        let err = OpenClLibrary::load(Some(Path::new("/nonexistent/libOpenCL.so"))).err().unwrap();
        assert!(matches!(err, ClError::NotAvailable(_)));
    }

    #[test]
    fn test_candidates_cover_desktop_and_android() {
        assert!(LIBRARY_CANDIDATES.contains(&"libOpenCL.so"));
        assert!(LIBRARY_CANDIDATES.iter().any(|c| c.starts_with("/system/vendor")));
    }
}
