use nnrt_core::{CoreError, DeviceType};

/// OpenCL runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ClError {
    #[error("OpenCL library not available: {0}")]
    NotAvailable(String),

    #[error("OpenCL call {op} failed: {} ({code})", cl_error_to_string(*.code))]
    Api { op: &'static str, code: i32 },

    #[error("no OpenCL platform found")]
    NoPlatform,

    #[error("no GPU device found on any OpenCL platform")]
    NoGpuDevice,

    #[error("invalid program name {0:?}")]
    InvalidProgramName(String),

    #[error("no kernel source for program '{0}'")]
    SourceNotFound(String),

    #[error("failed to build program '{program}': {log}")]
    BuildFailed { program: String, log: String },

    #[error("kernel '{kernel}' not found in program '{program}'")]
    KernelNotFound { program: String, kernel: String },

    #[error("failed to read runtime config: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ClError {
    /// Whether the runtime must stop using the device after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClError::Core(err) => err.is_fatal(),
            _ => true,
        }
    }
}

impl From<ClError> for CoreError {
    fn from(err: ClError) -> Self {
        match err {
            ClError::Core(inner) => inner,
            other => CoreError::Device { device: DeviceType::Gpu, msg: other.to_string() },
        }
    }
}

/// Turn an OpenCL status code into `Ok` or an [`ClError::Api`].
pub fn check_cl(code: i32, op: &'static str) -> Result<(), ClError> {
    if code == CL_SUCCESS {
        Ok(())
    } else {
        Err(ClError::Api { op, code })
    }
}

pub const CL_SUCCESS: i32 = 0;

/// Human-readable name of an OpenCL status code.
pub fn cl_error_to_string(code: i32) -> &'static str {
    match code {
        0 => "CL_SUCCESS",
        -1 => "CL_DEVICE_NOT_FOUND",
        -2 => "CL_DEVICE_NOT_AVAILABLE",
        -3 => "CL_COMPILER_NOT_AVAILABLE",
        -4 => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        -5 => "CL_OUT_OF_RESOURCES",
        -6 => "CL_OUT_OF_HOST_MEMORY",
        -7 => "CL_PROFILING_INFO_NOT_AVAILABLE",
        -8 => "CL_MEM_COPY_OVERLAP",
        -9 => "CL_IMAGE_FORMAT_MISMATCH",
        -10 => "CL_IMAGE_FORMAT_NOT_SUPPORTED",
        -11 => "CL_BUILD_PROGRAM_FAILURE",
        -12 => "CL_MAP_FAILURE",
        -13 => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
        -14 => "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST",
        -15 => "CL_COMPILE_PROGRAM_FAILURE",
        -16 => "CL_LINKER_NOT_AVAILABLE",
        -17 => "CL_LINK_PROGRAM_FAILURE",
        -18 => "CL_DEVICE_PARTITION_FAILED",
        -19 => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",
        -30 => "CL_INVALID_VALUE",
        -31 => "CL_INVALID_DEVICE_TYPE",
        -32 => "CL_INVALID_PLATFORM",
        -33 => "CL_INVALID_DEVICE",
        -34 => "CL_INVALID_CONTEXT",
        -35 => "CL_INVALID_QUEUE_PROPERTIES",
        -36 => "CL_INVALID_COMMAND_QUEUE",
        -37 => "CL_INVALID_HOST_PTR",
        -38 => "CL_INVALID_MEM_OBJECT",
        -39 => "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR",
        -40 => "CL_INVALID_IMAGE_SIZE",
        -41 => "CL_INVALID_SAMPLER",
        -42 => "CL_INVALID_BINARY",
        -43 => "CL_INVALID_BUILD_OPTIONS",
        -44 => "CL_INVALID_PROGRAM",
        -45 => "CL_INVALID_PROGRAM_EXECUTABLE",
        -46 => "CL_INVALID_KERNEL_NAME",
        -47 => "CL_INVALID_KERNEL_DEFINITION",
        -48 => "CL_INVALID_KERNEL",
        -49 => "CL_INVALID_ARG_INDEX",
        -50 => "CL_INVALID_ARG_VALUE",
        -51 => "CL_INVALID_ARG_SIZE",
        -52 => "CL_INVALID_KERNEL_ARGS",
        -53 => "CL_INVALID_WORK_DIMENSION",
        -54 => "CL_INVALID_WORK_GROUP_SIZE",
        -55 => "CL_INVALID_WORK_ITEM_SIZE",
        -56 => "CL_INVALID_GLOBAL_OFFSET",
        -57 => "CL_INVALID_EVENT_WAIT_LIST",
        -58 => "CL_INVALID_EVENT",
        -59 => "CL_INVALID_OPERATION",
        -60 => "CL_INVALID_GL_OBJECT",
        -61 => "CL_INVALID_BUFFER_SIZE",
        -62 => "CL_INVALID_MIP_LEVEL",
        -63 => "CL_INVALID_GLOBAL_WORK_SIZE",
        -64 => "CL_INVALID_PROPERTY",
        -65 => "CL_INVALID_IMAGE_DESCRIPTOR",
        -66 => "CL_INVALID_COMPILER_OPTIONS",
        -67 => "CL_INVALID_LINKER_OPTIONS",
        -68 => "CL_INVALID_DEVICE_PARTITION_COUNT",
        -69 => "CL_INVALID_PIPE_SIZE",
        -70 => "CL_INVALID_DEVICE_QUEUE",
        -71 => "CL_INVALID_SPEC_ID",
        -72 => "CL_MAX_SIZE_RESTRICTION_EXCEEDED",
        -1000 => "CL_INVALID_GL_SHAREGROUP_REFERENCE_KHR",
        -1001 => "CL_PLATFORM_NOT_FOUND_KHR",
        -1002 => "CL_INVALID_D3D10_DEVICE_KHR",
        -1003 => "CL_INVALID_D3D10_RESOURCE_KHR",
        -1004 => "CL_D3D10_RESOURCE_ALREADY_ACQUIRED_KHR",
        -1005 => "CL_D3D10_RESOURCE_NOT_ACQUIRED_KHR",
        -1057 => "CL_DEVICE_PARTITION_FAILED_EXT",
        -1058 => "CL_INVALID_PARTITION_COUNT_EXT",
        -1059 => "CL_INVALID_PARTITION_NAME_EXT",
        -1092 => "CL_EGL_RESOURCE_NOT_ACQUIRED_KHR",
        -1093 => "CL_INVALID_EGL_OBJECT_KHR",
        -1094 => "CL_INVALID_ACCELERATOR_INTEL",
        -1095 => "CL_INVALID_ACCELERATOR_TYPE_INTEL",
        -1096 => "CL_INVALID_ACCELERATOR_DESCRIPTOR_INTEL",
        -1097 => "CL_ACCELERATOR_TYPE_NOT_SUPPORTED_INTEL",
        _ => "UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(cl_error_to_string(0), "CL_SUCCESS");
        assert_eq!(cl_error_to_string(-5), "CL_OUT_OF_RESOURCES");
        assert_eq!(cl_error_to_string(-11), "CL_BUILD_PROGRAM_FAILURE");
        assert_eq!(cl_error_to_string(-1001), "CL_PLATFORM_NOT_FOUND_KHR");
    }

    #[test]
    fn test_unknown_codes() {
        for code in [1, -20, -999, i32::MIN, i32::MAX] {
            assert_eq!(cl_error_to_string(code), "UNKNOWN_ERROR");
        }
    }

    #[test]
    fn test_check_cl() {
        assert!(check_cl(0, "clFinish").is_ok());
        let err = check_cl(-36, "clFinish").unwrap_err();
        assert_eq!(
            err.to_string(),
            "OpenCL call clFinish failed: CL_INVALID_COMMAND_QUEUE (-36)"
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_into_core_error() {
        let core: CoreError = ClError::NoGpuDevice.into();
        assert!(matches!(core, CoreError::Device { device: DeviceType::Gpu, .. }));
        let storage: CoreError = ClError::Core(CoreError::Storage("x".into())).into();
        assert!(!storage.is_fatal());
    }
}
