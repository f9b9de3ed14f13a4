//! Interpretation of driver-reported device strings and vendor context hints.

use std::fmt;

use crate::api::ContextProperties;
use crate::config::{GpuPerfHint, GpuPriorityHint};

/// GPU vendor family, used to pick vendor-specific queries and hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuType {
    Adreno,
    Mali,
    PowerVR,
    Unknown,
}

impl fmt::Display for GpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuType::Adreno => "Adreno",
            GpuType::Mali => "Mali",
            GpuType::PowerVR => "PowerVR",
            GpuType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Classify a device from its `CL_DEVICE_NAME` and `CL_DEVICE_VENDOR`.
pub fn classify_gpu(name: &str, vendor: &str) -> GpuType {
    let haystack = format!("{name} {vendor}").to_ascii_lowercase();
    if haystack.contains("adreno") || haystack.contains("qualcomm") {
        GpuType::Adreno
    } else if haystack.contains("mali") {
        GpuType::Mali
    } else if haystack.contains("powervr") || haystack.contains("imagination") {
        GpuType::PowerVR
    } else {
        GpuType::Unknown
    }
}

pub const UNKNOWN_VERSION: &str = "unknown";

/// Extract `"<major>.<minor>"` from `"OpenCL <major>.<minor> <vendor info>"`.
///
/// Malformed strings yield [`UNKNOWN_VERSION`].
pub fn parse_device_version(version: &str) -> String {
    let mut words = version.split_whitespace();
    if words.next() != Some("OpenCL") {
        return UNKNOWN_VERSION.to_string();
    }
    match words.next() {
        Some(v) if is_major_minor(v) => v.to_string(),
        _ => UNKNOWN_VERSION.to_string(),
    }
}

fn is_major_minor(token: &str) -> bool {
    match token.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

// Qualcomm context property extensions (`cl_ext_qcom.h`).
pub const CL_CONTEXT_PERF_HINT_QCOM: isize = 0x40C2;
pub const CL_PERF_HINT_HIGH_QCOM: isize = 0x40C3;
pub const CL_PERF_HINT_NORMAL_QCOM: isize = 0x40C4;
pub const CL_PERF_HINT_LOW_QCOM: isize = 0x40C5;
pub const CL_CONTEXT_PRIORITY_HINT_QCOM: isize = 0x40C9;
pub const CL_PRIORITY_HINT_HIGH_QCOM: isize = 0x40CA;
pub const CL_PRIORITY_HINT_NORMAL_QCOM: isize = 0x40CB;
pub const CL_PRIORITY_HINT_LOW_QCOM: isize = 0x40CC;

/// Context properties for the selected device.
///
/// Only Adreno drivers understand the hint properties; other vendors get
/// an empty list.
pub fn context_properties(
    gpu_type: GpuType,
    perf_hint: GpuPerfHint,
    priority_hint: GpuPriorityHint,
) -> ContextProperties {
    let mut props = ContextProperties::default();
    if gpu_type != GpuType::Adreno {
        if perf_hint != GpuPerfHint::Default || priority_hint != GpuPriorityHint::Default {
            tracing::debug!("{} GPU ignores perf/priority hints", gpu_type);
        }
        return props;
    }

    let perf = match perf_hint {
        GpuPerfHint::Default => None,
        GpuPerfHint::Low => Some(CL_PERF_HINT_LOW_QCOM),
        GpuPerfHint::Normal => Some(CL_PERF_HINT_NORMAL_QCOM),
        GpuPerfHint::High => Some(CL_PERF_HINT_HIGH_QCOM),
    };
    if let Some(value) = perf {
        props.hints.push((CL_CONTEXT_PERF_HINT_QCOM, value));
    }

    let priority = match priority_hint {
        GpuPriorityHint::Default => None,
        GpuPriorityHint::Low => Some(CL_PRIORITY_HINT_LOW_QCOM),
        GpuPriorityHint::Normal => Some(CL_PRIORITY_HINT_NORMAL_QCOM),
        GpuPriorityHint::High => Some(CL_PRIORITY_HINT_HIGH_QCOM),
    };
    if let Some(value) = priority {
        props.hints.push((CL_CONTEXT_PRIORITY_HINT_QCOM, value));
    }
    props
}
