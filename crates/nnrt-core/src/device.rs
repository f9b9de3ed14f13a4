use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend family a buffer or kernel lives on.
///
/// Used as the key of the [`AllocatorRegistry`](crate::AllocatorRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Host CPU (NEON / AVX paths)
    #[default]
    Cpu,
    /// OpenCL-class GPU
    Gpu,
    /// Hexagon-class DSP
    Dsp,
}

impl DeviceType {
    /// Every device type, in declaration order.
    pub const ALL: [DeviceType; 3] = [DeviceType::Cpu, DeviceType::Gpu, DeviceType::Dsp];

    /// Whether this is the host CPU.
    pub fn is_cpu(&self) -> bool {
        matches!(self, DeviceType::Cpu)
    }

    /// Whether this is a GPU backend.
    pub fn is_gpu(&self) -> bool {
        matches!(self, DeviceType::Gpu)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Gpu => write!(f, "gpu"),
            DeviceType::Dsp => write!(f, "dsp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_properties() {
        assert!(DeviceType::Cpu.is_cpu());
        assert!(!DeviceType::Cpu.is_gpu());
        assert!(DeviceType::Gpu.is_gpu());
        assert!(!DeviceType::Dsp.is_cpu());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", DeviceType::Cpu), "cpu");
        assert_eq!(format!("{}", DeviceType::Gpu), "gpu");
        assert_eq!(format!("{}", DeviceType::Dsp), "dsp");
    }

    #[test]
    fn test_default() {
        assert_eq!(DeviceType::default(), DeviceType::Cpu);
    }

    #[test]
    fn test_all_is_distinct() {
        let mut all = DeviceType::ALL.to_vec();
        all.dedup();
        assert_eq!(all.len(), 3);
    }
}
