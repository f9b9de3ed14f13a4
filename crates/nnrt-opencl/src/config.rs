//! Runtime configuration consumed once when the OpenCL runtime is built.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ClError;

/// Performance hint forwarded to queue creation on drivers that honour it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPerfHint {
    #[default]
    Default,
    Low,
    Normal,
    High,
}

/// Scheduling priority hint forwarded to queue creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPriorityHint {
    #[default]
    Default,
    Low,
    Normal,
    High,
}

/// Settings for [`OpenClRuntime`](crate::OpenClRuntime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub perf_hint: GpuPerfHint,
    pub priority_hint: GpuPriorityHint,

    /// Create the command queue with profiling enabled.
    pub profiling: bool,

    /// Compile kernels with buffer bounds checks (`-DOUT_OF_RANGE_CHECK`).
    pub out_of_range_check: bool,

    /// File backing the persisted kernel cache. `None` keeps it in memory.
    pub kernel_cache_path: Option<PathBuf>,

    /// Directory of `<program>.cl` sources.
    pub kernel_dir: Option<PathBuf>,

    /// Precompiled program bundle shipped with the application.
    pub precompiled_path: Option<PathBuf>,

    /// Explicit OpenCL library, bypassing the default search list.
    pub library_path: Option<PathBuf>,
}

pub const ENV_PROFILING: &str = "NNRT_OPENCL_PROFILING";
pub const ENV_OUT_OF_RANGE_CHECK: &str = "NNRT_OUT_OF_RANGE_CHECK";
pub const ENV_KERNEL_CACHE: &str = "NNRT_KERNEL_CACHE";
pub const ENV_KERNEL_DIR: &str = "NNRT_KERNEL_DIR";
pub const ENV_PRECOMPILED: &str = "NNRT_PRECOMPILED";
pub const ENV_OPENCL_LIBRARY: &str = "NNRT_OPENCL_LIBRARY";

impl RuntimeConfig {
    pub fn with_hints(mut self, perf_hint: GpuPerfHint, priority_hint: GpuPriorityHint) -> Self {
        self.perf_hint = perf_hint;
        self.priority_hint = priority_hint;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    /// Defaults overlaid with `NNRT_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ClError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ClError::Config(format!("{}: {err}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|err| ClError::Config(format!("{}: {err}", path.display())))
    }

    /// Apply variables returned by `lookup` on top of `self`.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(ENV_PROFILING) {
            self.profiling = parse_flag(&value);
        }
        if let Some(value) = lookup(ENV_OUT_OF_RANGE_CHECK) {
            self.out_of_range_check = parse_flag(&value);
        }
        let path = |name| lookup(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(p) = path(ENV_KERNEL_CACHE) {
            self.kernel_cache_path = Some(p);
        }
        if let Some(p) = path(ENV_KERNEL_DIR) {
            self.kernel_dir = Some(p);
        }
        if let Some(p) = path(ENV_PRECOMPILED) {
            self.precompiled_path = Some(p);
        }
        if let Some(p) = path(ENV_OPENCL_LIBRARY) {
            self.library_path = Some(p);
        }
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.perf_hint, GpuPerfHint::Default);
        assert!(!config.profiling);
        assert!(config.kernel_cache_path.is_none());
    }

    #[test]
    fn test_overlay() {
        let vars: HashMap<&str, &str> = [
            (ENV_PROFILING, "1"),
            (ENV_OUT_OF_RANGE_CHECK, "false"),
            (ENV_KERNEL_CACHE, "/tmp/nnrt/programs.bin"),
            (ENV_KERNEL_DIR, ""),
        ]
        .into_iter()
        .collect();
        let config = RuntimeConfig::default()
            .with_profiling(false)
            .overlay(|name| vars.get(name).map(|v| v.to_string()));
        assert!(config.profiling);
        assert!(!config.out_of_range_check);
        assert_eq!(config.kernel_cache_path, Some(PathBuf::from("/tmp/nnrt/programs.bin")));
        assert!(config.kernel_dir.is_none());
    }

    #[test]
    fn test_parse_flag() {
        for v in ["1", "true", "TRUE", " on "] {
            assert!(parse_flag(v), "{v}");
        }
        for v in ["0", "false", "", "nope"] {
            assert!(!parse_flag(v), "{v}");
        }
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, r#"{"perf_hint":"high","priority_hint":"low","profiling":true}"#).unwrap();

        let config = RuntimeConfig::from_json_file(&path).unwrap();
        assert_eq!(config.perf_hint, GpuPerfHint::High);
        assert_eq!(config.priority_hint, GpuPriorityHint::Low);
        assert!(config.profiling);
        assert!(config.library_path.is_none());
    }

    #[test]
    fn test_from_json_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = RuntimeConfig::from_json_file(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ClError::Config(_))));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(RuntimeConfig::from_json_file(&path), Err(ClError::Config(_))));
    }
}
