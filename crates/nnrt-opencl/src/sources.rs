//! Where OpenCL C program text comes from.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::ClError;

/// Supplies OpenCL C source text by program name.
pub trait KernelSource: Send + Sync {
    fn source(&self, program: &str) -> Result<String, ClError>;
}

/// Sources held in memory, typically `include_str!`-embedded.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    programs: HashMap<String, String>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: &str, source: impl Into<String>) -> Self {
        self.insert(program, source);
        self
    }

    pub fn insert(&mut self, program: &str, source: impl Into<String>) {
        self.programs.insert(program.to_string(), source.into());
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl KernelSource for SourceMap {
    fn source(&self, program: &str) -> Result<String, ClError> {
        self.programs
            .get(program)
            .cloned()
            .ok_or_else(|| ClError::SourceNotFound(program.to_string()))
    }
}

/// Reads `<dir>/<program>.cl`.
#[derive(Debug, Clone)]
pub struct SourceDir {
    dir: PathBuf,
}

impl SourceDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, program: &str) -> PathBuf {
        self.dir.join(format!("{program}.cl"))
    }
}

impl KernelSource for SourceDir {
    fn source(&self, program: &str) -> Result<String, ClError> {
        let path = self.path_of(program);
        std::fs::read_to_string(&path).map_err(|err| {
            tracing::error!("failed to read kernel source {}: {}", path.display(), err);
            ClError::SourceNotFound(program.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_map() {
        let sources = SourceMap::new().with_program("relu", "__kernel void relu() {}");
        assert_eq!(sources.source("relu").unwrap(), "__kernel void relu() {}");
        assert!(matches!(sources.source("conv"), Err(ClError::SourceNotFound(p)) if p == "conv"));
    }

    #[test]
    fn test_source_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("add.cl"), "__kernel void add() {}").unwrap();
        let sources = SourceDir::new(dir.path());
        assert_eq!(sources.source("add").unwrap(), "__kernel void add() {}");
        assert!(sources.source("mul").is_err());
    }
}
