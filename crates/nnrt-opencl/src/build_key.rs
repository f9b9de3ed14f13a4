//! Canonical program cache keys.
//!
//! The same program built with the same option set maps to one key no
//! matter the order the options were given in, so the in-memory cache, the
//! persisted cache and the precompiled bundle all agree on identity.

use std::collections::BTreeSet;
use std::fmt;

use crate::ClError;

/// Program name plus its canonical (sorted, deduplicated) build options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildKey {
    program: String,
    options: Vec<String>,
}

impl BuildKey {
    /// Program names must be non-empty and free of whitespace, since the
    /// serialized key separates fields with spaces.
    pub fn new<S: AsRef<str>>(program: &str, options: &[S]) -> Result<Self, ClError> {
        if program.is_empty() || program.chars().any(char::is_whitespace) {
            return Err(ClError::InvalidProgramName(program.to_string()));
        }
        let options: BTreeSet<&str> = options
            .iter()
            .map(|o| o.as_ref().trim())
            .filter(|o| !o.is_empty())
            .collect();
        Ok(Self {
            program: program.to_string(),
            options: options.into_iter().map(str::to_string).collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Options joined with single spaces, as passed to the compiler.
    pub fn options_string(&self) -> String {
        self.options.join(" ")
    }

    /// The string key used by every cache tier.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for option in &self.options {
            write!(f, " {option}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent() {
        let a = BuildKey::new("conv_2d", &["-DX=1", "-DY=2"]).unwrap();
        let b = BuildKey::new("conv_2d", &["-DY=2", "-DX=1"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), "conv_2d -DX=1 -DY=2");
    }

    #[test]
    fn test_dedup_and_blank_options() {
        let key = BuildKey::new("pooling", &["-DA", " ", "-DA", " -DB "]).unwrap();
        assert_eq!(key.options(), &["-DA".to_string(), "-DB".to_string()]);
        assert_eq!(key.options_string(), "-DA -DB");
    }

    #[test]
    fn test_no_options() {
        let key = BuildKey::new("relu", &[] as &[&str]).unwrap();
        assert_eq!(key.cache_key(), "relu");
        assert_eq!(key.program(), "relu");
    }

    #[test]
    fn test_distinct_programs_distinct_keys() {
        let a = BuildKey::new("add", &["-DX"]).unwrap();
        let b = BuildKey::new("addx", &[] as &[&str]).unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_invalid_program_name() {
        for name in ["", "conv 2d", "tab\tname"] {
            assert!(matches!(BuildKey::new(name, &["-DX"]), Err(ClError::InvalidProgramName(_))));
        }
    }
}
