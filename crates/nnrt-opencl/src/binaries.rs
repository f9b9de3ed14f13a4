//! Precompiled program bundles.
//!
//! A bundle is produced offline for one platform and shipped next to the
//! application. It is only trusted when the running platform reports the
//! exact same identification strings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::api::PlatformInfo;
use crate::ClError;

/// Platform identity recorded in a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePlatform {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

impl From<&PlatformInfo> for BundlePlatform {
    fn from(info: &PlatformInfo) -> Self {
        Self {
            name: info.name.clone(),
            vendor: info.vendor.clone(),
            version: info.version.clone(),
        }
    }
}

/// Binaries keyed by canonical build key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramBundle {
    pub platform: BundlePlatform,
    pub programs: BTreeMap<String, Vec<u8>>,
}

impl ProgramBundle {
    pub fn new(platform: BundlePlatform) -> Self {
        Self { platform, programs: BTreeMap::new() }
    }

    pub fn insert(&mut self, key: String, binary: Vec<u8>) {
        self.programs.insert(key, binary);
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.programs.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn matches(&self, platform: &PlatformInfo) -> bool {
        self.platform == BundlePlatform::from(platform)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClError> {
        let bytes = bincode::serialize(self)
            .map_err(|err| ClError::Config(format!("encode bundle: {err}")))?;
        std::fs::write(path, bytes)
            .map_err(|err| ClError::Config(format!("{}: {err}", path.display())))
    }

    pub fn load(path: &Path) -> Result<Self, ClError> {
        let bytes = std::fs::read(path)
            .map_err(|err| ClError::Config(format!("{}: {err}", path.display())))?;
        bincode::deserialize(&bytes)
            .map_err(|err| ClError::Config(format!("{}: {err}", path.display())))
    }

    /// Load `path` and keep it only if it targets `platform`.
    ///
    /// Unreadable or foreign bundles are skipped with a warning; the runtime
    /// then compiles from source.
    pub fn load_for(path: &Path, platform: &PlatformInfo) -> Option<Self> {
        match Self::load(path) {
            Ok(bundle) if bundle.matches(platform) => {
                tracing::info!("using {} precompiled programs from {}", bundle.len(), path.display());
                Some(bundle)
            }
            Ok(bundle) => {
                tracing::warn!(
                    "precompiled programs in {} target '{} {}', running on '{} {}'; ignoring",
                    path.display(),
                    bundle.platform.name,
                    bundle.platform.version,
                    platform.name,
                    platform.version
                );
                None
            }
            Err(err) => {
                tracing::warn!("ignoring precompiled programs: {}", err);
                None
            }
        }
    }
}
