use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::LibraryCfg;
use crate::error::{CoreResult, TraceguardError};

/// Versions compare as plain strings against this, so `"1.0"` is *not* v1
/// while `"10.0.0"` is.
pub const V1_THRESHOLD: &str = "1.0.0";

/// Source of installed package metadata.
pub trait VersionSource: Send + Sync {
    fn package_version(&self, package: &str) -> CoreResult<String>;
}

/// Fixed package -> version table.
#[derive(Debug, Clone, Default)]
pub struct PackageVersions {
    versions: HashMap<String, String>,
}

impl PackageVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, package: impl Into<String>, version: impl Into<String>) -> Self {
        self.versions.insert(package.into(), version.into());
        self
    }

    /// The `[library]` section: one entry if a version is configured, none otherwise.
    pub fn from_config(cfg: &LibraryCfg) -> Self {
        match &cfg.version {
            Some(version) => Self::new().with(cfg.package.clone(), version.clone()),
            None => Self::new(),
        }
    }
}

impl VersionSource for PackageVersions {
    fn package_version(&self, package: &str) -> CoreResult<String> {
        self.versions
            .get(package)
            .cloned()
            .ok_or_else(|| TraceguardError::VersionDetection {
                package: package.to_string(),
                reason: "package metadata not found".into(),
            })
    }
}

pub fn is_v1_version(version: &str) -> bool {
    version >= V1_THRESHOLD
}

/// Cached "is version 1 or later" flag for one package.
pub struct LibraryVersion {
    package: String,
    source: Arc<dyn VersionSource>,
    cached: RwLock<Option<bool>>,
}

impl LibraryVersion {
    pub fn new(package: impl Into<String>, source: Arc<dyn VersionSource>) -> Self {
        Self {
            package: package.into(),
            source,
            cached: RwLock::new(None),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Concurrent first calls may both query the source; they agree.
    pub fn is_v1(&self) -> CoreResult<bool> {
        if let Some(v1) = *self.cached.read().unwrap_or_else(|p| p.into_inner()) {
            return Ok(v1);
        }
        tracing::info!(package = %self.package, "checking target library version");
        let version = self.source.package_version(&self.package)?;
        let v1 = is_v1_version(&version);
        tracing::info!(package = %self.package, %version, v1, "target library version");
        *self.cached.write().unwrap_or_else(|p| p.into_inner()) = Some(v1);
        Ok(v1)
    }

    /// Forget the cached flag; the next [`is_v1`](Self::is_v1) asks the source again.
    pub fn reset(&self) {
        *self.cached.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl std::fmt::Debug for LibraryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryVersion")
            .field("package", &self.package)
            .field("cached", &self.cached)
            .finish()
    }
}
