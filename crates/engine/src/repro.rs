//! Dependency and environment snapshot for reproducible runs
//!
//! When a run is marked reproducible, the engine records what the experiment
//! was built from: every package in the lockfile with version and origin,
//! plus the host environment. Locally developed packages (those without a
//! registry source) can additionally be packaged into the archive through
//! the [`SourcePackager`] seam, since a version number alone would not be
//! enough to rebuild them.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Key of the environment entry inside the dependency snapshot file.
pub const ENVIRONMENT_KEY: &str = "__environment__";

/// One package from the lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInfo {
    /// Package name.
    pub name: String,
    /// Locked version.
    pub version: String,
    /// Registry or git origin. Absent for packages built from a local path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Names of the packages this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Whether the package comes from a local working copy instead of a
    /// registry, in which case the version alone cannot reproduce it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub editable: bool,
}

/// Host environment the run executed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Operating system name.
    pub os: String,
    /// Processor architecture.
    pub arch: String,
    /// Operating system family.
    pub family: String,
}

impl EnvironmentInfo {
    /// Snapshot of the process environment.
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Lockfile {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Everything recorded about the dependencies of one run.
#[derive(Debug, Clone)]
pub struct DependencySnapshot {
    packages: IndexMap<String, DependencyInfo>,
    environment: EnvironmentInfo,
}

impl DependencySnapshot {
    /// Parse a `Cargo.lock` into a snapshot of the current environment.
    pub fn from_lockfile(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let lockfile: Lockfile = toml::from_str(&text)?;

        let mut packages = IndexMap::new();
        for package in lockfile.package {
            let editable = package.source.is_none();
            packages.insert(
                package.name.clone(),
                DependencyInfo {
                    name: package.name,
                    version: package.version,
                    source: package.source,
                    requires: package.dependencies,
                    editable,
                },
            );
        }
        Ok(Self {
            packages,
            environment: EnvironmentInfo::current(),
        })
    }

    /// All recorded packages, in lockfile order.
    #[must_use]
    pub fn packages(&self) -> &IndexMap<String, DependencyInfo> {
        &self.packages
    }

    /// The host environment of the run.
    #[must_use]
    pub fn environment(&self) -> &EnvironmentInfo {
        &self.environment
    }

    /// Packages built from a local working copy.
    pub fn editable(&self) -> impl Iterator<Item = &DependencyInfo> {
        self.packages.values().filter(|info| info.editable)
    }

    /// Serialize to the snapshot document: package name to record, with the
    /// environment under [`ENVIRONMENT_KEY`].
    pub fn to_json(&self) -> Result<String> {
        let mut document = serde_json::Map::new();
        for (name, info) in &self.packages {
            document.insert(name.clone(), serde_json::to_value(info)?);
        }
        document.insert(
            ENVIRONMENT_KEY.to_string(),
            serde_json::to_value(&self.environment)?,
        );
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Write the snapshot document to a file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = self.to_json()?;
        fs::write(path, text).map_err(|source| Error::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Flat `name==version` listing of the registry packages, one per line.
    /// Editable packages are excluded, their sources are captured instead.
    #[must_use]
    pub fn requirements(&self) -> String {
        let mut text = String::new();
        for info in self.packages.values() {
            if info.editable {
                continue;
            }
            text.push_str(&info.name);
            text.push_str("==");
            text.push_str(&info.version);
            text.push('\n');
        }
        text
    }
}

/// Packages the sources of a locally developed dependency into the archive.
///
/// The engine knows that an editable package must be captured but not where
/// its working copy lives; implementations bridge that gap, typically by
/// copying the crate folder into the destination.
pub trait SourcePackager {
    /// Place the dependency's sources into the destination folder.
    fn package(&self, dependency: &DependencyInfo, destination: &Path) -> Result<()>;
}
