//! Run archive layout and the persisted run record
//!
//! Every run materializes as one folder under `<base_path>/<namespace>/`.
//! The folder holds a fixed set of well-known files plus whatever user code
//! commits into it. Nothing outside this module hardcodes those file names.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use labbook_core::Parameter;

use crate::error::{Error, Result};

/// Snapshot of the experiment source file.
pub const CODE_FILE_NAME: &str = "experiment_code.rs";
/// The run record, written at initialize and again at finalize.
pub const METADATA_FILE_NAME: &str = "experiment_meta.json";
/// The nested data store, persisted at finalize.
pub const DATA_FILE_NAME: &str = "experiment_data.json";
/// Plain text run log.
pub const LOG_FILE_NAME: &str = "experiment_out.log";
/// Folder for tracked figures and rendered plots.
pub const TRACK_DIR_NAME: &str = ".track";
/// Dependency and environment snapshot.
pub const DEPENDENCIES_FILE_NAME: &str = ".dependencies.json";
/// Flat `name==version` listing derived from the dependency snapshot.
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";
/// Folder for packaged sources of locally developed dependencies.
pub const SOURCES_DIR_NAME: &str = ".sources";
/// Fixed archive name reused by every debug run.
pub const DEBUG_NAME: &str = "debug";

/// Lifecycle status of a run, as recorded in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Constructed, archive not created yet.
    Pending,
    /// Archive exists, body executing.
    Running,
    /// Finished without error.
    Done,
    /// Finished with a captured error.
    Failed,
}

impl RunStatus {
    /// Whether the run has finished, successfully or not.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// Serializable description of the error that failed a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunErrorInfo {
    /// Stable error tag, see [`Error::kind`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Rendered error message.
    pub message: String,
}

impl From<&Error> for RunErrorInfo {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// The run record persisted as `experiment_meta.json`.
///
/// Written once after the archive is created and again at finalize, so a
/// crashed run still leaves a parseable record with status `running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Archive folder name of the run.
    pub name: String,
    /// Namespace path relative to the base path.
    pub namespace: String,
    /// Base path the archive lives under.
    pub base_path: String,
    /// Description of the experiment.
    pub description: String,
    /// Lifecycle status at the time of writing.
    pub status: RunStatus,
    /// When the archive was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the run finalized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall clock duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// The merged parameter table, in declaration order.
    pub parameters: IndexMap<String, Parameter>,
    /// Hook names mapped to how often they fired during the run.
    pub hooks: IndexMap<String, u64>,
    /// Names of the tracked series, in first-track order.
    pub track: Vec<String>,
    /// The captured error of a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunErrorInfo>,
}

/// Handle to one run folder.
#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
}

impl Archive {
    /// Create the archive folder for a new run.
    ///
    /// The base path must already exist; this is the one precondition the
    /// engine refuses to repair, so a typo cannot silently create a result
    /// tree in the wrong place. Namespace folders are created as needed.
    /// With `wipe_existing` an existing folder of the same name is deleted
    /// first, which is how debug runs reuse their fixed name.
    pub fn create(
        base_path: &Path,
        namespace: &str,
        name: &str,
        wipe_existing: bool,
    ) -> Result<Self> {
        if !base_path.is_dir() {
            return Err(Error::ArchiveBase {
                path: base_path.to_path_buf(),
            });
        }

        let namespace_path = namespace
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(base_path.to_path_buf(), |path, segment| path.join(segment));
        fs::create_dir_all(&namespace_path).map_err(|source| Error::ArchiveCreate {
            path: namespace_path.clone(),
            source,
        })?;

        let path = namespace_path.join(name);
        if wipe_existing && path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir(&path).map_err(|source| Error::ArchiveCreate {
            path: path.clone(),
            source,
        })?;
        fs::create_dir(path.join(TRACK_DIR_NAME)).map_err(|source| Error::ArchiveCreate {
            path: path.join(TRACK_DIR_NAME),
            source,
        })?;

        tracing::debug!(archive = %path.display(), "created archive");
        Ok(Self { path })
    }

    /// Open an existing archive folder. Fails when the folder does not carry
    /// a run record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.join(METADATA_FILE_NAME).is_file() {
            return Err(Error::NotAnArchive { path });
        }
        Ok(Self { path })
    }

    /// Generate a unique archive name from the current local time.
    ///
    /// Format: `<day>_<month>_<year>__<hour>_<minute>__<suffix>` with a four
    /// character random suffix, prefixed with `<prefix>__` when a prefix is
    /// configured.
    #[must_use]
    pub fn generate_name(prefix: &str) -> String {
        let now = Local::now();
        let name = format!(
            "{}__{}__{}",
            now.format("%d_%m_%Y"),
            now.format("%H_%M"),
            random_suffix(4)
        );
        if prefix.is_empty() {
            name
        } else {
            format!("{prefix}__{name}")
        }
    }

    /// The archive folder itself.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the run record file.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE_NAME)
    }

    /// Path of the persisted data store.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE_NAME)
    }

    /// Path of the source code snapshot.
    #[must_use]
    pub fn code_path(&self) -> PathBuf {
        self.path.join(CODE_FILE_NAME)
    }

    /// Path of the run log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE_NAME)
    }

    /// Folder for tracked figures and rendered plots.
    #[must_use]
    pub fn track_dir(&self) -> PathBuf {
        self.path.join(TRACK_DIR_NAME)
    }

    /// Path of the dependency snapshot.
    #[must_use]
    pub fn dependencies_path(&self) -> PathBuf {
        self.path.join(DEPENDENCIES_FILE_NAME)
    }

    /// Path of the requirements listing.
    #[must_use]
    pub fn requirements_path(&self) -> PathBuf {
        self.path.join(REQUIREMENTS_FILE_NAME)
    }

    /// Folder for packaged dependency sources.
    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.path.join(SOURCES_DIR_NAME)
    }

    /// Absolute path for a file name inside the archive.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Path of the `index`-th file of a tracked figure series.
    #[must_use]
    pub fn track_file_path(&self, key: &str, index: usize, extension: &str) -> PathBuf {
        self.track_dir()
            .join(format!("{key}_{index:03}.{extension}"))
    }

    /// Write raw bytes to a file inside the archive, returning its path.
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.file_path(name);
        fs::write(&path, bytes).map_err(|source| Error::FileWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Read the run record of an archive folder.
    pub fn load_metadata(path: &Path) -> Result<RunMetadata> {
        let metadata_path = path.join(METADATA_FILE_NAME);
        if !metadata_path.is_file() {
            return Err(Error::NotAnArchive {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(&metadata_path).map_err(|source| Error::FileRead {
            path: metadata_path,
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Whether a path holds a finished run: the folder exists, carries a
    /// parseable run record and that record has a terminal status.
    #[must_use]
    pub fn is_archive(path: &Path) -> bool {
        Self::load_metadata(path).is_ok_and(|metadata| metadata.status.is_terminal())
    }
}

fn random_suffix(length: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
