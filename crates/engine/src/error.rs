//! Error types for labbook-engine
//!
//! This module defines all error types used throughout the engine crate.
//! We use `thiserror` for structured error handling with good error messages.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for labbook-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for labbook-engine
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the foundation crate
    #[error(transparent)]
    Core(#[from] labbook_core::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reading a file
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing a file
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive base path does not exist or is not a directory
    #[error(
        "The base path {path} does not exist or is not a directory. \
         The base path must point to an existing folder before an experiment can run."
    )]
    ArchiveBase { path: PathBuf },

    /// The archive directory could not be created
    #[error("Failed to create archive directory {path}: {source}")]
    ArchiveCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path does not hold a finished experiment archive
    #[error("Not an experiment archive: {path}")]
    NotAnArchive { path: PathBuf },

    /// The experiment was started without a body
    #[error("The experiment has no body. Attach one with `main` before running.")]
    MissingBody,

    /// A plugin failed to construct or register
    #[error("Plugin '{name}' failed to register: {message}")]
    PluginRegistration { name: String, message: String },

    /// Dependency lockfile could not be parsed
    #[error("Failed to parse lockfile: {0}")]
    Lockfile(#[from] toml::de::Error),

    /// Cache value could not be encoded
    #[error("Cache encode error: {0}")]
    CacheEncode(#[from] bincode::error::EncodeError),

    /// Cache value could not be decoded
    #[error("Cache decode error: {0}")]
    CacheDecode(#[from] bincode::error::DecodeError),

    /// Logging setup error
    #[error("Logging setup error: {0}")]
    Logging(String),

    /// Error raised by user experiment logic
    #[error("{0}")]
    User(#[from] anyhow::Error),

    /// Other error message
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Stable tag recorded as the error type in run metadata.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Core(_) => "core",
            Self::Json(_) => "json",
            Self::FileRead { .. } => "file-read",
            Self::FileWrite { .. } => "file-write",
            Self::ArchiveBase { .. } => "archive-base",
            Self::ArchiveCreate { .. } => "archive-create",
            Self::NotAnArchive { .. } => "not-an-archive",
            Self::MissingBody => "missing-body",
            Self::PluginRegistration { .. } => "plugin-registration",
            Self::Lockfile(_) => "lockfile",
            Self::CacheEncode(_) => "cache-encode",
            Self::CacheDecode(_) => "cache-decode",
            Self::Logging(_) => "logging",
            Self::User(_) => "user",
            Self::Message(_) => "message",
        }
    }
}
