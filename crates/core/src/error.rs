//! Base error types for labbook
//!
//! This module provides the foundation error types that all crates can use.

use thiserror::Error;

/// Base error type for shared functionality
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A slash-path query was empty or malformed
    #[error("Invalid data key: {0}")]
    InvalidKey(String),

    /// A slash-path query did not resolve to a value
    #[error("No value stored under key '{key}'")]
    KeyNotFound { key: String },

    /// A slash-path query traversed through a non-object value
    #[error("Key '{key}' cannot descend into non-object segment '{segment}'")]
    KeyNotTraversable { key: String, segment: String },

    /// No parameter with the given name exists
    #[error("No experiment parameter with the name '{name}'")]
    ParameterUnknown { name: String },

    /// Generic error message
    #[error("{0}")]
    Message(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
