//! Error types for metadata parsing.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Errors that can occur while reading instrument metadata.
#[derive(Error, Debug)]
pub enum MetaError {
    #[error("Cannot read metadata file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {format} metadata in {path}: {message}")]
    Malformed {
        format: String,
        path: PathBuf,
        message: String,
    },

    #[error("Missing required field '{field}' in {path}")]
    MissingField { path: PathBuf, field: String },

    #[error("Invalid value for '{field}' in {path}: {message}")]
    InvalidValue {
        path: PathBuf,
        field: String,
        message: String,
    },

    #[error("Invalid unit count in {path}: {value}")]
    InvalidCount { path: PathBuf, value: String },

    #[error("No metadata parser registered for format: {0}")]
    UnknownFormat(String),
}
