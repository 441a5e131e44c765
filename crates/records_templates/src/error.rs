//! Error types for template resolution, rendering and export.

use std::path::PathBuf;
use thiserror::Error;

use records_meta::MetaError;

/// Result type alias for records operations.
pub type RecordsResult<T> = Result<T, RecordsError>;

/// Broad error category, used by callers that branch on the failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Registry,
    UnknownTemplate,
    PlaceholderResolution,
    IndexOutOfRange,
    Parse,
    Syntax,
    Render,
    InvalidSubject,
    Config,
    ExportIo,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Registry => "RegistryError",
            ErrorKind::UnknownTemplate => "UnknownTemplateError",
            ErrorKind::PlaceholderResolution => "PlaceholderResolutionError",
            ErrorKind::IndexOutOfRange => "IndexOutOfRangeError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Render => "RenderError",
            ErrorKind::InvalidSubject => "InvalidSubjectError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::ExportIo => "ExportIOError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while generating records.
#[derive(Error, Debug)]
pub enum RecordsError {
    #[error("Template registry error: {0}")]
    Registry(String),

    #[error("Template not found: {0}")]
    UnknownTemplate(String),

    #[error("Could not resolve placeholder '{name}': {message}")]
    PlaceholderResolution { name: String, message: String },

    #[error("{target}[{index}] is out of range ({len} resolved)")]
    IndexOutOfRange {
        target: String,
        index: usize,
        len: usize,
    },

    #[error("Metadata parse error: {0}")]
    Parse(#[from] MetaError),

    #[error("Template syntax error in {template} at line {line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid subject '{subject}': {message}")]
    InvalidSubject { subject: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Export failed at {path}: {source}")]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template store I/O failed at {path}: {source}")]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RecordsError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecordsError::Registry(_) | RecordsError::RegistryIo { .. } | RecordsError::Json(_) => {
                ErrorKind::Registry
            }
            RecordsError::UnknownTemplate(_) => ErrorKind::UnknownTemplate,
            RecordsError::PlaceholderResolution { .. } => ErrorKind::PlaceholderResolution,
            RecordsError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            RecordsError::Parse(_) => ErrorKind::Parse,
            RecordsError::Syntax { .. } => ErrorKind::Syntax,
            RecordsError::Render(_) => ErrorKind::Render,
            RecordsError::InvalidSubject { .. } => ErrorKind::InvalidSubject,
            RecordsError::Config(_) | RecordsError::Toml(_) => ErrorKind::Config,
            RecordsError::ExportIo { .. } | RecordsError::Io(_) => ErrorKind::ExportIo,
        }
    }

    pub(crate) fn export_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecordsError::ExportIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn registry_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecordsError::RegistryIo {
            path: path.into(),
            source,
        }
    }
}
