//! Error handling for the sink
//!
//! This module provides error types and result aliases for sink operations.
//! None of these ever escape `append`, `flush` or `close`; they are handed to
//! the configured [`ErrorReporter`](crate::report::ErrorReporter) instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::shard::ShardError;

/// Errors that can occur in sink operations
#[derive(Error, Debug)]
pub enum Error {
    /// A shard file could not be opened
    #[error("Open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing flushed bytes to a shard failed
    #[error("Write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The gzip codec rejected its input or state
    #[error("Compression: {0}")]
    Compression(String),

    /// A stat, rename or remove performed during rotation failed
    #[error("Rotation of {path:?}: {message}")]
    Rotation {
        path: PathBuf,
        message: String,
    },

    /// A buffer was flushed while its shard had no open handle
    #[error("Shard {0} has no open handle")]
    NoOpenHandle(usize),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The advisory lock file could not be acquired
    #[error("Lock file {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The sink has already been closed
    #[error("Sink is closed")]
    Closed,

    /// Errors related to I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for sink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by reporters and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Open,
    Write,
    Compression,
    Rotation,
    Config,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Write => "write",
            Self::Compression => "compression",
            Self::Rotation => "rotation",
            Self::Config => "config",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Create a new open error
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// Create a new write error
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Create a new compression error
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression(message.into())
    }

    /// Create a new rotation error
    pub fn rotation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Rotation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Open { .. } | Self::Lock { .. } => ErrorKind::Open,
            Self::Write { .. } | Self::NoOpenHandle(_) => ErrorKind::Write,
            Self::Compression(_) => ErrorKind::Compression,
            Self::Rotation { .. } => ErrorKind::Rotation,
            Self::Config(_) | Self::Serialization(_) => ErrorKind::Config,
            Self::Closed | Self::Io(_) => ErrorKind::Other,
        }
    }

    /// Check if this is a write error
    pub fn is_write_error(&self) -> bool {
        matches!(self, Self::Write { .. })
    }

    /// Check if this is a compression error
    pub fn is_compression_error(&self) -> bool {
        matches!(self, Self::Compression(_))
    }

    /// Get a user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<String> {
        let io_kind = match self {
            Self::Open { source, .. } | Self::Write { source, .. } | Self::Lock { source, .. } => {
                Some(source.kind())
            }
            Self::Io(err) => Some(err.kind()),
            _ => None,
        };

        match io_kind {
            Some(io::ErrorKind::NotFound) => {
                Some("The log directory does not exist or was removed".to_string())
            }
            Some(io::ErrorKind::PermissionDenied) => {
                Some("Verify permissions on the log directory".to_string())
            }
            _ => match self {
                Self::Write { .. } => Some("Check available disk space".to_string()),
                Self::Config(_) => Some("Review the sink configuration".to_string()),
                _ => None,
            },
        }
    }
}

impl From<ShardError> for Error {
    fn from(err: ShardError) -> Self {
        match err {
            ShardError::Open { path, source } => Self::Open { path, source },
            ShardError::Backoff { path, .. } => Self::Open {
                path,
                source: io::Error::new(io::ErrorKind::WouldBlock, "reopen delayed after failure"),
            },
            ShardError::Stat { path, source } | ShardError::Remove { path, source } => {
                Self::Rotation {
                    path,
                    message: source.to_string(),
                }
            }
            ShardError::Rename { from, to, source } => Self::Rotation {
                path: from,
                message: format!("rename to {:?}: {}", to, source),
            },
            ShardError::NotOpen(index) => Self::NoOpenHandle(index),
            ShardError::OutOfRange(index) => {
                Self::Config(format!("Shard index {} out of range", index))
            }
        }
    }
}
