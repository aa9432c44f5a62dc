//! Error types for the shard module
//!
//! Defines error types specific to opening, probing and rotating shard files.

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during shard operations
#[derive(Error, Debug)]
pub enum ShardError {
    /// The shard file could not be opened
    #[error("Open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The shard is waiting out its reopen delay after a failed open
    #[error("Reopen of {path:?} delayed until {until}")]
    Backoff {
        path: PathBuf,
        until: DateTime<Utc>,
    },

    /// Querying the size of an open shard failed
    #[error("stat {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Renaming a backup file failed
    #[error("Failed to rename file from {from:?} to {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Removing the oldest backup failed
    #[error("Failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The shard has no open handle
    #[error("Shard {0} is not open")]
    NotOpen(usize),

    /// The shard index is not configured
    #[error("Shard index {0} out of range")]
    OutOfRange(usize),
}

/// Result type for shard operations
pub type ShardResult<T> = std::result::Result<T, ShardError>;

impl ShardError {
    /// Create a new open error
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// Check if this is an open error (including a delayed reopen)
    pub fn is_open_error(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::Backoff { .. })
    }
}
