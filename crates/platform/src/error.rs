//! Error types for radium-platform

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by an [`crate::Adapter`].
///
/// The store engine never interprets these beyond [`AdapterError::is_not_found`];
/// everything else propagates to the caller unchanged.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no such path: {path}")]
    NotFound { path: PathBuf },

    #[error("not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("destination already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("too many levels of symbolic links: {path}")]
    SymlinkLoop { path: PathBuf },

    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AdapterError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            AdapterError::NotFound { path }
        } else {
            AdapterError::Io { path, source }
        }
    }

    /// True when the error means "the path does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound { .. })
    }
}
