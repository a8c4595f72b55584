//! Error types for store operations.

use std::fmt;

/// Errors that can occur while operating on a vector store.
#[derive(Debug)]
pub enum FlatVecError {
    /// No connection is registered for the requested path.
    NotFound(String),

    /// Invalid caller-supplied argument (zero k, empty id list,
    /// mismatched vector length, missing dimensions).
    InvalidArgument(String),

    /// I/O error (file open, read, write, rename).
    Io(std::io::Error),

    /// Metadata store error (statement failed to prepare, step or commit).
    Store(rusqlite::Error),

    /// The vector file header disagrees with the bytes on disk.
    Corruption {
        path: String,
        detail: String,
    },
}

impl fmt::Display for FlatVecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "no connection for path: {}", path),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Store(e) => write!(f, "metadata store error: {}", e),
            Self::Corruption { path, detail } => {
                write!(f, "vector file corrupt: {} ({})", path, detail)
            }
        }
    }
}

impl std::error::Error for FlatVecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FlatVecError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rusqlite::Error> for FlatVecError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e)
    }
}

/// Result type for store operations.
pub type FlatVecResult<T> = Result<T, FlatVecError>;
