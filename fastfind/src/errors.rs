use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::queue::EntryId;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur while queueing or running searches.
///
/// Per-file problems (a file vanishing mid-search, a permission error on one
/// file) never surface as a `SearchError`: the job counts the file as searched
/// and moves on. The variants here are the ones a caller has to act on.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search root unavailable: {path}: {reason}")]
    RootUnavailable { path: PathBuf, reason: String },
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Entry {0} is already running and can only be cancelled")]
    EntryRunning(EntryId),
    #[error("Entry {0} is not in the queue")]
    EntryNotFound(EntryId),
    #[error("Search service is shut down")]
    ServiceStopped,
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Strips the Windows UNC prefix (\\?\) from a path if present
pub(crate) fn strip_unc_prefix(p: &Path) -> PathBuf {
    let s = p.display().to_string();
    if let Some(stripped) = s.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        p.to_path_buf()
    }
}

impl SearchError {
    pub fn root_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::RootUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn entry_running(id: EntryId) -> Self {
        Self::EntryRunning(id)
    }

    pub fn entry_not_found(id: EntryId) -> Self {
        Self::EntryNotFound(id)
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

impl From<config::ConfigError> for SearchError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}
