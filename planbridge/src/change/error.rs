//! Change-request recorder errors

use std::path::PathBuf;

use thiserror::Error;

use crate::ado::TrackerError;
use crate::project::ProjectError;

/// Result type alias for change-request operations
pub type ChangeResult<T> = Result<T, ChangeError>;

#[derive(Error, Debug)]
pub enum ChangeError {
    /// Change request ids become file and directory names
    #[error("Invalid change request id {id:?}")]
    InvalidId { id: String },

    #[error("Failed to parse change analysis {}: {source}", path.display())]
    InvalidAnalysis {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The change-log epic could not be found or created
    #[error("Failed to resolve the change-log epic: {0}")]
    ChangelogEpic(#[source] TrackerError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChangeError {
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId { id: id.into() }
    }
}
