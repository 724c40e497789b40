//! Synchronizer error types

use std::path::PathBuf;

use thiserror::Error;

use crate::ado::TrackerError;

/// Result type alias for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Neither plan file exists or holds an `epics` array
    #[error("No work plan found in {dir:?} (looked for {candidates})")]
    NoPlan { dir: PathBuf, candidates: String },

    /// A story could not be created; progress up to it has been saved
    #[error("Failed to create story {local_id} ({title}): {source}")]
    StoryFailed {
        local_id: String,
        title: String,
        #[source]
        source: TrackerError,
    },

    /// An epic or feature could not be resolved or created
    #[error("Failed to resolve {kind} {local_id}: {source}")]
    ParentFailed {
        kind: &'static str,
        local_id: String,
        #[source]
        source: TrackerError,
    },

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn no_plan(dir: impl Into<PathBuf>, candidates: &[&str]) -> Self {
        Self::NoPlan {
            dir: dir.into(),
            candidates: candidates.join(", "),
        }
    }
}
