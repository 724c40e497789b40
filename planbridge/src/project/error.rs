//! Project configuration errors

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineError;

/// Result type alias for project operations
pub type ProjectResult<T> = Result<T, ProjectError>;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project directory already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("No project.yaml found at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Invalid project name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid status {status:?}, expected one of: {expected}")]
    InvalidStatus { status: String, expected: String },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProjectError {
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
