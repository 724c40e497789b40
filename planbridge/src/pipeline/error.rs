//! Pipeline error types

use thiserror::Error;

use crate::pipeline::graph::{Command, PipelineFlag};

/// Result type alias for pipeline checks
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A precondition flag of the command is not set
    #[error("Cannot run {command}: {message} (missing {flag})")]
    MissingPrerequisite {
        command: Command,
        flag: PipelineFlag,
        message: String,
    },

    #[error("Unknown pipeline command: {name}")]
    UnknownCommand { name: String },

    /// Only steps produced outside the tool may be recorded
    #[error("{command} sets its flag by running and cannot be recorded by hand")]
    NotRecordable { command: Command },
}
