//! Pipeline step ordering and artifact staleness

pub mod error;
pub mod fingerprint;
pub mod graph;

pub use error::{PipelineError, PipelineResult};
pub use fingerprint::input_fingerprint;
pub use graph::{
    check_preconditions, complete, invalidate, invalidates, preconditions, produces,
    staleness_warnings, Command, PipelineFlag, PipelineState,
};
