//! Change requests against an already pushed plan
//!
//! - [`analysis`]: the change analysis document
//! - [`recorder`]: [`ChangeRequestRecorder`], which applies it
//! - [`render`]: change-log HTML and the plan outline used for analysis

pub mod analysis;
pub mod error;
pub mod recorder;
pub mod render;

pub use analysis::{ChangeAnalysis, Impact, NewStorySpec, StoryModification};
pub use error::{ChangeError, ChangeResult};
pub use recorder::{
    validate_cr_id, BookkeepingOutcome, ChangeOutcome, ChangeRequestRecorder, ChangelogOutcome,
    ItemFailure, Snapshot, StoryPushReport,
};
pub use render::summarize_breakdown;
