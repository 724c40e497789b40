//! Planbridge Library
//!
//! Pushes a locally generated work plan (epics, features, stories) into a
//! work-item tracking service and keeps the local pipeline honest about which
//! generated artifacts are out of date.
//!
//! # Modules
//!
//! - [`ado`]: rate-limited, retrying transport and the typed work-item,
//!   repository and wiki client
//! - [`plan`]: the work plan document and its HTML rendering
//! - [`sync`]: [`HierarchySynchronizer`], the idempotent, resumable push
//! - [`pipeline`]: the staleness graph over pipeline commands
//! - [`change`]: [`ChangeRequestRecorder`] for changes to a pushed plan
//! - [`specs`]: spec file attachment to discipline tasks
//! - [`project`]: `project.yaml`, project layout and the usage log
//!
//! # Usage
//!
//! ```bash
//! planbridge init portal --organization contoso --ado-project Portal
//! planbridge --project portal record breakdown
//! planbridge --project portal push --dry-run
//! planbridge --project portal push --yes
//! ```

pub mod ado;
pub mod change;
pub mod pipeline;
pub mod plan;
pub mod project;
pub mod specs;
pub mod sync;

pub use ado::{AdoClient, AdoConfig, TrackerError, TrackerResult, WorkItemRepository};
pub use change::{ChangeAnalysis, ChangeError, ChangeRequestRecorder};
pub use pipeline::{Command, PipelineError, PipelineFlag, PipelineState};
pub use plan::{load_plan, LoadedPlan, WorkPlan};
pub use project::{Project, ProjectConfig, ProjectError, TrackerSettings};
pub use specs::{SpecUploadReport, SpecUploader};
pub use sync::{HierarchySynchronizer, MappingStore, RemoteIndex, SyncError, SyncReport};
