//! Work plan → tracker synchronization
//!
//! - [`engine`]: [`HierarchySynchronizer`], the create-or-reuse walk
//! - [`mapping`]: the persisted resume mapping
//! - [`index`]: title index used for epic/feature dedup
//! - [`report`]: counts and events returned to the caller

pub mod engine;
pub mod error;
pub mod index;
mod links;
pub mod mapping;
pub mod report;

pub use engine::HierarchySynchronizer;
pub use error::{SyncError, SyncResult};
pub use index::RemoteIndex;
pub use mapping::{MappingState, MappingStore, RelationRecord, StoryMapping, MAPPING_FILE};
pub use report::{SyncEvent, SyncPreview, SyncReport};
