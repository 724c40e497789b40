//! Work plan loading and rendering

pub mod model;
pub mod render;

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::sync::error::{SyncError, SyncResult};

pub use model::{
    AcceptanceCriteria, CriteriaGroup, Discipline, PlanEpic, PlanFeature, PlanStory, PlanTotals,
    StoryRef, TechnicalContext, WorkPlan,
};

/// Curated plan, preferred when present.
pub const PUSH_READY_FILE: &str = "push_ready.json";
/// Raw breakdown, used when no curated plan exists.
pub const BREAKDOWN_FILE: &str = "breakdown.json";

/// A plan together with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: WorkPlan,
    pub source: PathBuf,
}

/// Load the curated plan from `output_dir`, falling back to the breakdown.
///
/// A candidate that is missing, unparsable or lacks an `epics` array is
/// skipped with a warning.
pub fn load_plan(output_dir: &Path) -> SyncResult<LoadedPlan> {
    let candidates = [PUSH_READY_FILE, BREAKDOWN_FILE];
    for name in candidates {
        let path = output_dir.join(name);
        if !path.exists() {
            continue;
        }
        match read_plan(&path) {
            Ok(Some(plan)) => {
                if name == BREAKDOWN_FILE {
                    info!(path = %path.display(), "Using breakdown, no curated plan found");
                }
                return Ok(LoadedPlan { plan, source: path });
            }
            Ok(None) => warn!(path = %path.display(), "Plan file has no epics array, skipping"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to parse plan file"),
        }
    }
    Err(SyncError::no_plan(output_dir, &candidates))
}

fn read_plan(path: &Path) -> SyncResult<Option<WorkPlan>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;
    if !value.get("epics").is_some_and(Value::is_array) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}
