//! Change analysis document
//!
//! The analysis is produced outside this crate and handed over as JSON:
//!
//! ```json
//! {
//!   "summary": "Add CSV export",
//!   "classification": "new_scope",
//!   "impact": {"total_delta_days": 4, "total_delta_cost": 2700},
//!   "new_stories": [{"title": "Export orders", "fe_days": 1, "be_days": 3}],
//!   "modified_stories": [{"ado_id": 812, "fields": {"System.Title": "..."}}],
//!   "recommendation": "Approve"
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::change::error::{ChangeError, ChangeResult};
use crate::plan::PlanStory;

fn default_summary() -> String {
    "Change request".to_string()
}

fn default_classification() -> String {
    "unknown".to_string()
}

fn unknown() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    #[serde(default)]
    pub total_delta_days: f64,
    #[serde(default)]
    pub total_delta_cost: f64,
    #[serde(default = "unknown")]
    pub risk_assessment: String,
    #[serde(default = "unknown")]
    pub timeline_impact: String,
}

impl Default for Impact {
    fn default() -> Self {
        Self {
            total_delta_days: 0.0,
            total_delta_cost: 0.0,
            risk_assessment: unknown(),
            timeline_impact: unknown(),
        }
    }
}

/// A story the change request adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStorySpec {
    #[serde(flatten)]
    pub story: PlanStory,
    #[serde(default)]
    pub epic: String,
    #[serde(default)]
    pub feature: String,
}

/// An existing story the change request touches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryModification {
    #[serde(default)]
    pub ado_id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    /// Field reference name to new value.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub original_id: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub change_description: String,
}

impl StoryModification {
    pub fn label(&self) -> String {
        match (&self.title, self.ado_id) {
            (Some(title), _) => title.clone(),
            (None, Some(id)) => format!("#{id}"),
            (None, None) => "unidentified story".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAnalysis {
    #[serde(default = "default_summary")]
    pub summary: String,
    #[serde(default = "default_classification")]
    pub classification: String,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub new_stories: Vec<NewStorySpec>,
    #[serde(default)]
    pub modified_stories: Vec<StoryModification>,
    #[serde(default)]
    pub recommendation: String,
}

impl ChangeAnalysis {
    pub fn from_file(path: &Path) -> ChangeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| ChangeError::InvalidAnalysis {
            path: path.to_path_buf(),
            source,
        })
    }
}
