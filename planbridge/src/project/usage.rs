//! Per-project usage log
//!
//! `output/pipeline_usage.json` is a JSON array of [`UsageEntry`], one per
//! command that talked to the tracker. A corrupt file reads as empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::ado::ApiCallStats;
use crate::project::error::ProjectResult;

pub const USAGE_FILE: &str = "pipeline_usage.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub operation: String,
    pub timestamp: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub ado_api_calls: u64,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl UsageEntry {
    /// Entry stamped now, carrying the call count and wire time of `stats`.
    pub fn new(operation: impl Into<String>, stats: &ApiCallStats) -> Self {
        Self {
            operation: operation.into(),
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            duration_seconds: Some(stats.rounded_seconds()),
            ado_api_calls: stats.count,
            details: Map::new(),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Aggregate for one operation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationUsage {
    pub runs: u64,
    pub ado_calls: u64,
    pub seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_operations: u64,
    pub total_ado_api_calls: u64,
    pub by_operation: BTreeMap<String, OperationUsage>,
    pub first_operation: Option<String>,
    pub last_operation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(USAGE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Vec<UsageEntry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Usage log is corrupt, starting over");
                Vec::new()
            }
        }
    }

    pub fn append(&self, entry: UsageEntry) -> ProjectResult<()> {
        let mut entries = self.entries();
        entries.push(entry);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, serde_json::to_string_pretty(&entries)?)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    pub fn summary(&self) -> UsageSummary {
        let entries = self.entries();
        let mut summary = UsageSummary {
            total_operations: entries.len() as u64,
            first_operation: entries.first().map(|e| e.timestamp.clone()),
            last_operation: entries.last().map(|e| e.timestamp.clone()),
            ..Default::default()
        };

        for entry in &entries {
            summary.total_ado_api_calls += entry.ado_api_calls;
            let op = summary.by_operation.entry(entry.operation.clone()).or_default();
            op.runs += 1;
            op.ado_calls += entry.ado_api_calls;
            op.seconds += entry.duration_seconds.unwrap_or(0.0);
        }
        summary
    }
}
