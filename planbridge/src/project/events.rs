//! Project timeline
//!
//! `output/events.json` is a JSON array of [`Event`] in the order they
//! happened. Viewers render it as the project history. A corrupt file reads
//! as empty and is replaced on the next append.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::project::error::ProjectResult;

pub const EVENTS_FILE: &str = "events.json";

/// A pipeline step finished; data carries `command` and the cleared flags.
pub const STEP_COMPLETED: &str = "step_completed";
/// A change request was filed; data carries its id and created items.
pub const CHANGE_RECORDED: &str = "change_recorded";
/// A wiki page was created or updated.
pub const WIKI_PUBLISHED: &str = "wiki_published";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now().to_rfc3339(),
            data: Map::new(),
        }
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(EVENTS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn events(&self) -> Vec<Event> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Event log is corrupt, starting over");
            Vec::new()
        })
    }

    pub fn append(&self, event: Event) -> ProjectResult<()> {
        let mut events = self.events();
        events.push(event);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, serde_json::to_string_pretty(&events)?)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
