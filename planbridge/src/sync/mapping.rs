//! Resume mapping
//!
//! The mapping is a cache of local id → remote id assignments. It is rewritten
//! after every story creation so a crash loses at most the item in flight.
//! Writes go to a temp file and are renamed into place after the previous
//! version is copied to `.backup`; a corrupt primary is recovered from the
//! backup, or treated as empty.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ado::RelationKind;
use crate::sync::error::SyncResult;

/// File name under the project's output directory.
pub const MAPPING_FILE: &str = "ado_mapping.json";

/// One created story. Keys match the file format read by downstream tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMapping {
    #[serde(rename = "ado_id")]
    pub remote_id: u64,
    #[serde(rename = "id")]
    pub local_id: String,
    pub title: String,
    pub epic: String,
    pub feature: String,
}

/// A relation edge already created between two stories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub source: String,
    pub target: String,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingState {
    pub epics: BTreeMap<String, u64>,
    pub features: BTreeMap<String, u64>,
    pub stories: Vec<StoryMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationRecord>,
}

impl MappingState {
    pub fn story(&self, local_id: &str) -> Option<&StoryMapping> {
        self.stories.iter().find(|s| s.local_id == local_id)
    }

    pub fn story_remote_id(&self, local_id: &str) -> Option<u64> {
        self.story(local_id).map(|s| s.remote_id)
    }

    /// Record a created story. A local id already present is left unchanged.
    pub fn record_story(&mut self, entry: StoryMapping) -> bool {
        if self.story(&entry.local_id).is_some() {
            return false;
        }
        self.stories.push(entry);
        true
    }

    /// Local id → remote id for every story.
    pub fn story_index(&self) -> HashMap<&str, u64> {
        self.stories
            .iter()
            .map(|s| (s.local_id.as_str(), s.remote_id))
            .collect()
    }

    pub fn has_relation(&self, source: &str, target: &str, kind: RelationKind) -> bool {
        self.relations
            .iter()
            .any(|r| r.source == source && r.target == target && r.kind == kind)
    }

    pub fn record_relation(&mut self, source: &str, target: &str, kind: RelationKind) {
        if !self.has_relation(source, target, kind) {
            self.relations.push(RelationRecord {
                source: source.to_string(),
                target: target.to_string(),
                kind,
            });
        }
    }
}

/// Durable home of a [`MappingState`].
#[derive(Debug, Clone)]
pub struct MappingStore {
    path: PathBuf,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<output_dir>/ado_mapping.json`.
    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(MAPPING_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        self.path.with_extension("json.backup")
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    fn read(path: &Path) -> Result<MappingState, String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        serde_json::from_str(&content).map_err(|e| e.to_string())
    }

    /// Load the mapping, recovering from the backup when the primary is
    /// missing or corrupt. Never fails: unreadable state is treated as empty.
    pub fn load(&self) -> MappingState {
        if self.path.exists() {
            match Self::read(&self.path) {
                Ok(state) => return state,
                Err(message) => {
                    warn!(path = %self.path.display(), %message, "Mapping is corrupt, trying backup")
                }
            }
        }

        let backup = self.backup_path();
        if backup.exists() {
            match Self::read(&backup) {
                Ok(state) => {
                    info!(path = %backup.display(), "Recovered mapping from backup");
                    // The corrupt primary must not overwrite the good backup.
                    if let Err(e) = self.write_primary(&state) {
                        warn!(error = %e, "Failed to restore recovered mapping");
                    }
                    return state;
                }
                Err(message) => warn!(path = %backup.display(), %message, "Mapping backup is corrupt too"),
            }
        }

        if self.path.exists() || backup.exists() {
            warn!("Starting from an empty mapping; old files are kept for manual recovery");
        }
        MappingState::default()
    }

    /// Write atomically, keeping the previous version as `.backup`.
    pub fn save(&self, state: &MappingState) -> SyncResult<()> {
        if self.path.exists() {
            if let Err(e) = std::fs::copy(&self.path, self.backup_path()) {
                warn!(error = %e, "Failed to back up mapping");
            }
        }
        self.write_primary(state)
    }

    /// Replace the primary file via temp file and rename, leaving `.backup` alone.
    fn write_primary(&self, state: &MappingState) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
