//! Patch documents
//!
//! Every write to the tracker is an ordered list of add/replace/remove
//! operations applied atomically to one item. Field writes are modelled as a
//! typed [`FieldUpdate`]; anything else goes through [`FieldUpdate::Raw`] or a
//! raw [`PatchOperation`], both validated before serialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ado::error::{TrackerError, TrackerResult};

/// Well-known field reference names.
pub mod field {
    pub const TITLE: &str = "System.Title";
    pub const DESCRIPTION: &str = "System.Description";
    pub const TAGS: &str = "System.Tags";
    pub const STATE: &str = "System.State";
    pub const WORK_ITEM_TYPE: &str = "System.WorkItemType";
    pub const EFFORT: &str = "Microsoft.VSTS.Scheduling.Effort";
    pub const ACCEPTANCE_CRITERIA: &str = "Microsoft.VSTS.Common.AcceptanceCriteria";
}

const FIELDS_PREFIX: &str = "/fields/";

/// JSON-patch verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchVerb {
    Add,
    Replace,
    Remove,
}

/// One operation as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchVerb,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchVerb::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    fn validate(&self) -> TrackerResult<()> {
        if !self.path.starts_with('/') || self.path.len() < 2 {
            return Err(TrackerError::invalid_patch(format!(
                "path must be absolute: {:?}",
                self.path
            )));
        }
        if self.op != PatchVerb::Remove && self.value.is_none() {
            return Err(TrackerError::invalid_patch(format!(
                "{:?} on {} requires a value",
                self.op, self.path
            )));
        }
        Ok(())
    }
}

/// A typed field write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Title(String),
    /// HTML description.
    Description(String),
    Tags(Vec<String>),
    /// Effort in days.
    Effort(f64),
    /// HTML acceptance criteria.
    AcceptanceCriteria(String),
    State(String),
    /// Any other field. `path` is a field reference name, with or without
    /// the `/fields/` prefix.
    Raw { path: String, value: Value },
}

impl FieldUpdate {
    pub fn raw(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Raw {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Normalized `/fields/<name>` path.
    pub fn path(&self) -> TrackerResult<String> {
        let name = match self {
            Self::Title(_) => field::TITLE,
            Self::Description(_) => field::DESCRIPTION,
            Self::Tags(_) => field::TAGS,
            Self::Effort(_) => field::EFFORT,
            Self::AcceptanceCriteria(_) => field::ACCEPTANCE_CRITERIA,
            Self::State(_) => field::STATE,
            Self::Raw { path, .. } => return normalize_field_path(path),
        };
        Ok(format!("{FIELDS_PREFIX}{name}"))
    }

    pub fn value(&self) -> Value {
        match self {
            Self::Title(s) | Self::Description(s) | Self::AcceptanceCriteria(s) | Self::State(s) => {
                Value::String(s.clone())
            }
            Self::Tags(tags) => Value::String(tags.join("; ")),
            Self::Effort(days) => effort_value(*days),
            Self::Raw { value, .. } => value.clone(),
        }
    }

    pub fn to_operation(&self) -> TrackerResult<PatchOperation> {
        Ok(PatchOperation::add(self.path()?, self.value()))
    }
}

fn normalize_field_path(path: &str) -> TrackerResult<String> {
    let name = path.strip_prefix(FIELDS_PREFIX).unwrap_or(path);
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(TrackerError::invalid_patch(format!(
            "invalid field reference: {path:?}"
        )));
    }
    Ok(format!("{FIELDS_PREFIX}{name}"))
}

/// Effort as JSON: whole days serialize as integers.
pub fn effort_value(days: f64) -> Value {
    if days.fract() == 0.0 && days.abs() < i64::MAX as f64 {
        Value::from(days as i64)
    } else {
        Value::from(days)
    }
}

/// A relation appended to an item's `/relations/-`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationLink {
    pub rel: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl RelationLink {
    pub fn new(rel: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            url: url.into(),
            attributes: Map::new(),
        }
    }

    /// Set an attribute; empty strings are skipped.
    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.attributes
                .insert(key.to_string(), Value::String(value.to_string()));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PatchEntry {
    Field(FieldUpdate),
    Relation(RelationLink),
    Operation(PatchOperation),
}

/// Ordered patch document, validated on serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchDocument {
    entries: Vec<PatchEntry>,
}

impl PatchDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, update: FieldUpdate) -> Self {
        self.entries.push(PatchEntry::Field(update));
        self
    }

    pub fn fields(mut self, updates: impl IntoIterator<Item = FieldUpdate>) -> Self {
        self.entries
            .extend(updates.into_iter().map(PatchEntry::Field));
        self
    }

    pub fn relation(mut self, link: RelationLink) -> Self {
        self.entries.push(PatchEntry::Relation(link));
        self
    }

    pub fn operation(mut self, op: PatchOperation) -> Self {
        self.entries.push(PatchEntry::Operation(op));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validated wire operations, in insertion order.
    pub fn operations(&self) -> TrackerResult<Vec<PatchOperation>> {
        if self.entries.is_empty() {
            return Err(TrackerError::invalid_patch("document has no operations"));
        }
        self.entries
            .iter()
            .map(|entry| match entry {
                PatchEntry::Field(update) => update.to_operation(),
                PatchEntry::Relation(link) => {
                    if link.url.is_empty() {
                        return Err(TrackerError::invalid_patch(format!(
                            "relation {} has no target url",
                            link.rel
                        )));
                    }
                    Ok(PatchOperation::add("/relations/-", serde_json::to_value(link)?))
                }
                PatchEntry::Operation(op) => {
                    op.validate()?;
                    Ok(op.clone())
                }
            })
            .collect()
    }

    pub fn to_json(&self) -> TrackerResult<Value> {
        Ok(serde_json::to_value(self.operations()?)?)
    }
}
