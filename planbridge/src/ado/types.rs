//! Tracker data types

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ado::error::{TrackerError, TrackerResult};
use crate::ado::patch::{field, RelationLink};

/// The four work-item levels this system writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    Epic,
    Feature,
    #[serde(rename = "User Story")]
    UserStory,
    Task,
}

impl ItemKind {
    /// Work item type name as the service spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epic => "Epic",
            Self::Feature => "Feature",
            Self::UserStory => "User Story",
            Self::Task => "Task",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Epic" => Some(Self::Epic),
            "Feature" => Some(Self::Feature),
            "User Story" => Some(Self::UserStory),
            "Task" => Some(Self::Task),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation types used between items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Points at the item's parent.
    Parent,
    /// Points at a child item.
    Child,
    /// Points at an item this one depends on.
    Predecessor,
    Successor,
    Related,
}

impl RelationKind {
    pub fn rel(&self) -> &'static str {
        match self {
            Self::Parent => "System.LinkTypes.Hierarchy-Reverse",
            Self::Child => "System.LinkTypes.Hierarchy-Forward",
            Self::Predecessor => "System.LinkTypes.Dependency-Reverse",
            Self::Successor => "System.LinkTypes.Dependency-Forward",
            Self::Related => "System.LinkTypes.Related",
        }
    }
}

pub const ATTACHED_FILE_REL: &str = "AttachedFile";
pub const ARTIFACT_LINK_REL: &str = "ArtifactLink";

/// How much of an item to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expand {
    None,
    #[default]
    Relations,
    Fields,
    All,
}

impl Expand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Relations => "relations",
            Self::Fields => "fields",
            Self::All => "all",
        }
    }
}

#[derive(Deserialize)]
struct RawItem {
    id: u64,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    relations: Option<Vec<RelationLink>>,
}

/// A work item as returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub id: u64,
    /// `None` for types outside the four-level hierarchy.
    pub kind: Option<ItemKind>,
    pub title: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub fields: Map<String, Value>,
    pub relations: Vec<RelationLink>,
}

impl RemoteItem {
    pub fn from_value(source: &str, value: Value) -> TrackerResult<Self> {
        let raw: RawItem = serde_json::from_value(value)
            .map_err(|e| TrackerError::malformed(source, format!("not a work item: {e}")))?;

        let text = |name: &str| {
            raw.fields
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let tags = text(field::TAGS)
            .split(';')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            id: raw.id,
            kind: ItemKind::parse(&text(field::WORK_ITEM_TYPE)),
            title: text(field::TITLE),
            description: text(field::DESCRIPTION),
            tags,
            relations: raw.relations.unwrap_or_default(),
            fields: raw.fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn state(&self) -> Option<&str> {
        self.field(field::STATE).and_then(Value::as_str)
    }

    /// Targets of relations of the given kind, as item ids.
    pub fn related_ids(&self, kind: RelationKind) -> Vec<u64> {
        self.relations
            .iter()
            .filter(|r| r.rel == kind.rel())
            .filter_map(|r| item_id_from_url(&r.url))
            .collect()
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.related_ids(RelationKind::Parent).into_iter().next()
    }
}

/// Trailing numeric segment of a work-item url.
pub fn item_id_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Blob reference returned by the attachment upload phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub url: String,
}

/// Result of a wiki page lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLookup {
    Found { content: String, etag: String },
    NotFound,
}

impl PageLookup {
    pub fn etag(&self) -> Option<&str> {
        match self {
            Self::Found { etag, .. } if !etag.is_empty() => Some(etag),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub wiki_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub remote_url: Option<String>,
}

/// Flat listing entry used by hierarchy snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: u64,
    pub title: String,
    pub state: String,
    pub tags: Vec<String>,
}

impl From<&RemoteItem> for ItemSummary {
    fn from(item: &RemoteItem) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            state: item.state().unwrap_or_default().to_string(),
            tags: item.tags.iter().cloned().collect(),
        }
    }
}

/// Every epic, feature and story in the project, bucketed by level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchySnapshot {
    pub epics: Vec<ItemSummary>,
    pub features: Vec<ItemSummary>,
    pub stories: Vec<ItemSummary>,
}
