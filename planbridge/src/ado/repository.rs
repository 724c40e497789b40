//! Work-item repository seam
//!
//! The synchronizer, change recorder and spec uploader talk to the tracker
//! only through [`WorkItemRepository`]. [`crate::ado::AdoClient`] implements
//! it over HTTP.

use async_trait::async_trait;

use crate::ado::error::TrackerResult;
use crate::ado::patch::{FieldUpdate, PatchDocument, RelationLink};
use crate::ado::types::{AttachmentRef, Expand, ItemKind, RelationKind, RemoteItem};

/// Everything needed to create one item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub kind: ItemKind,
    pub title: String,
    /// HTML description; omitted from the patch when empty.
    pub description: String,
    pub tags: Vec<String>,
    pub parent: Option<u64>,
    pub extra_fields: Vec<FieldUpdate>,
}

impl NewItem {
    pub fn new(kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            parent: None,
            extra_fields: Vec::new(),
        }
    }

    pub fn description(mut self, html: impl Into<String>) -> Self {
        self.description = html.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn parent(mut self, parent: Option<u64>) -> Self {
        self.parent = parent;
        self
    }

    pub fn field(mut self, update: FieldUpdate) -> Self {
        self.extra_fields.push(update);
        self
    }

    /// Patch document for the create call. `parent_url` is the resolved url
    /// of `self.parent`.
    pub fn to_patch(&self, parent_url: Option<String>) -> PatchDocument {
        let mut doc = PatchDocument::new().field(FieldUpdate::Title(self.title.clone()));
        if !self.description.is_empty() {
            doc = doc.field(FieldUpdate::Description(self.description.clone()));
        }
        if !self.tags.is_empty() {
            doc = doc.field(FieldUpdate::Tags(self.tags.clone()));
        }
        if let Some(url) = parent_url {
            doc = doc.relation(RelationLink::new(RelationKind::Parent.rel(), url));
        }
        doc.fields(self.extra_fields.iter().cloned())
    }
}

/// Typed work-item operations.
#[async_trait]
pub trait WorkItemRepository: Send + Sync {
    async fn create_item(&self, item: NewItem) -> TrackerResult<RemoteItem>;

    async fn update_fields(&self, id: u64, fields: Vec<FieldUpdate>) -> TrackerResult<RemoteItem>;

    /// Send an arbitrary validated patch document.
    async fn update_raw(&self, id: u64, patch: PatchDocument) -> TrackerResult<RemoteItem>;

    async fn add_relation(
        &self,
        source: u64,
        target: u64,
        kind: RelationKind,
        comment: Option<String>,
    ) -> TrackerResult<RemoteItem>;

    async fn add_artifact_link(
        &self,
        id: u64,
        uri: &str,
        name: &str,
        comment: Option<String>,
    ) -> TrackerResult<RemoteItem>;

    /// Run a structured query and fetch full details of every hit.
    async fn query(&self, wiql: &str) -> TrackerResult<Vec<RemoteItem>>;

    /// `None` when the service answers 404.
    async fn get_item(&self, id: u64, expand: Expand) -> TrackerResult<Option<RemoteItem>>;

    /// Direct children of `parent`, never including the parent itself.
    async fn get_children(&self, parent: u64) -> TrackerResult<Vec<RemoteItem>>;

    /// Upload the bytes as a blob, then link it to the item.
    async fn upload_attachment(
        &self,
        item_id: u64,
        bytes: Vec<u8>,
        filename: &str,
        comment: Option<String>,
    ) -> TrackerResult<AttachmentRef>;
}

/// Quote a string literal for a structured query.
pub fn wiql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
