//! In-memory repository for unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ado::error::{TrackerError, TrackerResult};
use crate::ado::patch::{field, FieldUpdate, PatchDocument, RelationLink};
use crate::ado::repository::{NewItem, WorkItemRepository};
use crate::ado::types::{AttachmentRef, Expand, ItemKind, RelationKind, RemoteItem};

const ITEM_URL: &str = "memory://items/";

#[derive(Default)]
struct State {
    next_id: u64,
    items: BTreeMap<u64, RemoteItem>,
    creates: Vec<(ItemKind, String)>,
    relations: Vec<(u64, u64, RelationKind)>,
    attachments: Vec<(u64, String)>,
    fail_creates_after: Option<usize>,
    fail_titles: Vec<String>,
    fail_queries: bool,
}

pub(crate) struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 100,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every create after the first `n` fails with a 500-class error.
    pub fn fail_creates_after(&self, n: usize) {
        self.lock().fail_creates_after = Some(n);
    }

    /// Creates whose title contains `needle` are rejected.
    pub fn fail_title(&self, needle: &str) {
        self.lock().fail_titles.push(needle.to_string());
    }

    pub fn fail_queries(&self) {
        self.lock().fail_queries = true;
    }

    pub fn seed(&self, kind: ItemKind, title: &str) -> u64 {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.items.insert(id, item(id, kind, title, "", None));
        id
    }

    pub fn creates(&self) -> Vec<(ItemKind, String)> {
        self.lock().creates.clone()
    }

    pub fn relations(&self) -> Vec<(u64, u64, RelationKind)> {
        self.lock().relations.clone()
    }

    pub fn attachments(&self) -> Vec<(u64, String)> {
        self.lock().attachments.clone()
    }

    pub fn item(&self, id: u64) -> Option<RemoteItem> {
        self.lock().items.get(&id).cloned()
    }
}

fn item(id: u64, kind: ItemKind, title: &str, description: &str, parent: Option<u64>) -> RemoteItem {
    let mut fields = Map::new();
    fields.insert("System.WorkItemType".into(), Value::from(kind.as_str()));
    fields.insert("System.Title".into(), Value::from(title));
    RemoteItem {
        id,
        kind: Some(kind),
        title: title.to_string(),
        description: description.to_string(),
        tags: Default::default(),
        fields,
        relations: parent
            .map(|p| vec![RelationLink::new(RelationKind::Parent.rel(), format!("{ITEM_URL}{p}"))])
            .unwrap_or_default(),
    }
}

fn missing(id: u64) -> TrackerError {
    TrackerError::rejected("PATCH", format!("{ITEM_URL}{id}"), 404, "Not Found", "")
}

#[async_trait]
impl WorkItemRepository for MemoryRepository {
    async fn create_item(&self, new: NewItem) -> TrackerResult<RemoteItem> {
        let mut state = self.lock();
        if state.fail_titles.iter().any(|t| new.title.contains(t.as_str()))
            || state
                .fail_creates_after
                .is_some_and(|n| state.creates.len() >= n)
        {
            return Err(TrackerError::retries_exhausted(
                "POST",
                "memory://create",
                3,
                Some(503),
                "unavailable",
            ));
        }
        let id = state.next_id;
        state.next_id += 1;
        let mut created = item(id, new.kind, &new.title, &new.description, new.parent);
        created.tags = new.tags.iter().cloned().collect();
        for update in &new.extra_fields {
            if let Ok(path) = update.path() {
                let name = path.trim_start_matches("/fields/").to_string();
                created.fields.insert(name, update.value());
            }
        }
        state.creates.push((new.kind, new.title.clone()));
        state.items.insert(id, created.clone());
        Ok(created)
    }

    async fn update_fields(&self, id: u64, fields: Vec<FieldUpdate>) -> TrackerResult<RemoteItem> {
        let mut state = self.lock();
        let item = state.items.get_mut(&id).ok_or_else(|| missing(id))?;
        for update in fields {
            let path = update.path()?;
            let name = path.trim_start_matches("/fields/").to_string();
            let value = update.value();
            match (name.as_str(), value.as_str()) {
                (field::TITLE, Some(title)) => item.title = title.to_string(),
                (field::DESCRIPTION, Some(html)) => item.description = html.to_string(),
                _ => {
                    item.fields.insert(name, value);
                }
            }
        }
        Ok(item.clone())
    }

    async fn update_raw(&self, id: u64, patch: PatchDocument) -> TrackerResult<RemoteItem> {
        patch.operations()?;
        self.lock().items.get(&id).cloned().ok_or_else(|| missing(id))
    }

    async fn add_relation(
        &self,
        source: u64,
        target: u64,
        kind: RelationKind,
        _comment: Option<String>,
    ) -> TrackerResult<RemoteItem> {
        let mut state = self.lock();
        if !state.items.contains_key(&target) {
            return Err(missing(target));
        }
        let item = state.items.get_mut(&source).ok_or_else(|| missing(source))?;
        item.relations
            .push(RelationLink::new(kind.rel(), format!("{ITEM_URL}{target}")));
        let updated = item.clone();
        state.relations.push((source, target, kind));
        Ok(updated)
    }

    async fn add_artifact_link(
        &self,
        id: u64,
        uri: &str,
        name: &str,
        _comment: Option<String>,
    ) -> TrackerResult<RemoteItem> {
        let mut state = self.lock();
        let item = state.items.get_mut(&id).ok_or_else(|| missing(id))?;
        item.relations
            .push(RelationLink::new("ArtifactLink", uri).attribute("name", name));
        Ok(item.clone())
    }

    /// Items whose quoted type name appears in the query text.
    async fn query(&self, wiql: &str) -> TrackerResult<Vec<RemoteItem>> {
        let state = self.lock();
        if state.fail_queries {
            return Err(TrackerError::retries_exhausted("POST", "memory://wiql", 3, Some(500), ""));
        }
        Ok(state
            .items
            .values()
            .filter(|item| {
                item.kind
                    .is_some_and(|kind| wiql.contains(&format!("'{}'", kind.as_str())))
            })
            .cloned()
            .collect())
    }

    async fn get_item(&self, id: u64, _expand: Expand) -> TrackerResult<Option<RemoteItem>> {
        Ok(self.lock().items.get(&id).cloned())
    }

    async fn get_children(&self, parent: u64) -> TrackerResult<Vec<RemoteItem>> {
        Ok(self
            .lock()
            .items
            .values()
            .filter(|item| item.parent_id() == Some(parent))
            .cloned()
            .collect())
    }

    async fn upload_attachment(
        &self,
        item_id: u64,
        _bytes: Vec<u8>,
        filename: &str,
        _comment: Option<String>,
    ) -> TrackerResult<AttachmentRef> {
        let mut state = self.lock();
        if !state.items.contains_key(&item_id) {
            return Err(missing(item_id));
        }
        state.attachments.push((item_id, filename.to_string()));
        Ok(AttachmentRef {
            id: format!("att-{}", state.attachments.len()),
            url: format!("memory://attachments/{filename}"),
        })
    }
}
