//! REST client for the work-item service
//!
//! [`AdoClient`] builds endpoint urls from an [`AdoConfig`], sends every call
//! through a [`Transport`] and decodes responses into typed records.

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::ado::error::{TrackerError, TrackerResult};
use crate::ado::patch::{FieldUpdate, PatchDocument, RelationLink};
use crate::ado::repository::{wiql_literal, NewItem, WorkItemRepository};
use crate::ado::transport::{
    ApiCallStats, Call, HttpBackend, ReqwestBackend, RequestBody, Transport, TransportConfig,
};
use crate::ado::types::{
    AttachmentRef, Expand, HierarchySnapshot, ItemKind, ItemSummary, ProjectInfo, RelationKind,
    RemoteItem, RepositoryInfo, ARTIFACT_LINK_REL, ATTACHED_FILE_REL,
};

/// Ids per detail fetch.
pub const DETAIL_BATCH_SIZE: usize = 200;

pub const DEFAULT_API_BASE: &str = "https://dev.azure.com";
pub const DEFAULT_API_VERSION: &str = "7.1";

/// Connection settings for one organization/project pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdoConfig {
    pub organization: String,
    pub project: String,
    pub credential: String,
    pub api_base: String,
    pub api_version: String,
}

impl AdoConfig {
    /// Validated config against the default host.
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        credential: impl Into<String>,
    ) -> TrackerResult<Self> {
        let config = Self {
            organization: organization.into(),
            project: project.into(),
            credential: credential.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Apply `PLANBRIDGE_API_BASE` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base) = std::env::var("PLANBRIDGE_API_BASE") {
            if !base.trim().is_empty() {
                self.api_base = base.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let missing: Vec<&str> = [
            ("organization", &self.organization),
            ("project", &self.project),
            ("credential", &self.credential),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(TrackerError::config(format!(
                "tracker not configured, missing: {}",
                missing.join(", ")
            )));
        }
        self.base_url().map(|_| ())
    }

    fn base_url(&self) -> TrackerResult<Url> {
        let url = Url::parse(&self.api_base)
            .map_err(|e| TrackerError::config(format!("invalid api base {:?}: {e}", self.api_base)))?;
        if url.cannot_be_a_base() {
            return Err(TrackerError::config(format!(
                "api base {:?} cannot carry a path",
                self.api_base
            )));
        }
        Ok(url)
    }
}

/// Where an endpoint lives.
#[derive(Debug, Clone, Copy)]
enum Scope {
    /// `{base}/{org}/_apis/...`
    Organization,
    /// `{base}/{org}/{project}/_apis/...`
    Project,
}

/// Typed client for work items, repositories and wikis.
pub struct AdoClient<B = ReqwestBackend> {
    config: AdoConfig,
    transport: Transport<B>,
}

impl AdoClient<ReqwestBackend> {
    /// Client over the production HTTP backend.
    pub fn connect(config: AdoConfig, transport: TransportConfig) -> TrackerResult<Self> {
        config.validate()?;
        let transport = Transport::connect(&config.credential, transport)?;
        Ok(Self { config, transport })
    }
}

impl<B: HttpBackend> AdoClient<B> {
    pub fn with_backend(
        config: AdoConfig,
        backend: B,
        transport: TransportConfig,
    ) -> TrackerResult<Self> {
        config.validate()?;
        let transport = Transport::new(backend, &config.credential, transport);
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &AdoConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport<B> {
        &self.transport
    }

    /// Call stats for the operation that just finished; resets the counters.
    pub fn take_stats(&self) -> ApiCallStats {
        self.transport.take_stats()
    }

    fn endpoint(&self, scope: Scope, segments: &[&str], query: &[(&str, &str)]) -> TrackerResult<Url> {
        let mut url = self.config.base_url()?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| TrackerError::config("api base cannot carry a path"))?;
            path.pop_if_empty().push(&self.config.organization);
            if let Scope::Project = scope {
                path.push(&self.config.project);
            }
            path.push("_apis").extend(segments);
        }
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("api-version", &self.config.api_version);
        }
        Ok(url)
    }

    pub(crate) fn project_endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> TrackerResult<Url> {
        self.endpoint(Scope::Project, segments, query)
    }

    /// Canonical url of an item, as used in relation targets.
    pub fn work_item_url(&self, id: u64) -> TrackerResult<String> {
        let mut url = self.config.base_url()?;
        url.path_segments_mut()
            .map_err(|_| TrackerError::config("api base cannot carry a path"))?
            .pop_if_empty()
            .push(&self.config.organization)
            .extend(["_apis", "wit", "workItems", &id.to_string()]);
        Ok(url.to_string())
    }

    async fn send_patch(&self, url: Url, method: Method, doc: &PatchDocument) -> TrackerResult<RemoteItem> {
        let source = url.to_string();
        let call = Call::new(method, url).body(RequestBody::JsonPatch(doc.to_json()?));
        let value = self.transport.request(call).await?;
        RemoteItem::from_value(&source, value)
    }

    async fn patch_item(&self, id: u64, doc: &PatchDocument) -> TrackerResult<RemoteItem> {
        let url = self.project_endpoint(&["wit", "workitems", &id.to_string()], &[])?;
        self.send_patch(url, Method::PATCH, doc).await
    }

    /// Full details for `ids`, fetched in batches of [`DETAIL_BATCH_SIZE`].
    pub async fn fetch_details(&self, ids: &[u64], expand: Expand) -> TrackerResult<Vec<RemoteItem>> {
        let mut items = Vec::with_capacity(ids.len());
        for batch in ids.chunks(DETAIL_BATCH_SIZE) {
            let id_list = batch
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let url = self.project_endpoint(
                &["wit", "workitems"],
                &[("ids", &id_list), ("$expand", expand.as_str())],
            )?;
            let source = url.to_string();
            let value = self.transport.request(Call::get(url)).await?;
            for raw in value_list(&source, value)? {
                items.push(RemoteItem::from_value(&source, raw)?);
            }
        }
        Ok(items)
    }

    async fn run_wiql(&self, wiql: &str) -> TrackerResult<(String, Value)> {
        let url = self.project_endpoint(&["wit", "wiql"], &[])?;
        let source = url.to_string();
        let call = Call::new(Method::POST, url).body(RequestBody::Json(json!({ "query": wiql })));
        Ok((source, self.transport.request(call).await?))
    }

    /// Apply an arbitrary validated patch document.
    pub async fn update_raw(&self, id: u64, patch: PatchDocument) -> TrackerResult<RemoteItem> {
        self.patch_item(id, &patch).await
    }

    /// Phase one of an attachment: upload the blob.
    pub async fn upload_blob(&self, bytes: Vec<u8>, filename: &str) -> TrackerResult<AttachmentRef> {
        let url = self.project_endpoint(&["wit", "attachments"], &[("fileName", filename)])?;
        let source = url.to_string();
        let call = Call::new(Method::POST, url).body(RequestBody::Bytes(bytes));
        let value = self.transport.request(call).await?;
        decode(&source, value)
    }

    /// Phase two of an attachment: link an uploaded blob to an item.
    pub async fn link_attachment(
        &self,
        item_id: u64,
        attachment_url: &str,
        comment: &str,
    ) -> TrackerResult<RemoteItem> {
        let link = RelationLink::new(ATTACHED_FILE_REL, attachment_url).attribute("comment", comment);
        self.patch_item(item_id, &PatchDocument::new().relation(link))
            .await
    }

    /// True when the configured project answers with an id.
    pub async fn test_connection(&self) -> bool {
        match self.project_info().await {
            Ok(info) => !info.id.is_empty(),
            Err(e) => {
                warn!(project = %self.config.project, error = %e, "Tracker connection check failed");
                false
            }
        }
    }

    pub async fn project_info(&self) -> TrackerResult<ProjectInfo> {
        let url = self.endpoint(Scope::Organization, &["projects", &self.config.project], &[])?;
        let source = url.to_string();
        let value = self.transport.request(Call::get(url)).await?;
        decode(&source, value)
    }

    pub async fn list_repositories(&self) -> TrackerResult<Vec<RepositoryInfo>> {
        let url = self.project_endpoint(&["git", "repositories"], &[])?;
        let source = url.to_string();
        let value = self.transport.request(Call::get(url)).await?;
        value_list(&source, value)?
            .into_iter()
            .map(|raw| decode(&source, raw))
            .collect()
    }

    /// Find a repository by case-insensitive name, creating it when absent.
    pub async fn ensure_repository(&self, name: &str) -> TrackerResult<RepositoryInfo> {
        let wanted = name.to_lowercase();
        if let Some(existing) = self
            .list_repositories()
            .await?
            .into_iter()
            .find(|repo| repo.name.to_lowercase() == wanted)
        {
            debug!(repository = %existing.name, "Repository already exists");
            return Ok(existing);
        }

        let url = self.project_endpoint(&["git", "repositories"], &[])?;
        let source = url.to_string();
        let call = Call::new(Method::POST, url).body(RequestBody::Json(json!({ "name": name })));
        let created: RepositoryInfo = decode(&source, self.transport.request(call).await?)?;
        info!(repository = %created.name, id = %created.id, "Created repository");
        Ok(created)
    }

    /// Every epic, feature and story in the project.
    pub async fn fetch_hierarchy(&self) -> TrackerResult<HierarchySnapshot> {
        let wiql = "SELECT [System.Id], [System.Title], [System.WorkItemType], \
                    [System.Description], [System.Tags], [System.State] \
                    FROM WorkItems WHERE [System.WorkItemType] IN ('Epic', 'Feature', 'User Story') \
                    ORDER BY [System.WorkItemType] ASC, [System.Id] ASC";
        let mut snapshot = HierarchySnapshot::default();
        for item in self.query(wiql).await? {
            let bucket = match item.kind {
                Some(ItemKind::Epic) => &mut snapshot.epics,
                Some(ItemKind::Feature) => &mut snapshot.features,
                Some(ItemKind::UserStory) => &mut snapshot.stories,
                _ => continue,
            };
            bucket.push(ItemSummary::from(&item));
        }
        Ok(snapshot)
    }

    /// All user stories, optionally restricted to a tag.
    pub async fn stories_by_tag(&self, tag: Option<&str>) -> TrackerResult<Vec<RemoteItem>> {
        let mut wiql = String::from(
            "SELECT [System.Id], [System.Title], [System.Description], [System.Tags], [System.State] \
             FROM WorkItems WHERE [System.WorkItemType] = 'User Story'",
        );
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            wiql.push_str(&format!(" AND [System.Tags] CONTAINS {}", wiql_literal(tag)));
        }
        wiql.push_str(" ORDER BY [System.Id] ASC");
        self.query(&wiql).await
    }
}

#[async_trait]
impl<B: HttpBackend> WorkItemRepository for AdoClient<B> {
    async fn create_item(&self, item: NewItem) -> TrackerResult<RemoteItem> {
        let type_segment = format!("${}", item.kind.as_str());
        let url = self.project_endpoint(&["wit", "workitems", &type_segment], &[])?;
        let parent_url = item.parent.map(|id| self.work_item_url(id)).transpose()?;
        let created = self
            .send_patch(url, Method::POST, &item.to_patch(parent_url))
            .await?;
        debug!(kind = %item.kind, id = created.id, title = %item.title, "Created work item");
        Ok(created)
    }

    async fn update_fields(&self, id: u64, fields: Vec<FieldUpdate>) -> TrackerResult<RemoteItem> {
        self.patch_item(id, &PatchDocument::new().fields(fields)).await
    }

    async fn update_raw(&self, id: u64, patch: PatchDocument) -> TrackerResult<RemoteItem> {
        AdoClient::update_raw(self, id, patch).await
    }

    async fn add_relation(
        &self,
        source: u64,
        target: u64,
        kind: RelationKind,
        comment: Option<String>,
    ) -> TrackerResult<RemoteItem> {
        let link = RelationLink::new(kind.rel(), self.work_item_url(target)?)
            .attribute("comment", comment.as_deref().unwrap_or_default());
        self.patch_item(source, &PatchDocument::new().relation(link))
            .await
    }

    async fn add_artifact_link(
        &self,
        id: u64,
        uri: &str,
        name: &str,
        comment: Option<String>,
    ) -> TrackerResult<RemoteItem> {
        let link = RelationLink::new(ARTIFACT_LINK_REL, uri)
            .attribute("name", name)
            .attribute("comment", comment.as_deref().unwrap_or_default());
        self.patch_item(id, &PatchDocument::new().relation(link))
            .await
    }

    async fn query(&self, wiql: &str) -> TrackerResult<Vec<RemoteItem>> {
        let (source, result) = self.run_wiql(wiql).await?;
        let ids: Vec<u64> = result
            .get("workItems")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.get("id").and_then(Value::as_u64))
                    .collect()
            })
            .unwrap_or_default();
        debug!(%source, hits = ids.len(), "Query returned");
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_details(&ids, Expand::Relations).await
    }

    async fn get_item(&self, id: u64, expand: Expand) -> TrackerResult<Option<RemoteItem>> {
        let url = self.project_endpoint(
            &["wit", "workitems", &id.to_string()],
            &[("$expand", expand.as_str())],
        )?;
        let source = url.to_string();
        match self.transport.request(Call::get(url)).await {
            Ok(value) => RemoteItem::from_value(&source, value).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_children(&self, parent: u64) -> TrackerResult<Vec<RemoteItem>> {
        let wiql = format!(
            "SELECT [System.Id], [System.Title], [System.WorkItemType] \
             FROM WorkItemLinks \
             WHERE ([Source].[System.Id] = {parent}) \
             AND ([System.Links.LinkType] = '{}') \
             MODE (MustContain)",
            RelationKind::Child.rel()
        );
        let (_, result) = self.run_wiql(&wiql).await?;

        let mut child_ids: Vec<u64> = Vec::new();
        for relation in result
            .get("workItemRelations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let target = relation
                .get("target")
                .and_then(|t| t.get("id"))
                .and_then(Value::as_u64);
            if let Some(id) = target.filter(|id| *id != parent) {
                if !child_ids.contains(&id) {
                    child_ids.push(id);
                }
            }
        }

        if child_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_details(&child_ids, Expand::None).await
    }

    async fn upload_attachment(
        &self,
        item_id: u64,
        bytes: Vec<u8>,
        filename: &str,
        comment: Option<String>,
    ) -> TrackerResult<AttachmentRef> {
        let attachment = self.upload_blob(bytes, filename).await?;
        let comment = comment.filter(|c| !c.is_empty()).unwrap_or_else(|| filename.to_string());
        self.link_attachment(item_id, &attachment.url, &comment)
            .await?;
        debug!(item_id, filename, attachment = %attachment.id, "Attached file");
        Ok(attachment)
    }
}

/// The `value` array of a list response.
pub(crate) fn value_list(source: &str, value: Value) -> TrackerResult<Vec<Value>> {
    match value {
        Value::Object(mut map) => match map.remove("value") {
            Some(Value::Array(items)) => Ok(items),
            None => Ok(Vec::new()),
            Some(other) => Err(TrackerError::malformed(
                source,
                format!("expected a value array, got {other}"),
            )),
        },
        other => Err(TrackerError::malformed(
            source,
            format!("expected an object, got {other}"),
        )),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(source: &str, value: Value) -> TrackerResult<T> {
    serde_json::from_value(value).map_err(|e| TrackerError::malformed(source, e.to_string()))
}
