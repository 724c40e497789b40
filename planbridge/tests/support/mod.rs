//! In-memory work-item service for integration tests.
//!
//! [`FakeTracker`] answers the REST calls the client makes (work items, WIQL,
//! attachments, projects, repositories, wikis) from shared state, so tests
//! drive the real `AdoClient` and transport end to end.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Map, Value};

use planbridge::ado::transport::{BackendError, WireRequest, WireResponse};
use planbridge::ado::{AdoClient, AdoConfig, HttpBackend, TransportConfig};

pub const ORG: &str = "contoso";
pub const PROJECT: &str = "Portal";
pub const PROJECT_ID: &str = "6ce954b1-ce1f-45d1-b94d-e6bf2464ba2c";

const TYPES: [&str; 4] = ["Epic", "Feature", "User Story", "Task"];

#[derive(Default)]
struct State {
    next_id: u64,
    items: BTreeMap<u64, Value>,
    requests: Vec<(Method, String)>,
    detail_batches: Vec<usize>,
    scripted: VecDeque<u16>,
    reject_titles: Vec<String>,
    attachments: Vec<String>,
    repositories: Vec<Value>,
    wikis: Vec<Value>,
    pages: BTreeMap<String, (String, u32)>,
    wiki_attachments: Vec<String>,
}

/// Shared handle; clones see the same service.
#[derive(Clone)]
pub struct FakeTracker {
    state: Arc<Mutex<State>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_id: 1,
                ..State::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// The next `times` requests answer `status` with an empty body.
    pub fn script(&self, status: u16, times: usize) {
        let mut state = self.lock();
        state.scripted.extend(std::iter::repeat(status).take(times));
    }

    /// Creates whose title contains `needle` answer 400.
    pub fn reject_title(&self, needle: &str) {
        self.lock().reject_titles.push(needle.to_string());
    }

    pub fn clear_rejections(&self) {
        self.lock().reject_titles.clear();
    }

    /// Insert an item directly, bypassing the API.
    pub fn seed(&self, kind: &str, title: &str, parent: Option<u64>) -> u64 {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let mut item = new_item(id, kind);
        item["fields"]["System.Title"] = json!(title);
        if let Some(parent) = parent {
            item["relations"]
                .as_array_mut()
                .unwrap()
                .push(json!({"rel": "System.LinkTypes.Hierarchy-Reverse", "url": item_url(parent)}));
        }
        state.items.insert(id, item);
        id
    }

    pub fn item(&self, id: u64) -> Option<Value> {
        self.lock().items.get(&id).cloned()
    }

    /// `(id, title)` of every item of `kind`, by id.
    pub fn titles(&self, kind: &str) -> Vec<(u64, String)> {
        self.lock()
            .items
            .iter()
            .filter(|(_, item)| item["fields"]["System.WorkItemType"] == kind)
            .map(|(id, item)| (*id, item["fields"]["System.Title"].as_str().unwrap_or("").to_string()))
            .collect()
    }

    pub fn parent_of(&self, id: u64) -> Option<u64> {
        self.item(id).and_then(|item| parent_id(&item))
    }

    /// Relations of `id` with the given `rel`, as target ids.
    pub fn related(&self, id: u64, rel: &str) -> Vec<u64> {
        self.item(id)
            .map(|item| {
                relations(&item)
                    .filter(|r| r["rel"] == rel)
                    .filter_map(|r| r["url"].as_str().and_then(id_from_url))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.lock().requests.clone()
    }

    /// Id count of every batched detail fetch, in order.
    pub fn detail_batches(&self) -> Vec<usize> {
        self.lock().detail_batches.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn creates(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|(method, path)| *method == Method::POST && path.contains("/wit/workitems/$"))
            .count()
    }

    pub fn page(&self, path: &str) -> Option<String> {
        self.lock().pages.get(path).map(|(content, _)| content.clone())
    }

    pub fn wiki_attachments(&self) -> Vec<String> {
        self.lock().wiki_attachments.clone()
    }

    pub fn client(&self) -> AdoClient<FakeTracker> {
        client_with(self.clone(), quick())
    }
}

pub fn quick() -> TransportConfig {
    TransportConfig {
        min_interval: Duration::ZERO,
        ..TransportConfig::default()
    }
}

pub fn client_with(fake: FakeTracker, transport: TransportConfig) -> AdoClient<FakeTracker> {
    let config = AdoConfig::new(ORG, PROJECT, "test-pat").unwrap();
    AdoClient::with_backend(config, fake, transport).unwrap()
}

fn item_url(id: u64) -> String {
    format!("https://dev.azure.com/{ORG}/_apis/wit/workItems/{id}")
}

fn id_from_url(url: &str) -> Option<u64> {
    url.rsplit('/').next()?.parse().ok()
}

fn new_item(id: u64, kind: &str) -> Value {
    json!({
        "id": id,
        "fields": {
            "System.WorkItemType": kind,
            "System.State": "New",
            "System.TeamProject": PROJECT,
        },
        "relations": [],
    })
}

fn relations(item: &Value) -> impl Iterator<Item = &Value> {
    item["relations"].as_array().into_iter().flatten()
}

fn parent_id(item: &Value) -> Option<u64> {
    relations(item)
        .find(|r| r["rel"] == "System.LinkTypes.Hierarchy-Reverse")
        .and_then(|r| r["url"].as_str())
        .and_then(id_from_url)
}

fn ok(body: Value) -> WireResponse {
    WireResponse::new(200, body.to_string())
}

fn status(code: u16) -> WireResponse {
    WireResponse::new(code, json!({"message": "fake"}).to_string())
}

fn apply_patch(item: &mut Value, ops: &Value) -> Result<(), WireResponse> {
    let ops = ops.as_array().ok_or_else(|| status(400))?;
    for op in ops {
        let path = op["path"].as_str().ok_or_else(|| status(400))?;
        if path == "/relations/-" {
            item["relations"].as_array_mut().unwrap().push(op["value"].clone());
        } else if let Some(name) = path.strip_prefix("/fields/") {
            item["fields"][name] = op["value"].clone();
        } else {
            return Err(status(400));
        }
    }
    Ok(())
}

fn unescape(literal: &str) -> String {
    literal.replace("''", "'")
}

impl State {
    fn handle(&mut self, request: &WireRequest) -> WireResponse {
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|s| s.map(|seg| seg.replace("%20", " ")).collect())
            .unwrap_or_default();
        let query: BTreeMap<String, String> = request.url.query_pairs().into_owned().collect();
        let body = request.json_body();
        let parts: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (&request.method, parts.as_slice()) {
            (&Method::GET, [ORG, "_apis", "projects", project]) if *project == PROJECT => {
                ok(json!({"id": PROJECT_ID, "name": PROJECT}))
            }
            (_, [ORG, PROJECT, "_apis", rest @ ..]) => self.project_call(&request.method, rest, &query, body, request),
            _ => status(404),
        }
    }

    fn project_call(
        &mut self,
        method: &Method,
        rest: &[&str],
        query: &BTreeMap<String, String>,
        body: Option<Value>,
        request: &WireRequest,
    ) -> WireResponse {
        match (method, rest) {
            (&Method::POST, ["wit", "workitems", kind]) if kind.starts_with('$') => {
                self.create(&kind[1..], body.unwrap_or_default())
            }
            (&Method::PATCH, ["wit", "workitems", id]) => match id.parse::<u64>() {
                Ok(id) => self.update(id, body.unwrap_or_default()),
                Err(_) => status(400),
            },
            (&Method::GET, ["wit", "workitems", id]) => match id.parse::<u64>().ok().and_then(|id| self.items.get(&id)) {
                Some(item) => ok(item.clone()),
                None => status(404),
            },
            (&Method::GET, ["wit", "workitems"]) => {
                let ids: Vec<u64> = query
                    .get("ids")
                    .map(|list| list.split(',').filter_map(|id| id.parse().ok()).collect())
                    .unwrap_or_default();
                self.detail_batches.push(ids.len());
                let value: Vec<Value> = ids.iter().filter_map(|id| self.items.get(id).cloned()).collect();
                ok(json!({"count": value.len(), "value": value}))
            }
            (&Method::POST, ["wit", "wiql"]) => {
                let wiql = body
                    .as_ref()
                    .and_then(|b| b["query"].as_str())
                    .unwrap_or_default()
                    .to_string();
                self.wiql(&wiql)
            }
            (&Method::POST, ["wit", "attachments"]) => {
                let name = query.get("fileName").cloned().unwrap_or_default();
                self.attachments.push(name.clone());
                let id = format!("att-{}", self.attachments.len());
                ok(json!({"id": id, "url": format!("https://dev.azure.com/{ORG}/_apis/wit/attachments/{id}?fileName={name}")}))
            }
            (&Method::GET, ["git", "repositories"]) => ok(json!({"value": self.repositories})),
            (&Method::POST, ["git", "repositories"]) => {
                let name = body.as_ref().and_then(|b| b["name"].as_str()).unwrap_or_default();
                let repo = json!({"id": format!("repo-{}", self.repositories.len() + 1), "name": name});
                self.repositories.push(repo.clone());
                ok(repo)
            }
            (&Method::GET, ["wiki", "wikis"]) => ok(json!({"value": self.wikis})),
            (&Method::POST, ["wiki", "wikis"]) => {
                let body = body.unwrap_or_default();
                if body["projectId"] != PROJECT_ID {
                    return status(400);
                }
                let wiki = json!({"id": "wiki-1", "name": body["name"], "type": body["type"]});
                self.wikis.push(wiki.clone());
                ok(wiki)
            }
            (&Method::GET, ["wiki", "wikis", _, "pages"]) => {
                let path = query.get("path").cloned().unwrap_or_default();
                match self.pages.get(&path) {
                    Some((content, version)) => {
                        ok(json!({"path": path, "content": content})).with_etag(format!("\"{version}\""))
                    }
                    None => status(404),
                }
            }
            (&Method::PUT, ["wiki", "wikis", _, "pages"]) => {
                let path = query.get("path").cloned().unwrap_or_default();
                let content = body
                    .as_ref()
                    .and_then(|b| b["content"].as_str())
                    .unwrap_or_default()
                    .to_string();
                let next = match (self.pages.get(&path), request.if_match.as_deref()) {
                    (None, None) => 1,
                    (Some((_, version)), Some(etag)) if etag == format!("\"{version}\"") => version + 1,
                    (Some(_), Some(_)) => return status(412),
                    (Some(_), None) | (None, Some(_)) => return status(409),
                };
                self.pages.insert(path.clone(), (content.clone(), next));
                ok(json!({"path": path, "content": content}))
            }
            (&Method::PUT, ["wiki", "wikis", _, "attachments"]) => {
                let name = query.get("name").cloned().unwrap_or_default();
                if self.wiki_attachments.contains(&name) {
                    return status(409);
                }
                self.wiki_attachments.push(name.clone());
                ok(json!({"path": format!("/.attachments/{name}")}))
            }
            _ => status(404),
        }
    }

    fn create(&mut self, kind: &str, ops: Value) -> WireResponse {
        if !TYPES.contains(&kind) {
            return status(400);
        }
        let title = ops
            .as_array()
            .into_iter()
            .flatten()
            .find(|op| op["path"] == "/fields/System.Title")
            .and_then(|op| op["value"].as_str())
            .unwrap_or_default()
            .to_string();
        if self.reject_titles.iter().any(|needle| title.contains(needle.as_str())) {
            return status(400);
        }

        let id = self.next_id;
        let mut item = new_item(id, kind);
        if let Err(response) = apply_patch(&mut item, &ops) {
            return response;
        }
        if let Some(parent) = parent_id(&item) {
            if !self.items.contains_key(&parent) {
                return status(400);
            }
        }
        self.next_id += 1;
        self.items.insert(id, item.clone());
        ok(item)
    }

    fn update(&mut self, id: u64, ops: Value) -> WireResponse {
        let Some(mut item) = self.items.get(&id).cloned() else {
            return status(404);
        };
        if let Err(response) = apply_patch(&mut item, &ops) {
            return response;
        }
        self.items.insert(id, item.clone());
        ok(item)
    }

    fn wiql(&self, wiql: &str) -> WireResponse {
        if wiql.contains("FROM WorkItemLinks") {
            let source = Regex::new(r"\[Source\]\.\[System\.Id\] = (\d+)")
                .unwrap()
                .captures(wiql)
                .and_then(|c| c[1].parse::<u64>().ok());
            let Some(source) = source else {
                return status(400);
            };
            let mut rels = vec![json!({"source": null, "target": {"id": source}})];
            for (id, item) in &self.items {
                if parent_id(item) == Some(source) {
                    rels.push(json!({"source": {"id": source}, "target": {"id": id}}));
                }
            }
            return ok(json!({"workItemRelations": rels}));
        }

        let kinds: Vec<&str> = TYPES
            .into_iter()
            .filter(|kind| wiql.contains(&format!("'{kind}'")))
            .collect();
        let title = Regex::new(r"\[System\.Title\] = '((?:[^']|'')*)'")
            .unwrap()
            .captures(wiql)
            .map(|c| unescape(&c[1]));
        let tag = Regex::new(r"\[System\.Tags\] CONTAINS '((?:[^']|'')*)'")
            .unwrap()
            .captures(wiql)
            .map(|c| unescape(&c[1]));
        let skip_removed = wiql.contains("<> 'Removed'");

        let hits: Vec<Value> = self
            .items
            .iter()
            .filter(|(_, item)| {
                let fields = &item["fields"];
                let kind = fields["System.WorkItemType"].as_str().unwrap_or("");
                (kinds.is_empty() || kinds.contains(&kind))
                    && title.as_deref().map_or(true, |t| fields["System.Title"] == t)
                    && tag.as_deref().map_or(true, |t| {
                        fields["System.Tags"]
                            .as_str()
                            .unwrap_or("")
                            .split(';')
                            .any(|have| have.trim() == t)
                    })
                    && !(skip_removed && fields["System.State"] == "Removed")
            })
            .map(|(id, _)| json!({"id": id}))
            .collect();
        ok(json!({"workItems": hits}))
    }
}

#[async_trait]
impl HttpBackend for FakeTracker {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, BackendError> {
        let response = {
            let mut state = self.lock();
            state
                .requests
                .push((request.method.clone(), request.url.path().to_string()));
            match state.scripted.pop_front() {
                Some(code) => status(code),
                None => state.handle(&request),
            }
        };
        Ok(response)
    }
}

/// Item title by id, for assertions.
pub fn title(item: &Value) -> &str {
    item["fields"]["System.Title"].as_str().unwrap_or("")
}

pub fn fields(item: &Value) -> &Map<String, Value> {
    item["fields"].as_object().unwrap()
}
