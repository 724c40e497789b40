//! Wiki operations
//!
//! Page updates are conditional: an existing page is only overwritten when the
//! caller passes the ETag it read, so concurrent editors get a rejection rather
//! than a silent merge.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::ado::client::{decode, value_list, AdoClient};
use crate::ado::error::TrackerResult;
use crate::ado::transport::{decode_json, Call, HttpBackend, RequestBody};
use crate::ado::types::{PageLookup, WikiInfo};

const WIKI_TYPE_PROJECT: &str = "projectWiki";

impl<B: HttpBackend> AdoClient<B> {
    pub async fn list_wikis(&self) -> TrackerResult<Vec<WikiInfo>> {
        let url = self.project_endpoint(&["wiki", "wikis"], &[])?;
        let source = url.to_string();
        let value = self.transport().request(Call::get(url)).await?;
        value_list(&source, value)?
            .into_iter()
            .map(|raw| decode(&source, raw))
            .collect()
    }

    /// Create the project wiki, named `<project>.wiki`.
    pub async fn create_wiki(&self) -> TrackerResult<WikiInfo> {
        let project = self.project_info().await?;
        let url = self.project_endpoint(&["wiki", "wikis"], &[])?;
        let source = url.to_string();
        let body = json!({
            "type": WIKI_TYPE_PROJECT,
            "name": format!("{}.wiki", self.config().project),
            "projectId": project.id,
        });
        let call = Call::new(Method::POST, url).body(RequestBody::Json(body));
        let wiki: WikiInfo = decode(&source, self.transport().request(call).await?)?;
        info!(wiki = %wiki.name, id = %wiki.id, "Created project wiki");
        Ok(wiki)
    }

    /// Page content and ETag, or [`PageLookup::NotFound`] on 404.
    pub async fn get_page(&self, wiki: &str, path: &str) -> TrackerResult<PageLookup> {
        let url = self.project_endpoint(
            &["wiki", "wikis", wiki, "pages"],
            &[("path", path), ("includeContent", "true")],
        )?;
        let source = url.to_string();
        let response = match self.transport().execute(Call::get(url)).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                debug!(wiki, path, "Wiki page does not exist");
                return Ok(PageLookup::NotFound);
            }
            Err(e) => return Err(e),
        };

        let body = decode_json(&source, &response.body)?;
        Ok(PageLookup::Found {
            content: body
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            etag: response.etag.unwrap_or_default(),
        })
    }

    /// Create the page (`etag == None`) or overwrite it (`If-Match: etag`).
    pub async fn upsert_page(
        &self,
        wiki: &str,
        path: &str,
        content: &str,
        etag: Option<&str>,
    ) -> TrackerResult<Value> {
        let url = self.project_endpoint(&["wiki", "wikis", wiki, "pages"], &[("path", path)])?;
        let call = Call::new(Method::PUT, url)
            .body(RequestBody::Json(json!({ "content": content })))
            .if_match(etag.filter(|e| !e.is_empty()).map(str::to_string));
        let page = self.transport().request(call).await?;
        info!(wiki, path, update = etag.is_some(), "Published wiki page");
        Ok(page)
    }

    /// Upload a wiki attachment and return its wiki-relative path.
    ///
    /// A 409 means the name is already taken by an earlier upload; the default
    /// `/.attachments/<name>` path is returned in that case. Server errors are
    /// retried and then surfaced, never read as a duplicate.
    pub async fn upload_wiki_attachment(
        &self,
        wiki: &str,
        bytes: &[u8],
        filename: &str,
    ) -> TrackerResult<String> {
        let default_path = format!("/.attachments/{filename}");
        let url = self.project_endpoint(
            &["wiki", "wikis", wiki, "attachments"],
            &[("name", filename)],
        )?;
        let call = Call::new(Method::PUT, url)
            .body(RequestBody::Bytes(STANDARD.encode(bytes).into_bytes()));

        match self.transport().request(call).await {
            Ok(result) => Ok(result
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(default_path)),
            Err(e) if e.is_conflict() => {
                debug!(wiki, filename, "Wiki attachment already uploaded");
                Ok(default_path)
            }
            Err(e) => Err(e),
        }
    }
}
