//! Title index of epics and features already in the tracker.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::ado::repository::wiql_literal;
use crate::ado::{ItemKind, RemoteItem, WorkItemRepository};

/// Title → id for existing epics and features in one project.
///
/// When several items share a title the lowest id wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIndex {
    epics: HashMap<String, u64>,
    features: HashMap<String, u64>,
}

impl RemoteIndex {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a RemoteItem>) -> Self {
        let mut sorted: Vec<&RemoteItem> = items.into_iter().collect();
        sorted.sort_by_key(|item| item.id);

        let mut index = Self::default();
        for item in sorted {
            let bucket = match item.kind {
                Some(ItemKind::Epic) => &mut index.epics,
                Some(ItemKind::Feature) => &mut index.features,
                _ => continue,
            };
            bucket.entry(item.title.clone()).or_insert(item.id);
        }
        index
    }

    /// Query for live epics and features in `project`.
    pub fn query(project: &str) -> String {
        format!(
            "SELECT [System.Id], [System.Title], [System.WorkItemType] \
             FROM WorkItems WHERE [System.WorkItemType] IN ('Epic', 'Feature') \
             AND [System.State] <> 'Removed' \
             AND [System.TeamProject] = {} \
             ORDER BY [System.Id] ASC",
            wiql_literal(project)
        )
    }

    /// Fetch the index. A failed query yields an empty index and a warning,
    /// so the run proceeds without title dedup.
    pub async fn fetch<R: WorkItemRepository + ?Sized>(repo: &R, project: &str) -> Self {
        match repo.query(&Self::query(project)).await {
            Ok(items) => {
                let index = Self::from_items(&items);
                info!(
                    epics = index.epics.len(),
                    features = index.features.len(),
                    "Indexed existing work items"
                );
                index
            }
            Err(e) => {
                warn!(error = %e, "Could not query existing items, title dedup disabled");
                Self::default()
            }
        }
    }

    pub fn epic(&self, title: &str) -> Option<u64> {
        self.epics.get(title).copied()
    }

    pub fn feature(&self, title: &str) -> Option<u64> {
        self.features.get(title).copied()
    }

    pub fn epic_count(&self) -> usize {
        self.epics.len()
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }
}
