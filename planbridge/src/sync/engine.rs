//! Hierarchy synchronizer
//!
//! Walks the plan in document order (epics, their features, their stories) and
//! resolves every node to a remote id:
//!
//! ```text
//! node
//!   ├─ local id in mapping?     → reuse, no remote call
//!   ├─ title in remote index?   → reuse and record (epics/features only)
//!   └─ otherwise                → create under the resolved parent, record
//! ```
//!
//! The mapping is persisted after every mutation. Parents are always resolved
//! before their children are created, so no child is ever orphaned.

use tracing::{info, warn};

use crate::ado::patch::FieldUpdate;
use crate::ado::{ItemKind, NewItem, WorkItemRepository};
use crate::plan::{render, Discipline, PlanEpic, PlanFeature, StoryRef, WorkPlan};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::index::RemoteIndex;
use crate::sync::links;
use crate::sync::mapping::{MappingState, MappingStore, StoryMapping};
use crate::sync::report::{ReuseSource, SyncEvent, SyncReport, TaskFailure};

/// Tags stamped on created items.
pub mod tags {
    pub const EPIC: &str = "Planbridge New Epic";
    pub const FEATURE: &str = "Planbridge New Feature";
    pub const STORY: &str = "Planbridge New Story";
}

/// Pushes a [`WorkPlan`] into the tracker.
pub struct HierarchySynchronizer<'a, R: ?Sized> {
    repo: &'a R,
    store: &'a MappingStore,
    dry_run: bool,
}

impl<'a, R: WorkItemRepository + ?Sized> HierarchySynchronizer<'a, R> {
    pub fn new(repo: &'a R, store: &'a MappingStore) -> Self {
        Self {
            repo,
            store,
            dry_run: false,
        }
    }

    /// Report what would be created without touching the tracker or the
    /// persisted mapping.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Synchronize the whole plan, then link story relations.
    ///
    /// `state` is updated in place and persisted as it grows, so after an
    /// error it still holds every assignment made before the failure.
    pub async fn run(
        &self,
        plan: &WorkPlan,
        index: &RemoteIndex,
        state: &mut MappingState,
    ) -> SyncResult<SyncReport> {
        let mut report = if self.dry_run {
            SyncReport::dry_run()
        } else {
            SyncReport::default()
        };

        let mut stories = plan.stories().peekable();
        for epic in &plan.epics {
            let epic_id = self.resolve_epic(epic, index, state, &mut report).await?;
            for feature in &epic.features {
                let feature_id = self
                    .resolve_feature(feature, epic_id, index, state, &mut report)
                    .await?;
                while let Some(story) = stories.next_if(|s| std::ptr::eq(s.feature, feature)) {
                    self.resolve_story(story, feature_id, state, &mut report)
                        .await?;
                }
            }
        }

        if self.dry_run {
            return Ok(report);
        }

        // Epic/feature reuse found only through the index is saved here too.
        self.store.save(state)?;
        links::link_relations(self.repo, self.store, plan, state, &mut report).await?;

        info!(
            created = report.items_created(),
            stories_created = report.stories.created,
            stories_skipped = report.stories.reused,
            links = report.links_created,
            "Push complete"
        );
        Ok(report)
    }

    fn persist(&self, state: &MappingState) -> SyncResult<()> {
        if self.dry_run {
            return Ok(());
        }
        self.store.save(state)
    }

    async fn resolve_epic(
        &self,
        epic: &PlanEpic,
        index: &RemoteIndex,
        state: &mut MappingState,
        report: &mut SyncReport,
    ) -> SyncResult<Option<u64>> {
        let key = epic.local_id();
        if let Some(&id) = state.epics.get(key) {
            report.epics.reused += 1;
            report.event(reused(ItemKind::Epic, &epic.name, id, ReuseSource::Mapping));
            return Ok(Some(id));
        }
        if self.dry_run {
            report.event(would_create(ItemKind::Epic, &epic.name));
            return Ok(None);
        }
        if let Some(id) = index.epic(&epic.name) {
            state.epics.insert(key.to_string(), id);
            self.persist(state)?;
            report.epics.reused += 1;
            report.event(reused(ItemKind::Epic, &epic.name, id, ReuseSource::Title));
            return Ok(Some(id));
        }

        let item = NewItem::new(ItemKind::Epic, &epic.name)
            .description(render::epic_description(epic))
            .tags([tags::EPIC]);
        let id = self.create(item).await.map_err(|source| SyncError::ParentFailed {
            kind: "epic",
            local_id: key.to_string(),
            source,
        })?;
        state.epics.insert(key.to_string(), id);
        self.persist(state)?;
        report.epics.created += 1;
        report.event(created(ItemKind::Epic, &epic.name, id));
        Ok(Some(id))
    }

    async fn resolve_feature(
        &self,
        feature: &PlanFeature,
        epic_id: Option<u64>,
        index: &RemoteIndex,
        state: &mut MappingState,
        report: &mut SyncReport,
    ) -> SyncResult<Option<u64>> {
        let key = feature.local_id();
        if let Some(&id) = state.features.get(key) {
            report.features.reused += 1;
            report.event(reused(ItemKind::Feature, &feature.name, id, ReuseSource::Mapping));
            return Ok(Some(id));
        }
        if self.dry_run {
            report.event(would_create(ItemKind::Feature, &feature.name));
            return Ok(None);
        }
        if let Some(id) = index.feature(&feature.name) {
            state.features.insert(key.to_string(), id);
            self.persist(state)?;
            report.features.reused += 1;
            report.event(reused(ItemKind::Feature, &feature.name, id, ReuseSource::Title));
            return Ok(Some(id));
        }

        let item = NewItem::new(ItemKind::Feature, &feature.name)
            .description(render::feature_description(feature))
            .tags([tags::FEATURE])
            .parent(epic_id);
        let id = self.create(item).await.map_err(|source| SyncError::ParentFailed {
            kind: "feature",
            local_id: key.to_string(),
            source,
        })?;
        state.features.insert(key.to_string(), id);
        self.persist(state)?;
        report.features.created += 1;
        report.event(created(ItemKind::Feature, &feature.name, id));
        Ok(Some(id))
    }

    async fn resolve_story(
        &self,
        story_ref: StoryRef<'_>,
        feature_id: Option<u64>,
        state: &mut MappingState,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let story = story_ref.story;
        let local_id = story_ref.local_id();
        if state.story(&local_id).is_some() {
            report.stories.reused += 1;
            report.event(SyncEvent::AlreadySynced {
                local_id,
                title: story.title.clone(),
            });
            return Ok(());
        }
        if self.dry_run {
            report.event(would_create(ItemKind::UserStory, &story.title));
            return Ok(());
        }

        let item = NewItem::new(ItemKind::UserStory, &story.title)
            .description(render::story_description(&story.user_story_text()))
            .tags([tags::STORY])
            .parent(feature_id)
            .field(FieldUpdate::Effort(story.total_effort()))
            .field(FieldUpdate::AcceptanceCriteria(render::acceptance_html(
                &story.acceptance_criteria,
                story.technical_context.as_ref(),
            )));
        let id = self
            .create(item)
            .await
            .map_err(|source| SyncError::StoryFailed {
                local_id: local_id.clone(),
                title: story.title.clone(),
                source,
            })?;

        state.record_story(StoryMapping {
            remote_id: id,
            local_id: local_id.clone(),
            title: story.title.clone(),
            epic: story_ref.epic.name.clone(),
            feature: story_ref.feature.name.clone(),
        });
        self.persist(state)?;
        report.stories.created += 1;
        report.event(created(ItemKind::UserStory, &story.title, id));

        self.create_tasks(story_ref, id, report).await;
        Ok(())
    }

    /// One task per discipline with a positive day count. Failures are
    /// reported, never raised.
    async fn create_tasks(&self, story_ref: StoryRef<'_>, story_id: u64, report: &mut SyncReport) {
        let story = story_ref.story;
        for discipline in Discipline::ALL {
            let days = story.days(discipline);
            if days <= 0.0 {
                continue;
            }
            let title = discipline.task_title(&story.title);
            let item = NewItem::new(ItemKind::Task, &title)
                .tags([tags::STORY])
                .parent(Some(story_id))
                .field(FieldUpdate::Effort(days));
            match self.create(item).await {
                Ok(_) => report.tasks_created += 1,
                Err(e) => {
                    warn!(story = %story_ref.local_id(), task = %title, error = %e, "Failed to create task");
                    report.task_failures.push(TaskFailure {
                        story: story_ref.local_id(),
                        task: title,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn create(&self, item: NewItem) -> crate::ado::TrackerResult<u64> {
        Ok(self.repo.create_item(item).await?.id)
    }
}

fn reused(kind: ItemKind, title: &str, id: u64, source: ReuseSource) -> SyncEvent {
    SyncEvent::Reused {
        kind,
        title: title.to_string(),
        id,
        source,
    }
}

fn created(kind: ItemKind, title: &str, id: u64) -> SyncEvent {
    SyncEvent::Created {
        kind,
        title: title.to_string(),
        id,
    }
}

fn would_create(kind: ItemKind, title: &str) -> SyncEvent {
    SyncEvent::WouldCreate {
        kind,
        title: title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ado::memory::MemoryRepository;
    use crate::ado::patch::field;
    use crate::ado::RelationKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn billing_plan() -> WorkPlan {
        serde_json::from_value(json!({
            "epics": [{
                "name": "Billing",
                "features": [{
                    "name": "Invoices",
                    "stories": [{
                        "id": "US-001",
                        "title": "US-001: Generate invoice",
                        "fe_days": 2,
                        "be_days": 3
                    }]
                }]
            }]
        }))
        .unwrap()
    }

    fn three_story_plan() -> WorkPlan {
        serde_json::from_value(json!({
            "epics": [{
                "name": "Billing",
                "features": [{
                    "name": "Invoices",
                    "stories": [
                        {"id": "US-001", "title": "Generate invoice", "be_days": 1},
                        {"id": "US-002", "title": "Send invoice", "predecessors": ["US-001"]},
                        {"id": "US-003", "title": "Void invoice", "similar_stories": ["US-002", "US-404"]}
                    ]
                }]
            }]
        }))
        .unwrap()
    }

    async fn push(
        repo: &MemoryRepository,
        store: &MappingStore,
        plan: &WorkPlan,
    ) -> SyncResult<(SyncReport, MappingState)> {
        let mut state = store.load();
        let index = RemoteIndex::fetch(repo, "Shop").await;
        let report = HierarchySynchronizer::new(repo, store)
            .run(plan, &index, &mut state)
            .await?;
        Ok((report, state))
    }

    #[tokio::test]
    async fn test_example_plan_creates_hierarchy_and_tasks() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();

        let (report, state) = push(&repo, &store, &billing_plan()).await.unwrap();

        assert_eq!(
            repo.creates(),
            vec![
                (ItemKind::Epic, "Billing".to_string()),
                (ItemKind::Feature, "Invoices".to_string()),
                (ItemKind::UserStory, "US-001: Generate invoice".to_string()),
                (ItemKind::Task, "[FE] US-001: Generate invoice".to_string()),
                (ItemKind::Task, "[BE] US-001: Generate invoice".to_string()),
            ]
        );
        assert_eq!(report.tasks_created, 2);

        let epic_id = state.epics["Billing"];
        let feature_id = state.features["Invoices"];
        assert_eq!(state.stories.len(), 1);
        assert_eq!(state.stories[0].local_id, "US-001");
        let story_id = state.stories[0].remote_id;

        assert_eq!(repo.item(feature_id).unwrap().parent_id(), Some(epic_id));
        let story = repo.item(story_id).unwrap();
        assert_eq!(story.parent_id(), Some(feature_id));
        assert_eq!(story.field(field::EFFORT), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();
        let plan = three_story_plan();

        push(&repo, &store, &plan).await.unwrap();
        let first_bytes = std::fs::read(store.path()).unwrap();
        let creates = repo.creates().len();
        let relations = repo.relations().len();

        let (report, _) = push(&repo, &store, &plan).await.unwrap();

        assert_eq!(report.items_created(), 0);
        assert_eq!(report.links_created, 0);
        assert_eq!(repo.creates().len(), creates);
        assert_eq!(repo.relations().len(), relations);
        assert_eq!(std::fs::read(store.path()).unwrap(), first_bytes);
    }

    #[tokio::test]
    async fn test_resume_after_interruption() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();
        let plan = three_story_plan();

        // epic, feature, US-001 and its task succeed; the next create fails
        repo.fail_creates_after(4);
        let err = push(&repo, &store, &plan).await.unwrap_err();
        assert!(matches!(err, SyncError::StoryFailed { ref local_id, .. } if local_id == "US-002"));
        assert_eq!(store.load().stories.len(), 1);

        repo.fail_creates_after(usize::MAX);
        let (report, state) = push(&repo, &store, &plan).await.unwrap();

        assert_eq!(report.stories.reused, 1);
        assert_eq!(report.stories.created, 2);
        assert_eq!(state.stories.len(), 3);
        let story_creates = repo
            .creates()
            .into_iter()
            .filter(|(kind, _)| *kind == ItemKind::UserStory)
            .count();
        assert_eq!(story_creates, 3);
    }

    #[tokio::test]
    async fn test_existing_titles_are_reused() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();
        let epic_id = repo.seed(ItemKind::Epic, "Billing");

        let (report, state) = push(&repo, &store, &billing_plan()).await.unwrap();

        assert_eq!(state.epics["Billing"], epic_id);
        assert_eq!(report.epics.reused, 1);
        assert_eq!(report.epics.created, 0);
        assert!(!repo.creates().iter().any(|(kind, _)| *kind == ItemKind::Epic));
    }

    #[tokio::test]
    async fn test_story_titles_are_not_deduplicated() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();
        repo.seed(ItemKind::UserStory, "US-001: Generate invoice");

        let (report, _) = push(&repo, &store, &billing_plan()).await.unwrap();
        assert_eq!(report.stories.created, 1);
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();
        let mut state = MappingState::default();

        let report = HierarchySynchronizer::new(&repo, &store)
            .dry_run(true)
            .run(&billing_plan(), &RemoteIndex::default(), &mut state)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert!(repo.creates().is_empty());
        assert!(!store.path().exists());
        assert_eq!(state, MappingState::default());
        let planned = report
            .events
            .iter()
            .filter(|e| matches!(e, SyncEvent::WouldCreate { .. }))
            .count();
        assert_eq!(planned, 3);
    }

    #[tokio::test]
    async fn test_task_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();
        repo.fail_title("[BE]");

        let (report, state) = push(&repo, &store, &billing_plan()).await.unwrap();

        assert_eq!(report.tasks_created, 1);
        assert_eq!(report.task_failures.len(), 1);
        assert_eq!(report.task_failures[0].task, "[BE] US-001: Generate invoice");
        assert_eq!(state.stories.len(), 1);
    }

    #[tokio::test]
    async fn test_relations_link_mapped_stories_only() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::in_dir(dir.path());
        let repo = MemoryRepository::new();

        let (report, state) = push(&repo, &store, &three_story_plan()).await.unwrap();

        let us1 = state.story_remote_id("US-001").unwrap();
        let us2 = state.story_remote_id("US-002").unwrap();
        let us3 = state.story_remote_id("US-003").unwrap();
        assert_eq!(
            repo.relations(),
            vec![
                (us2, us1, RelationKind::Predecessor),
                (us3, us2, RelationKind::Related),
            ]
        );
        assert_eq!(report.links_created, 2);
        assert_eq!(report.link_warnings.len(), 1);
        assert!(report.link_warnings[0].contains("US-404"));
        assert_eq!(state.relations.len(), 2);
    }
}
