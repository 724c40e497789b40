//! Change-request recorder
//!
//! Applies an approved change analysis: snapshots the current outputs,
//! keeps the raw request, creates and updates stories, and files the change
//! under the project's change-log epic.
//!
//! Only the change-log epic is load-bearing. Individual stories and the epic
//! summary table are bookkeeping: their failures are logged and reported, and
//! the rest of the change still lands.

use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};

use crate::ado::repository::wiql_literal;
use crate::ado::{FieldUpdate, ItemKind, NewItem, WorkItemRepository};
use crate::change::analysis::{ChangeAnalysis, NewStorySpec, StoryModification};
use crate::change::error::{ChangeError, ChangeResult};
use crate::change::render;
use crate::project::events::{self, Event};
use crate::project::{ChangeRecord, Project};

static CR_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("CR_ID regex should compile")
});

/// Tag stamped on every item a change request creates.
pub const CHANGE_TAG: &str = "change-request";

pub fn validate_cr_id(cr_id: &str) -> ChangeResult<()> {
    if CR_ID.is_match(cr_id) {
        Ok(())
    } else {
        Err(ChangeError::invalid_id(cr_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub dir: PathBuf,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub label: String,
    pub error: String,
}

/// Per-item results of a story push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoryPushReport {
    /// `(title, remote id)` of each story created or updated.
    pub applied: Vec<(String, u64)>,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl StoryPushReport {
    pub fn ids(&self) -> Vec<u64> {
        self.applied.iter().map(|(_, id)| *id).collect()
    }
}

/// Result of a bookkeeping write that may fail without failing the change.
#[derive(Debug, Clone, PartialEq)]
pub enum BookkeepingOutcome {
    Applied,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogOutcome {
    pub epic_id: u64,
    pub epic_created: bool,
    /// `None` when the CR item could not be created.
    pub feature_id: Option<u64>,
    pub summary: BookkeepingOutcome,
}

/// Everything [`ChangeRequestRecorder::apply`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeOutcome {
    pub snapshot: Snapshot,
    pub source: PathBuf,
    pub new_stories: StoryPushReport,
    pub modified_stories: StoryPushReport,
    pub changelog: ChangelogOutcome,
    pub record: ChangeRecord,
}

pub struct ChangeRequestRecorder<'a, R: ?Sized> {
    repo: &'a R,
    project: &'a mut Project,
}

impl<'a, R: WorkItemRepository + ?Sized> ChangeRequestRecorder<'a, R> {
    pub fn new(repo: &'a R, project: &'a mut Project) -> Self {
        Self { repo, project }
    }

    /// Copy the top-level files of `output/` to `snapshots/pre-<cr_id>`.
    pub fn create_snapshot(&self, cr_id: &str) -> ChangeResult<Snapshot> {
        validate_cr_id(cr_id)?;
        let dir = self.project.snapshots_dir().join(format!("pre-{cr_id}"));
        std::fs::create_dir_all(&dir)?;

        let mut files = 0;
        let output = self.project.output_dir();
        if output.is_dir() {
            for entry in std::fs::read_dir(&output)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    std::fs::copy(entry.path(), dir.join(entry.file_name()))?;
                    files += 1;
                }
            }
        }

        info!(cr = cr_id, path = %dir.display(), files, "Snapshot saved");
        Ok(Snapshot { dir, files })
    }

    /// Write the raw request text to `changes/<cr_id>.txt`.
    pub fn save_change_source(&self, text: &str, cr_id: &str) -> ChangeResult<PathBuf> {
        validate_cr_id(cr_id)?;
        let dir = self.project.changes_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{cr_id}.txt"));
        std::fs::write(&path, text)?;
        info!(cr = cr_id, path = %path.display(), "Saved change source");
        Ok(path)
    }

    /// Create a user story per spec. Stories are not parented; a failed
    /// create is logged and the rest continue.
    pub async fn push_new_stories(&self, cr_id: &str, stories: &[NewStorySpec]) -> StoryPushReport {
        let project = self.project.name().to_string();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut report = StoryPushReport::default();

        for spec in stories {
            let story = &spec.story;
            let item = NewItem::new(ItemKind::UserStory, &story.title)
                .description(render::new_story_description(&story.user_story_text()))
                .tags(["planbridge", CHANGE_TAG, cr_id, project.as_str()])
                .field(FieldUpdate::Effort(story.total_effort()))
                .field(FieldUpdate::AcceptanceCriteria(render::new_story_acceptance(
                    &story.acceptance_criteria,
                    cr_id,
                    &today,
                )));

            match self.repo.create_item(item).await {
                Ok(created) => {
                    info!(cr = cr_id, id = created.id, title = %story.title, "Created story");
                    report.applied.push((story.title.clone(), created.id));
                }
                Err(e) => {
                    warn!(cr = cr_id, title = %story.title, error = %e, "Failed to create story");
                    report.failures.push(ItemFailure {
                        label: story.title.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Apply field updates to existing stories. Entries without an id or
    /// without fields are skipped.
    pub async fn push_modified_stories(&self, modifications: &[StoryModification]) -> StoryPushReport {
        let mut report = StoryPushReport::default();

        for modification in modifications {
            let id = match modification.ado_id {
                Some(id) if !modification.fields.is_empty() => id,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };
            let updates = modification
                .fields
                .iter()
                .map(|(name, value)| FieldUpdate::raw(name.clone(), value.clone()))
                .collect();

            match self.repo.update_fields(id, updates).await {
                Ok(_) => {
                    info!(id, title = %modification.label(), "Updated story");
                    report.applied.push((modification.label(), id));
                }
                Err(e) => {
                    warn!(id, error = %e, "Failed to update story");
                    report.failures.push(ItemFailure {
                        label: modification.label(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Find the change-log epic by exact title, else create it. The id is
    /// cached in the project config.
    async fn changelog_epic(&mut self) -> ChangeResult<(u64, bool)> {
        if let Some(id) = self.project.config.changelog_epic_id {
            return Ok((id, false));
        }

        let project = self.project.name().to_string();
        let title = render::changelog_epic_title(&project);
        let wiql = format!(
            "SELECT [System.Id] FROM WorkItems \
             WHERE [System.WorkItemType] = 'Epic' \
             AND [System.Title] = {} \
             AND [System.State] <> 'Removed'",
            wiql_literal(&title)
        );

        let found = match self.repo.query(&wiql).await {
            Ok(items) => items
                .into_iter()
                .filter(|item| item.title == title)
                .map(|item| item.id)
                .min(),
            Err(e) => {
                warn!(error = %e, "Change-log epic lookup failed, creating a new one");
                None
            }
        };

        let (id, created) = match found {
            Some(id) => (id, false),
            None => {
                let item = NewItem::new(ItemKind::Epic, &title)
                    .description(render::changelog_epic_description(&project))
                    .tags(["changelog", project.as_str()]);
                let epic = self
                    .repo
                    .create_item(item)
                    .await
                    .map_err(ChangeError::ChangelogEpic)?;
                info!(id = epic.id, "Created change-log epic");
                (epic.id, true)
            }
        };

        self.project.config.changelog_epic_id = Some(id);
        self.project.save()?;
        Ok((id, created))
    }

    /// File `cr_id` under the change-log epic and refresh the epic's summary
    /// table.
    pub async fn update_changelog(
        &mut self,
        analysis: &ChangeAnalysis,
        change_text: &str,
        cr_id: &str,
    ) -> ChangeResult<ChangelogOutcome> {
        let (epic_id, epic_created) = self.changelog_epic().await?;
        let project = self.project.name().to_string();

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();
        let item = NewItem::new(ItemKind::Feature, format!("{cr_id}: {}", analysis.summary))
            .description(render::change_request_description(cr_id, analysis, change_text, &timestamp))
            .tags([CHANGE_TAG, cr_id, project.as_str()])
            .parent(Some(epic_id))
            .field(FieldUpdate::Effort(analysis.impact.total_delta_days));

        let feature_id = match self.repo.create_item(item).await {
            Ok(feature) => {
                info!(cr = cr_id, id = feature.id, epic = epic_id, "Created change request item");
                Some(feature.id)
            }
            Err(e) => {
                warn!(cr = cr_id, error = %e, "Failed to create change request item");
                None
            }
        };

        let latest = change_record(cr_id, analysis);
        let summary = self.update_epic_summary(epic_id, &latest).await;

        Ok(ChangelogOutcome {
            epic_id,
            epic_created,
            feature_id,
            summary,
        })
    }

    async fn update_epic_summary(&self, epic_id: u64, latest: &ChangeRecord) -> BookkeepingOutcome {
        let html = render::changelog_summary(self.project.name(), &self.project.config.changes, latest);
        match self
            .repo
            .update_fields(epic_id, vec![FieldUpdate::Description(html)])
            .await
        {
            Ok(_) => BookkeepingOutcome::Applied,
            Err(e) => {
                warn!(epic = epic_id, error = %e, "Change-log summary not updated");
                BookkeepingOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Append `record` to the project's change history and save.
    pub fn record(&mut self, record: ChangeRecord) -> ChangeResult<()> {
        let event = Event::new(events::CHANGE_RECORDED)
            .data("id", record.id.as_str())
            .data("feature_id", record.feature_id)
            .data("new_story_ids", record.new_story_ids.clone())
            .data("delta_days", record.delta_days);
        self.project.add_change_record(record)?;
        self.project.log_event(event);
        Ok(())
    }

    /// Run the whole change: snapshot, source, stories, change log, record.
    pub async fn apply(
        &mut self,
        cr_id: &str,
        analysis: &ChangeAnalysis,
        change_text: &str,
    ) -> ChangeResult<ChangeOutcome> {
        validate_cr_id(cr_id)?;
        let snapshot = self.create_snapshot(cr_id)?;
        let source = self.save_change_source(change_text, cr_id)?;

        let new_stories = self.push_new_stories(cr_id, &analysis.new_stories).await;
        let modified_stories = self.push_modified_stories(&analysis.modified_stories).await;
        let changelog = self.update_changelog(analysis, change_text, cr_id).await?;

        let mut record = change_record(cr_id, analysis);
        record.feature_id = changelog.feature_id;
        record.new_story_ids = new_stories.ids();
        self.record(record.clone())?;

        info!(
            cr = cr_id,
            stories_created = new_stories.applied.len(),
            stories_updated = modified_stories.applied.len(),
            failures = new_stories.failures.len() + modified_stories.failures.len(),
            "Change request recorded"
        );
        Ok(ChangeOutcome {
            snapshot,
            source,
            new_stories,
            modified_stories,
            changelog,
            record,
        })
    }
}

fn change_record(cr_id: &str, analysis: &ChangeAnalysis) -> ChangeRecord {
    ChangeRecord {
        id: cr_id.to_string(),
        date: Utc::now().format("%Y-%m-%d").to_string(),
        summary: analysis.summary.clone(),
        classification: analysis.classification.clone(),
        delta_days: analysis.impact.total_delta_days,
        cost_delta: analysis.impact.total_delta_cost,
        approved: true,
        feature_id: None,
        new_story_ids: Vec::new(),
    }
}
