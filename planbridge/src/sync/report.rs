//! What a push did, for the operator.

use std::fmt;

use serde::Serialize;

use crate::ado::ItemKind;
use crate::plan::{PlanTotals, WorkPlan};
use crate::sync::mapping::MappingState;

/// Work remaining before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncPreview {
    pub totals: PlanTotals,
    /// Stories already present in the mapping.
    pub already_synced: usize,
}

impl SyncPreview {
    pub fn new(plan: &WorkPlan, state: &MappingState) -> Self {
        Self {
            totals: plan.totals(),
            already_synced: plan
                .stories()
                .filter(|s| state.story(&s.local_id()).is_some())
                .count(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.totals.stories.saturating_sub(self.already_synced)
    }
}

/// Where a reused id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseSource {
    /// The resume mapping of an earlier run.
    Mapping,
    /// An existing item with the same title.
    Title,
}

/// One step of the walk, in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Reused {
        kind: ItemKind,
        title: String,
        id: u64,
        source: ReuseSource,
    },
    Created {
        kind: ItemKind,
        title: String,
        id: u64,
    },
    AlreadySynced {
        local_id: String,
        title: String,
    },
    WouldCreate {
        kind: ItemKind,
        title: String,
    },
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused {
                kind,
                title,
                id,
                source: ReuseSource::Mapping,
            } => write!(f, "Reusing {kind} #{id} from previous run: {title}"),
            Self::Reused { kind, title, id, .. } => {
                write!(f, "Reusing existing {kind} #{id}: {title}")
            }
            Self::Created { kind, title, id } => write!(f, "Created {kind} #{id}: {title}"),
            Self::AlreadySynced { local_id, title } => {
                write!(f, "{local_id} {title}: already created, skipping")
            }
            Self::WouldCreate { kind, title } => write!(f, "[dry run] Would create {kind}: {title}"),
        }
    }
}

/// Per-level resolution counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub created: usize,
    pub reused: usize,
}

/// A discipline task that could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub story: String,
    pub task: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub epics: LevelCounts,
    pub features: LevelCounts,
    pub stories: LevelCounts,
    pub tasks_created: usize,
    pub task_failures: Vec<TaskFailure>,
    pub links_created: usize,
    /// Relations skipped because the mapping says they already exist.
    pub links_existing: usize,
    pub link_warnings: Vec<String>,
    pub events: Vec<SyncEvent>,
}

impl SyncReport {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    /// Remote items created by this run, tasks included.
    pub fn items_created(&self) -> usize {
        self.epics.created + self.features.created + self.stories.created + self.tasks_created
    }

    pub(crate) fn event(&mut self, event: SyncEvent) {
        self.events.push(event);
    }
}
