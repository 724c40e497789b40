//! Work plan document model
//!
//! The plan is produced upstream and read-only here. Keys follow the plan
//! file format; missing optional keys fall back to empty values.

use serde::{Deserialize, Serialize};

fn default_epic_name() -> String {
    "Unknown Epic".to_string()
}

fn default_feature_name() -> String {
    "Unknown Feature".to_string()
}

fn default_story_title() -> String {
    "Unknown Story".to_string()
}

/// Root of a plan document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkPlan {
    pub epics: Vec<PlanEpic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEpic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "title", default = "default_epic_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<PlanFeature>,
}

impl PlanEpic {
    /// Mapping key: the declared id, else the name.
    pub fn local_id(&self) -> &str {
        self.id.as_deref().filter(|id| !id.is_empty()).unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "title", default = "default_feature_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stories: Vec<PlanStory>,
}

impl PlanFeature {
    pub fn local_id(&self) -> &str {
        self.id.as_deref().filter(|id| !id.is_empty()).unwrap_or(&self.name)
    }
}

/// One acceptance-criteria group: a heading plus its checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriteriaGroup {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

/// Acceptance criteria in any of the accepted shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AcceptanceCriteria {
    Text(String),
    Groups(Vec<CriteriaGroup>),
    /// Older plans: one string per criterion.
    Lines(Vec<String>),
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self::Groups(Vec::new())
    }
}

impl AcceptanceCriteria {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Groups(groups) => groups.is_empty(),
            Self::Lines(lines) => lines.is_empty(),
        }
    }

    /// One-line plain text rendering.
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Lines(lines) => lines.join("; "),
            Self::Groups(groups) => groups
                .iter()
                .enumerate()
                .map(|(i, g)| g.title.clone().unwrap_or_else(|| format!("Criterion {}", i + 1)))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Implementation hints carried alongside acceptance criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalContext {
    #[serde(default)]
    pub data_model: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub interactions: Vec<String>,
    #[serde(default)]
    pub navigation: Vec<String>,
    #[serde(default)]
    pub api_hints: Vec<String>,
}

impl TechnicalContext {
    /// `(heading, items)` in display order.
    pub fn sections(&self) -> [(&'static str, &[String]); 5] {
        [
            ("Data Model", self.data_model.as_slice()),
            ("States", self.states.as_slice()),
            ("Interactions", self.interactions.as_slice()),
            ("Navigation", self.navigation.as_slice()),
            ("API Hints", self.api_hints.as_slice()),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.sections().iter().all(|(_, items)| items.is_empty())
    }
}

/// Engineering disciplines that get their own task under a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    Frontend,
    Backend,
    DevOps,
}

impl Discipline {
    pub const ALL: [Discipline; 3] = [Self::Frontend, Self::Backend, Self::DevOps];

    /// Task title prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Frontend => "FE",
            Self::Backend => "BE",
            Self::DevOps => "DevOps",
        }
    }

    pub fn task_title(&self, story_title: &str) -> String {
        format!("[{}] {story_title}", self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_story_title")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_story: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: AcceptanceCriteria,
    #[serde(default)]
    pub fe_days: f64,
    #[serde(default)]
    pub be_days: f64,
    #[serde(default)]
    pub devops_days: f64,
    #[serde(default)]
    pub design_days: f64,
    #[serde(default)]
    pub predecessors: Vec<String>,
    #[serde(default)]
    pub similar_stories: Vec<String>,
    #[serde(default)]
    pub reference_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_context: Option<TechnicalContext>,
}

impl PlanStory {
    /// Mapping key: the declared id, else `US-<nnn>` from the 1-based position
    /// of the story across the whole plan.
    pub fn local_id(&self, index: usize) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("US-{index:03}"),
        }
    }

    /// The user story sentence, or a generic one built from the title.
    pub fn user_story_text(&self) -> String {
        self.user_story
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "As a user,\nI want to {},\nSo that I can accomplish this goal.",
                    self.title.to_lowercase()
                )
            })
    }

    pub fn days(&self, discipline: Discipline) -> f64 {
        match discipline {
            Discipline::Frontend => self.fe_days,
            Discipline::Backend => self.be_days,
            Discipline::DevOps => self.devops_days,
        }
    }

    /// Sum of all discipline days including design.
    pub fn total_effort(&self) -> f64 {
        self.fe_days + self.be_days + self.devops_days + self.design_days
    }
}

/// A story together with its place in the plan.
#[derive(Debug, Clone, Copy)]
pub struct StoryRef<'a> {
    /// 1-based position across the plan.
    pub index: usize,
    pub epic: &'a PlanEpic,
    pub feature: &'a PlanFeature,
    pub story: &'a PlanStory,
}

impl StoryRef<'_> {
    pub fn local_id(&self) -> String {
        self.story.local_id(self.index)
    }
}

/// Node counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanTotals {
    pub epics: usize,
    pub features: usize,
    pub stories: usize,
}

impl WorkPlan {
    /// Every story in document order.
    pub fn stories(&self) -> impl Iterator<Item = StoryRef<'_>> {
        self.epics
            .iter()
            .flat_map(|epic| {
                epic.features
                    .iter()
                    .flat_map(move |feature| feature.stories.iter().map(move |story| (epic, feature, story)))
            })
            .enumerate()
            .map(|(i, (epic, feature, story))| StoryRef {
                index: i + 1,
                epic,
                feature,
                story,
            })
    }

    pub fn totals(&self) -> PlanTotals {
        PlanTotals {
            epics: self.epics.len(),
            features: self.epics.iter().map(|e| e.features.len()).sum(),
            stories: self.stories().count(),
        }
    }
}
