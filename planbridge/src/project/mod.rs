//! Project configuration and local pipeline state
//!
//! A project is a directory under the projects root:
//!
//! ```text
//! <name>/
//!   project.yaml      tracker settings, rate cards, pipeline flags, change log
//!   input/ answers/ changes/ snapshots/
//!   output/           plans, mapping, usage log, events timeline
//!   output/specs/     per-story spec files
//! ```
//!
//! `project.yaml` is rewritten atomically on every save.

pub mod error;
pub mod events;
pub mod usage;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ado::{AdoConfig, TrackerResult};
use crate::pipeline::{self, input_fingerprint, Command, PipelineError, PipelineFlag, PipelineState};

pub use error::{ProjectError, ProjectResult};
pub use events::{Event, EventLog, EVENTS_FILE};
pub use usage::{OperationUsage, UsageEntry, UsageLog, UsageSummary, USAGE_FILE};

pub const PROJECT_FILE: &str = "project.yaml";

/// Directories created by [`Project::init`].
pub const PROJECT_DIRS: [&str; 6] = [
    "input",
    "answers",
    "changes",
    "output",
    "output/specs",
    "snapshots",
];

/// Project phases, in order.
pub const STATUSES: [&str; 6] = ["init", "discovery", "design", "estimation", "ready", "active"];

/// Keeps credentials and snapshots out of version control.
const GITIGNORE: &str = "project.yaml\nsnapshots/\n";

/// Environment variable overriding the projects root.
pub const PROJECTS_DIR_ENV: &str = "PLANBRIDGE_PROJECTS_DIR";

/// Default day rates per discipline.
pub fn default_rate_cards() -> BTreeMap<String, f64> {
    [("FE", 650.0), ("BE", 700.0), ("DevOps", 750.0), ("Design", 600.0)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn default_status() -> String {
    STATUSES[0].to_string()
}

/// Resolve the projects root: explicit flag, then `PLANBRIDGE_PROJECTS_DIR`,
/// then `./projects`.
pub fn projects_root(flag: Option<&Path>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    match std::env::var(PROJECTS_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
        _ => PathBuf::from("projects"),
    }
}

/// Tracker connection settings as stored in `project.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub pat: String,
}

impl TrackerSettings {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        pat: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            pat: pat.into(),
        }
    }

    /// Fill empty values from `ADO_ORGANIZATION`, `ADO_PROJECT` and `ADO_PAT`
    /// as answered by `lookup`.
    pub fn resolved(&self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pick = |value: &str, var: &str| {
            if value.trim().is_empty() {
                lookup(var).unwrap_or_default()
            } else {
                value.to_string()
            }
        };
        Self {
            organization: pick(&self.organization, "ADO_ORGANIZATION"),
            project: pick(&self.project, "ADO_PROJECT"),
            pat: pick(&self.pat, "ADO_PAT"),
        }
    }

    pub fn with_env_fallbacks(&self) -> Self {
        self.resolved(|var| std::env::var(var).ok())
    }
}

/// One recorded change request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub delta_days: f64,
    #[serde(default)]
    pub cost_delta: f64,
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_story_ids: Vec<u64>,
}

/// Contents of `project.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: String,
    #[serde(default)]
    pub created: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub ado: TrackerSettings,
    #[serde(default = "default_rate_cards")]
    pub rate_cards: BTreeMap<String, f64>,
    #[serde(default)]
    pub state: PipelineState,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
    /// Cached id of the change-log epic.
    #[serde(default, alias = "_changelog_epic_id", skip_serializing_if = "Option::is_none")]
    pub changelog_epic_id: Option<u64>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, ado: TrackerSettings) -> Self {
        Self {
            project: name.into(),
            created: Utc::now().format("%Y-%m-%d").to_string(),
            status: default_status(),
            ado,
            rate_cards: default_rate_cards(),
            state: PipelineState::default(),
            changes: Vec::new(),
            changelog_epic_id: None,
        }
    }
}

fn validate_name(name: &str) -> ProjectResult<()> {
    if name.trim().is_empty() {
        return Err(ProjectError::invalid_name(name, "name is empty"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ProjectError::invalid_name(name, "name must be a single path component"));
    }
    Ok(())
}

/// A loaded project directory.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    /// Create `<projects_dir>/<name>` with its folder layout, `project.yaml`
    /// and `.gitignore`. Fails when the directory already exists.
    pub fn init(projects_dir: &Path, name: &str, ado: TrackerSettings) -> ProjectResult<Self> {
        validate_name(name)?;
        let root = projects_dir.join(name);
        if root.exists() {
            return Err(ProjectError::AlreadyExists { path: root });
        }

        for dir in PROJECT_DIRS {
            std::fs::create_dir_all(root.join(dir))?;
        }

        let project = Self {
            root,
            config: ProjectConfig::new(name, ado),
        };
        project.save()?;
        std::fs::write(project.root.join(".gitignore"), GITIGNORE)?;

        info!(project = name, path = %project.root.display(), "Initialized project");
        Ok(project)
    }

    /// Load `<projects_dir>/<name>`.
    pub fn load(projects_dir: &Path, name: &str) -> ProjectResult<Self> {
        validate_name(name)?;
        Self::open(projects_dir.join(name))
    }

    /// Load the project rooted at `root`, filling pipeline flags missing from
    /// older files.
    pub fn open(root: impl Into<PathBuf>) -> ProjectResult<Self> {
        let root = root.into();
        let path = root.join(PROJECT_FILE);
        if !path.is_file() {
            return Err(ProjectError::NotFound { path });
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: ProjectConfig = serde_yaml::from_str(&content)
            .map_err(|source| ProjectError::Parse { path: path.clone(), source })?;
        config.state.fill_defaults();

        debug!(project = %config.project, path = %root.display(), "Loaded project");
        Ok(Self { root, config })
    }

    /// Names of every directory under `projects_dir` holding a `project.yaml`.
    pub fn list(projects_dir: &Path) -> ProjectResult<Vec<String>> {
        if !projects_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(projects_dir)? {
            let entry = entry?;
            if entry.path().join(PROJECT_FILE).is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write `project.yaml` atomically.
    pub fn save(&self) -> ProjectResult<()> {
        let path = self.root.join(PROJECT_FILE);
        let temp = path.with_extension("yaml.tmp");
        let content = serde_yaml::to_string(&self.config)?;
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &path)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.config.project
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn answers_dir(&self) -> PathBuf {
        self.root.join("answers")
    }

    pub fn changes_dir(&self) -> PathBuf {
        self.root.join("changes")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.root.join("output").join("specs")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn output_path(&self, file: &str) -> PathBuf {
        self.output_dir().join(file)
    }

    pub fn usage_log(&self) -> UsageLog {
        UsageLog::in_dir(&self.output_dir())
    }

    pub fn event_log(&self) -> EventLog {
        EventLog::in_dir(&self.output_dir())
    }

    /// Append to the timeline. A failed write is logged, never fatal.
    pub fn log_event(&self, event: Event) {
        if let Err(e) = self.event_log().append(event) {
            warn!(project = %self.name(), error = %e, "Failed to write event log");
        }
    }

    /// Tracker settings with environment fallbacks applied. The fallbacks are
    /// never written back to `project.yaml`.
    pub fn tracker_settings(&self) -> TrackerSettings {
        self.config.ado.with_env_fallbacks()
    }

    /// Validated tracker connection config.
    pub fn ado_config(&self) -> TrackerResult<AdoConfig> {
        let settings = self.tracker_settings();
        Ok(AdoConfig::new(settings.organization, settings.project, settings.pat)?.with_env_overrides())
    }

    /// Fail when `command` may not run yet.
    pub fn check(&self, command: Command) -> ProjectResult<()> {
        pipeline::check_preconditions(command, &self.config.state)?;
        Ok(())
    }

    /// Record a successful `command` and save. Returns the flags it cleared.
    pub fn complete_step(&mut self, command: Command) -> ProjectResult<Vec<PipelineFlag>> {
        if command == Command::Ingest {
            self.config.state.requirements_hash = self.current_input_hash();
        }
        let cleared = pipeline::complete(command, &mut self.config.state);
        self.save()?;

        for flag in &cleared {
            info!(command = %command, flag = %flag, "Marked stale");
        }
        let cleared_names: Vec<Value> = cleared.iter().map(|f| Value::from(f.as_str())).collect();
        self.log_event(
            Event::new(events::STEP_COMPLETED)
                .data("command", command.as_str())
                .data("cleared", cleared_names),
        );
        Ok(cleared)
    }

    /// Record a step whose artifact was produced outside this tool.
    ///
    /// Commands that produce their flag by running (push, specs-upload, ...)
    /// are refused so a flag never claims work that did not happen.
    pub fn record_step(&mut self, command: Command) -> ProjectResult<Vec<PipelineFlag>> {
        if !command.is_recorded_externally() {
            return Err(PipelineError::NotRecordable { command }.into());
        }
        self.check(command)?;
        self.complete_step(command)
    }

    pub fn set_status(&mut self, status: &str) -> ProjectResult<()> {
        if !STATUSES.contains(&status) {
            return Err(ProjectError::InvalidStatus {
                status: status.to_string(),
                expected: STATUSES.join(", "),
            });
        }
        self.config.status = status.to_string();
        self.save()
    }

    pub fn add_change_record(&mut self, record: ChangeRecord) -> ProjectResult<()> {
        self.config.changes.push(record);
        self.save()
    }

    /// Fingerprint of `input/` now, `None` when empty or unreadable.
    pub fn current_input_hash(&self) -> Option<String> {
        match input_fingerprint(&self.input_dir()) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(path = %self.input_dir().display(), error = %e, "Could not fingerprint input files");
                None
            }
        }
    }

    /// True when `answers/` holds at least one entry.
    pub fn has_answers(&self) -> bool {
        std::fs::read_dir(self.answers_dir())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    pub fn staleness_warnings(&self) -> Vec<String> {
        let current = self.current_input_hash();
        pipeline::staleness_warnings(&self.config.state, current.as_deref(), self.has_answers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> TrackerSettings {
        TrackerSettings::new("contoso", "Portal", "secret")
    }

    #[test]
    fn test_init_creates_layout() {
        let dir = TempDir::new().unwrap();
        let project = Project::init(dir.path(), "portal", settings()).unwrap();

        for sub in PROJECT_DIRS {
            assert!(project.root().join(sub).is_dir(), "missing {sub}");
        }
        assert_eq!(
            std::fs::read_to_string(project.root().join(".gitignore")).unwrap(),
            "project.yaml\nsnapshots/\n"
        );
        assert_eq!(project.config.status, "init");
        assert_eq!(project.config.rate_cards["BE"], 700.0);
        assert!(PipelineFlag::ALL.iter().all(|f| !project.config.state.is_set(*f)));
    }

    #[test]
    fn test_init_refuses_existing_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("portal")).unwrap();
        let err = Project::init(dir.path(), "portal", settings()).unwrap_err();
        assert!(matches!(err, ProjectError::AlreadyExists { .. }));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = TempDir::new().unwrap();
        for name in ["", "..", "a/b"] {
            assert!(matches!(
                Project::init(dir.path(), name, settings()),
                Err(ProjectError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();
        project.config.changelog_epic_id = Some(42);
        project
            .add_change_record(ChangeRecord {
                id: "CR-001".into(),
                summary: "Add export".into(),
                cost_delta: 1300.0,
                approved: true,
                ..Default::default()
            })
            .unwrap();

        let loaded = Project::load(dir.path(), "portal").unwrap();
        assert_eq!(loaded.config, project.config);
        assert!(!project.root().join("project.yaml.tmp").exists());
    }

    #[test]
    fn test_load_fills_missing_state_and_reads_legacy_epic_key() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("legacy");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join(PROJECT_FILE),
            "project: legacy\nstate:\n  ado_pushed: true\n_changelog_epic_id: 7\n",
        )
        .unwrap();

        let project = Project::load(dir.path(), "legacy").unwrap();
        assert!(project.config.state.is_set(PipelineFlag::AdoPushed));
        assert!(!project.config.state.is_set(PipelineFlag::SpecsGenerated));
        assert!(project.config.changes.is_empty());
        assert_eq!(project.config.changelog_epic_id, Some(7));
        assert_eq!(project.config.status, "init");
    }

    #[test]
    fn test_load_missing_project() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Project::load(dir.path(), "nope"),
            Err(ProjectError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_only_counts_projects() {
        let dir = TempDir::new().unwrap();
        Project::init(dir.path(), "beta", settings()).unwrap();
        Project::init(dir.path(), "alpha", settings()).unwrap();
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();

        assert_eq!(Project::list(dir.path()).unwrap(), vec!["alpha", "beta"]);
        assert!(Project::list(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_settings_fallbacks_only_fill_blanks() {
        let stored = TrackerSettings::new("contoso", "", "");
        let resolved = stored.resolved(|var| match var {
            "ADO_PAT" => Some("from-env".to_string()),
            "ADO_PROJECT" => Some("Portal".to_string()),
            "ADO_ORGANIZATION" => Some("ignored".to_string()),
            _ => None,
        });
        assert_eq!(resolved, TrackerSettings::new("contoso", "Portal", "from-env"));
    }

    #[test]
    fn test_complete_step_persists_flags() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();

        assert!(matches!(project.check(Command::Push), Err(ProjectError::Pipeline(_))));
        project.complete_step(Command::Breakdown).unwrap();
        project.check(Command::Push).unwrap();
        project.complete_step(Command::Push).unwrap();

        let cleared = project.complete_step(Command::Breakdown).unwrap();
        assert_eq!(cleared, vec![PipelineFlag::AdoPushed]);

        let loaded = Project::load(dir.path(), "portal").unwrap();
        assert!(loaded.config.state.is_set(PipelineFlag::BreakdownGenerated));
        assert!(!loaded.config.state.is_set(PipelineFlag::AdoPushed));
    }

    #[test]
    fn test_ingest_records_fingerprint_and_detects_changes() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();
        std::fs::write(project.input_dir().join("rfp.txt"), "first draft").unwrap();

        project.complete_step(Command::Ingest).unwrap();
        assert!(project.config.state.requirements_hash.is_some());
        assert!(project.staleness_warnings().is_empty());

        std::fs::write(project.input_dir().join("addendum.txt"), "more scope").unwrap();
        let warnings = project.staleness_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Input files changed"));
    }

    #[test]
    fn test_record_step_refuses_tool_produced_flags() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();
        project.record_step(Command::Ingest).unwrap();
        project.record_step(Command::Breakdown).unwrap();

        for command in [Command::Push, Command::SpecsUpload, Command::Change] {
            let err = project.record_step(command).unwrap_err();
            assert!(matches!(
                err,
                ProjectError::Pipeline(PipelineError::NotRecordable { .. })
            ));
        }

        let loaded = Project::load(dir.path(), "portal").unwrap();
        assert!(loaded.config.state.is_set(PipelineFlag::BreakdownGenerated));
        assert!(!loaded.config.state.is_set(PipelineFlag::AdoPushed));
    }

    #[test]
    fn test_record_step_still_checks_preconditions() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();
        assert!(matches!(
            project.record_step(Command::Validate),
            Err(ProjectError::Pipeline(PipelineError::MissingPrerequisite { .. }))
        ));
        assert!(!project.config.state.is_set(PipelineFlag::Validated));
    }

    #[test]
    fn test_completed_steps_land_on_timeline() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();
        project.complete_step(Command::Breakdown).unwrap();
        project.complete_step(Command::Push).unwrap();
        project.complete_step(Command::Breakdown).unwrap();

        let events = project.event_log().events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.kind == "step_completed"));
        assert_eq!(events[1].data["command"], "push");
        assert_eq!(events[2].data["cleared"], serde_json::json!(["ado_pushed"]));
    }

    #[test]
    fn test_answers_without_breakdown_are_flagged() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();
        project.record_step(Command::Overview).unwrap();
        assert!(project.staleness_warnings().is_empty());

        std::fs::write(project.answers_dir().join("client-answers.md"), "Yes, SSO").unwrap();
        let warnings = project.staleness_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Client answers available"));
    }

    #[test]
    fn test_set_status_validates() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::init(dir.path(), "portal", settings()).unwrap();
        project.set_status("design").unwrap();
        assert!(matches!(
            project.set_status("shipping"),
            Err(ProjectError::InvalidStatus { .. })
        ));
        assert_eq!(Project::load(dir.path(), "portal").unwrap().config.status, "design");
    }
}
