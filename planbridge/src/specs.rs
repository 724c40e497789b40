//! Spec attachment upload
//!
//! Spec files live under `output/specs/fe` and `output/specs/be`, one per
//! story, named after the story id or title (`US-001_login_page.yaml`). Each
//! file is attached to the matching `[FE]` or `[BE]` task under its story.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::ado::WorkItemRepository;
use crate::plan::Discipline;
use crate::sync::MappingState;

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\s_\-]+").expect("SEPARATORS regex should compile")
});

/// Spec subdirectories and the discipline whose task receives them.
pub const SPEC_DIRS: [(&str, Discipline); 2] = [("fe", Discipline::Frontend), ("be", Discipline::Backend)];

/// Lower-case with runs of separators collapsed to one space.
pub fn normalize_name(name: &str) -> String {
    SEPARATORS.replace_all(&name.trim().to_lowercase(), " ").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFile {
    pub discipline: Discipline,
    pub path: PathBuf,
}

impl SpecFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// `*.yaml` and `*.yml` files directly under each spec subdirectory, sorted
/// by name within each discipline.
pub fn collect_spec_files(specs_dir: &Path) -> std::io::Result<Vec<SpecFile>> {
    let mut files = Vec::new();
    for (sub, discipline) in SPEC_DIRS {
        let dir = specs_dir.join(sub);
        if !dir.is_dir() {
            continue;
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
            if is_yaml && path.is_file() {
                found.push(path);
            }
        }
        found.sort();
        files.extend(found.into_iter().map(|path| SpecFile { discipline, path }));
    }
    Ok(files)
}

/// Story lookup by normalized local id and title.
#[derive(Debug, Clone, Default)]
pub struct StoryMatcher {
    ids: Vec<(String, u64)>,
    titles: Vec<(String, u64)>,
}

impl StoryMatcher {
    pub fn from_mapping(state: &MappingState) -> Self {
        let normalized = |value: &str, id: u64| {
            let key = normalize_name(value);
            (!key.is_empty()).then_some((key, id))
        };
        Self {
            ids: state
                .stories
                .iter()
                .filter_map(|s| normalized(&s.local_id, s.remote_id))
                .collect(),
            titles: state
                .stories
                .iter()
                .filter_map(|s| normalized(&s.title, s.remote_id))
                .collect(),
        }
    }

    /// Remote story id for a spec file stem. An id match wins over a title
    /// match; within each, the longest key contained in the name wins.
    pub fn find(&self, file_stem: &str) -> Option<u64> {
        let name = normalize_name(file_stem);
        let longest = |keys: &[(String, u64)]| {
            keys.iter()
                .filter(|(key, _)| name.contains(key.as_str()))
                .max_by_key(|(key, _)| key.len())
                .map(|(_, id)| *id)
        };
        longest(&self.ids).or_else(|| longest(&self.titles))
    }
}

/// What happened to one spec file.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecOutcome {
    Uploaded { story: u64, task: u64 },
    NoStory,
    NoTask { story: u64 },
    Failed { task: u64, error: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecUploadReport {
    pub files: Vec<(SpecFile, SpecOutcome)>,
}

impl SpecUploadReport {
    pub fn uploaded(&self) -> usize {
        self.files
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SpecOutcome::Uploaded { .. }))
            .count()
    }

    pub fn errors(&self) -> usize {
        self.files.len() - self.uploaded()
    }
}

/// Attaches spec files to discipline tasks, caching each story's children.
pub struct SpecUploader<'a, R: ?Sized> {
    repo: &'a R,
    tasks: HashMap<u64, HashMap<Discipline, u64>>,
}

impl<'a, R: WorkItemRepository + ?Sized> SpecUploader<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self {
            repo,
            tasks: HashMap::new(),
        }
    }

    /// The discipline task under `story`. A failed child lookup counts as no
    /// tasks for the rest of the run.
    async fn find_task(&mut self, story: u64, discipline: Discipline) -> Option<u64> {
        if !self.tasks.contains_key(&story) {
            let children = match self.repo.get_children(story).await {
                Ok(children) => children,
                Err(e) => {
                    warn!(story, error = %e, "Could not list story tasks");
                    Vec::new()
                }
            };
            let mut tasks = HashMap::new();
            for child in children {
                if let Some(d) = Discipline::ALL
                    .into_iter()
                    .find(|d| child.title.starts_with(&format!("[{}]", d.prefix())))
                {
                    tasks.entry(d).or_insert(child.id);
                }
            }
            debug!(story, tasks = tasks.len(), "Cached story tasks");
            self.tasks.insert(story, tasks);
        }
        self.tasks.get(&story).and_then(|tasks| tasks.get(&discipline)).copied()
    }

    async fn upload_one(&mut self, spec: &SpecFile, matcher: &StoryMatcher) -> SpecOutcome {
        let prefix = spec.discipline.prefix();
        let Some(story) = matcher.find(&spec.stem()) else {
            warn!(file = %spec.file_name(), "[{prefix}] No story matches spec file");
            return SpecOutcome::NoStory;
        };
        let Some(task) = self.find_task(story, spec.discipline).await else {
            warn!(file = %spec.file_name(), story, "[{prefix}] No [{prefix}] task under story");
            return SpecOutcome::NoTask { story };
        };

        let result = match tokio::fs::read(&spec.path).await {
            Ok(bytes) => self
                .repo
                .upload_attachment(
                    task,
                    bytes,
                    &spec.file_name(),
                    Some(format!("{prefix} spec for story #{story}")),
                )
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(_) => {
                info!(file = %spec.file_name(), task, "[{prefix}] Uploaded spec");
                SpecOutcome::Uploaded { story, task }
            }
            Err(error) => {
                warn!(file = %spec.file_name(), task, %error, "[{prefix}] Spec upload failed");
                SpecOutcome::Failed { task, error }
            }
        }
    }

    /// Upload every spec file. Per-file problems are reported, never fatal.
    pub async fn upload_all(&mut self, files: Vec<SpecFile>, state: &MappingState) -> SpecUploadReport {
        let matcher = StoryMatcher::from_mapping(state);
        let mut report = SpecUploadReport::default();
        for spec in files {
            let outcome = self.upload_one(&spec, &matcher).await;
            report.files.push((spec, outcome));
        }
        report
    }
}
