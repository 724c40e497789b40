//! A project walked through the pipeline end to end
//!
//! - Push is gated on a recorded breakdown
//! - A push marks specs and validation stale and records API usage
//! - Spec files reach the discipline tasks the push created
//! - Editing input files after ingest raises a staleness warning

mod support;

use planbridge::plan::BREAKDOWN_FILE;
use planbridge::project::usage::UsageEntry;
use planbridge::specs::collect_spec_files;
use planbridge::sync::{HierarchySynchronizer, MappingStore, RemoteIndex};
use planbridge::{load_plan, Command, PipelineFlag, Project, ProjectError, SpecUploader, TrackerSettings};
use support::{FakeTracker, ORG, PROJECT};
use tempfile::tempdir;

const BREAKDOWN: &str = r#"{
  "epics": [{
    "name": "Accounts",
    "features": [{
      "name": "Sign in",
      "stories": [
        {"id": "US-001", "title": "Login page", "fe_days": 2, "be_days": 1},
        {"id": "US-002", "title": "Password reset", "be_days": 2}
      ]
    }]
  }]
}"#;

fn new_project(dir: &std::path::Path) -> Project {
    Project::init(dir, "portal", TrackerSettings::new(ORG, PROJECT, "pat")).unwrap()
}

async fn push(project: &mut Project, fake: &FakeTracker) {
    project.check(Command::Push).unwrap();
    let client = fake.client();
    let loaded = load_plan(&project.output_dir()).unwrap();
    let store = MappingStore::in_dir(&project.output_dir());
    let index = RemoteIndex::fetch(&client, PROJECT).await;
    let mut state = store.load();
    let report = HierarchySynchronizer::new(&client, &store)
        .run(&loaded.plan, &index, &mut state)
        .await
        .unwrap();

    let stats = client.take_stats();
    project
        .usage_log()
        .append(UsageEntry::new("push", &stats).detail("items_created", report.items_created()))
        .unwrap();
    project.complete_step(Command::Push).unwrap();
}

#[tokio::test]
async fn test_push_requires_breakdown() {
    let dir = tempdir().unwrap();
    let mut project = new_project(dir.path());

    let err = project.check(Command::Push).unwrap_err();
    assert!(matches!(err, ProjectError::Pipeline(_)));
    assert!(err.to_string().contains("planbridge record breakdown"));

    std::fs::write(project.output_path(BREAKDOWN_FILE), BREAKDOWN).unwrap();
    project.complete_step(Command::Breakdown).unwrap();
    project.check(Command::Push).unwrap();
    assert!(project
        .staleness_warnings()
        .iter()
        .any(|w| w.contains("not pushed")));
}

#[tokio::test]
async fn test_push_then_specs_upload() {
    let dir = tempdir().unwrap();
    let mut project = new_project(dir.path());
    let fake = FakeTracker::new();

    std::fs::write(project.output_path(BREAKDOWN_FILE), BREAKDOWN).unwrap();
    project.complete_step(Command::Breakdown).unwrap();
    project.complete_step(Command::Specs).unwrap();
    assert!(project.check(Command::SpecsUpload).is_err());

    push(&mut project, &fake).await;

    let project = Project::load(dir.path(), "portal").unwrap();
    let state = &project.config.state;
    assert!(state.is_set(PipelineFlag::AdoPushed));
    assert!(!state.is_set(PipelineFlag::SpecsGenerated));
    assert!(project.staleness_warnings().is_empty());

    let usage = project.usage_log().summary();
    assert_eq!(usage.total_operations, 1);
    assert!(usage.total_ado_api_calls >= 8);
    assert_eq!(usage.by_operation["push"].runs, 1);

    project.check(Command::SpecsUpload).unwrap();
    let specs = project.specs_dir();
    std::fs::create_dir_all(specs.join("fe")).unwrap();
    std::fs::create_dir_all(specs.join("be")).unwrap();
    std::fs::write(specs.join("fe/US-001_login_page.yaml"), "screen: login").unwrap();
    std::fs::write(specs.join("be/US-001_login_page.yaml"), "endpoint: /session").unwrap();
    std::fs::write(specs.join("be/password-reset.yml"), "endpoint: /reset").unwrap();
    std::fs::write(specs.join("fe/password-reset.yml"), "screen: reset").unwrap();

    let client = fake.client();
    let mapping = MappingStore::in_dir(&project.output_dir()).load();
    let files = collect_spec_files(&specs).unwrap();
    let report = SpecUploader::new(&client).upload_all(files, &mapping).await;

    assert_eq!(report.uploaded(), 3);
    assert_eq!(report.errors(), 1);

    let tasks = fake.titles("Task");
    let task_id = |title: &str| tasks.iter().find(|(_, t)| t == title).map(|(id, _)| *id).unwrap();
    let attached = |id: u64| {
        fake.item(id)
            .and_then(|item| item["relations"].as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter(|r| r["rel"] == "AttachedFile")
            .count()
    };
    assert_eq!(attached(task_id("[FE] Login page")), 1);
    assert_eq!(attached(task_id("[BE] Login page")), 1);
    assert_eq!(attached(task_id("[BE] Password reset")), 1);
}

#[tokio::test]
async fn test_input_changes_after_ingest_are_flagged() {
    let dir = tempdir().unwrap();
    let mut project = new_project(dir.path());
    std::fs::write(project.input_dir().join("brief.md"), "Build a portal").unwrap();

    project.complete_step(Command::Ingest).unwrap();
    assert!(project.config.state.requirements_hash.is_some());
    assert!(project.staleness_warnings().is_empty());

    std::fs::write(project.input_dir().join("brief.md"), "Build a portal and an app").unwrap();
    let warnings = project.staleness_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Input files changed"));

    let cleared = project.complete_step(Command::Ingest).unwrap();
    assert!(cleared.is_empty());
    assert!(project.staleness_warnings().is_empty());
}
