//! Command handlers. Each remote-calling command appends its call count to the
//! project's usage log, whether it succeeded or not.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use planbridge::ado::TransportConfig;
use planbridge::change::recorder::ChangeOutcome;
use planbridge::project::events::{self, Event};
use planbridge::project::UsageEntry;
use planbridge::specs::{collect_spec_files, SpecOutcome};
use planbridge::sync::{SyncPreview, SyncReport};
use planbridge::{
    load_plan, AdoClient, ChangeAnalysis, ChangeRequestRecorder, Command, HierarchySynchronizer,
    MappingStore, Project, RemoteIndex, SpecUploader, TrackerSettings,
};

type Details = Vec<(&'static str, Value)>;

fn connect(project: &Project) -> Result<AdoClient> {
    let config = project
        .ado_config()
        .context("Tracker settings incomplete. Set ado.* in project.yaml or ADO_ORGANIZATION/ADO_PROJECT/ADO_PAT")?;
    AdoClient::connect(config, TransportConfig::from_env()).context("Failed to build tracker client")
}

async fn connected(project: &Project) -> Result<AdoClient> {
    let client = connect(project)?;
    if !client.test_connection().await {
        bail!(
            "Cannot reach tracker project '{}' in organization '{}'",
            client.config().project,
            client.config().organization
        );
    }
    Ok(client)
}

/// Append one usage entry for the calls `client` made since the last take.
fn log_usage(project: &Project, client: &AdoClient, operation: &str, details: Details) {
    let stats = client.take_stats();
    let entry = details
        .into_iter()
        .fold(UsageEntry::new(operation, &stats), |entry, (key, value)| {
            entry.detail(key, value)
        });
    if let Err(e) = project.usage_log().append(entry) {
        warn!(operation, error = %e, "Failed to write usage log");
    }
}

fn complete(project: &mut Project, command: Command) -> Result<()> {
    let cleared = project
        .complete_step(command)
        .with_context(|| format!("Failed to record {command} in project.yaml"))?;
    for flag in cleared {
        println!("  Marked stale: {flag}");
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub fn init(root: &Path, name: &str, organization: &str, ado_project: &str, pat: &str) -> Result<()> {
    let project = Project::init(root, name, TrackerSettings::new(organization, ado_project, pat))
        .with_context(|| format!("Failed to create project '{name}'"))?;
    println!("Created project {} at {}", project.name(), project.root().display());
    if pat.is_empty() {
        println!("  No token stored; ADO_PAT will be read when the tracker is used");
    }
    Ok(())
}

pub fn list(root: &Path) -> Result<()> {
    let names = Project::list(root).with_context(|| format!("Failed to list {}", root.display()))?;
    if names.is_empty() {
        println!("No projects under {}", root.display());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

pub async fn check(project: &Project) -> Result<()> {
    let client = connect(project)?;
    let info = client.project_info().await;
    log_usage(project, &client, "check", Vec::new());
    let info = info.context("Tracker connection failed")?;
    println!(
        "Connected to {}/{} (project id {})",
        client.config().organization,
        info.name,
        info.id
    );
    for warning in project.staleness_warnings() {
        println!("  Warning: {warning}");
    }
    Ok(())
}

pub fn status(project: &Project) -> Result<()> {
    let config = &project.config;
    println!("Project: {} ({})", config.project, config.status);
    println!("Created: {}", config.created);
    for (flag, set) in config.state.flags() {
        println!("  [{}] {flag}", if set { "x" } else { " " });
    }
    for warning in project.staleness_warnings() {
        println!("  Warning: {warning}");
    }
    if !config.changes.is_empty() {
        println!("Change requests: {}", config.changes.len());
        for cr in &config.changes {
            println!("  {} {} ({:+} days): {}", cr.date, cr.id, cr.delta_days, cr.summary);
        }
    }
    Ok(())
}

pub fn record(project: &mut Project, step: &str) -> Result<()> {
    let command: Command = step.parse()?;
    let cleared = project
        .record_step(command)
        .with_context(|| format!("Cannot record {command}"))?;
    for flag in cleared {
        println!("  Marked stale: {flag}");
    }
    println!("Recorded {command} for {}", project.name());
    Ok(())
}

fn print_report(report: &SyncReport) {
    for event in &report.events {
        println!("  {event}");
    }
    if report.dry_run {
        return;
    }
    println!(
        "Epics: {} created, {} reused. Features: {} created, {} reused. Stories: {} created, {} skipped.",
        report.epics.created,
        report.epics.reused,
        report.features.created,
        report.features.reused,
        report.stories.created,
        report.stories.reused,
    );
    println!("Tasks created: {}", report.tasks_created);
    for failure in &report.task_failures {
        println!("  Task failed: {} ({}): {}", failure.task, failure.story, failure.error);
    }
    if report.links_created + report.links_existing > 0 {
        println!(
            "Relation links: {} created, {} already present",
            report.links_created, report.links_existing
        );
    }
    for warning in &report.link_warnings {
        println!("  Link warning: {warning}");
    }
}

pub async fn push(project: &mut Project, dry_run: bool, yes: bool) -> Result<()> {
    project.check(Command::Push)?;
    let loaded = load_plan(&project.output_dir())?;
    let store = MappingStore::in_dir(&project.output_dir());
    let mut state = store.load();

    // A dry run makes no remote calls, but the settings must still be complete.
    // A real push proves the tracker is reachable before asking to proceed.
    let client = if dry_run {
        connect(project)?
    } else {
        connected(project).await?
    };

    let preview = SyncPreview::new(&loaded.plan, &state);
    println!(
        "Plan {}: {} epics, {} features, {} stories ({} already pushed)",
        loaded.source.display(),
        preview.totals.epics,
        preview.totals.features,
        preview.totals.stories,
        preview.already_synced,
    );

    if dry_run {
        let report = HierarchySynchronizer::new(&client, &store)
            .dry_run(true)
            .run(&loaded.plan, &RemoteIndex::default(), &mut state)
            .await?;
        print_report(&report);
        return Ok(());
    }

    if preview.remaining() == 0 && state.epics.len() >= preview.totals.epics {
        info!("Every story is already mapped; checking relations only");
    } else if !yes && !confirm(&format!("Push {} stories to the tracker?", preview.remaining()))? {
        println!("Aborted");
        return Ok(());
    }

    if let Err(e) = client.ensure_repository(project.name()).await {
        warn!(repository = project.name(), error = %e, "Could not ensure repository, continuing");
    }

    let index = RemoteIndex::fetch(&client, &client.config().project).await;
    let result = HierarchySynchronizer::new(&client, &store)
        .run(&loaded.plan, &index, &mut state)
        .await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            log_usage(
                project,
                &client,
                "push",
                vec![("error", Value::from(e.to_string())), ("mapped_stories", state.stories.len().into())],
            );
            return Err(e).context("Push stopped; re-run to resume from the saved mapping");
        }
    };

    print_report(&report);
    log_usage(
        project,
        &client,
        "push",
        vec![
            ("items_created", report.items_created().into()),
            ("stories_created", report.stories.created.into()),
            ("tasks_failed", report.task_failures.len().into()),
            ("links_created", report.links_created.into()),
        ],
    );
    complete(project, Command::Push)
}

pub async fn specs_upload(project: &mut Project) -> Result<()> {
    project.check(Command::SpecsUpload)?;
    let specs_dir = project.specs_dir();
    let files = collect_spec_files(&specs_dir)
        .with_context(|| format!("Failed to scan {}", specs_dir.display()))?;
    if files.is_empty() {
        bail!("No spec files under {}/fe or {}/be", specs_dir.display(), specs_dir.display());
    }

    let mapping = MappingStore::in_dir(&project.output_dir()).load();
    if mapping.stories.is_empty() {
        bail!("No pushed stories in the mapping. Run: planbridge push");
    }

    let client = connected(project).await?;
    let report = SpecUploader::new(&client).upload_all(files, &mapping).await;
    for (spec, outcome) in &report.files {
        let line = match outcome {
            SpecOutcome::Uploaded { task, .. } => format!("uploaded to task #{task}"),
            SpecOutcome::NoStory => "no matching story".to_string(),
            SpecOutcome::NoTask { story } => format!("no task under story #{story}"),
            SpecOutcome::Failed { error, .. } => format!("failed: {error}"),
        };
        println!("  [{}] {}: {line}", spec.discipline.prefix(), spec.file_name());
    }
    println!("Uploaded {} spec files, {} errors", report.uploaded(), report.errors());

    log_usage(
        project,
        &client,
        "specs-upload",
        vec![("uploaded", report.uploaded().into()), ("errors", report.errors().into())],
    );
    complete(project, Command::SpecsUpload)
}

fn print_change(outcome: &ChangeOutcome) {
    println!(
        "Snapshot: {} ({} files)",
        outcome.snapshot.dir.display(),
        outcome.snapshot.files
    );
    for (title, id) in &outcome.new_stories.applied {
        println!("  Created story #{id}: {title}");
    }
    for (label, id) in &outcome.modified_stories.applied {
        println!("  Updated story #{id}: {label}");
    }
    for failure in outcome
        .new_stories
        .failures
        .iter()
        .chain(&outcome.modified_stories.failures)
    {
        println!("  Failed: {}: {}", failure.label, failure.error);
    }
    if outcome.modified_stories.skipped > 0 {
        println!("  Skipped {} modifications without an id or fields", outcome.modified_stories.skipped);
    }
    let changelog = &outcome.changelog;
    match changelog.feature_id {
        Some(id) => println!("Change log: feature #{id} under epic #{}", changelog.epic_id),
        None => println!("Change log: epic #{}, change request item not created", changelog.epic_id),
    }
}

pub async fn change(project: &mut Project, cr_id: &str, analysis: &Path, source: &Path) -> Result<()> {
    project.check(Command::Change)?;
    let analysis = ChangeAnalysis::from_file(analysis)?;
    let text = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read change request text {}", source.display()))?;

    let client = connected(project).await?;
    let outcome = ChangeRequestRecorder::new(&client, project)
        .apply(cr_id, &analysis, &text)
        .await;

    let details = match &outcome {
        Ok(outcome) => vec![
            ("cr", Value::from(cr_id)),
            ("stories_created", outcome.new_stories.applied.len().into()),
            ("stories_updated", outcome.modified_stories.applied.len().into()),
        ],
        Err(e) => vec![("cr", Value::from(cr_id)), ("error", e.to_string().into())],
    };
    log_usage(project, &client, "change", details);

    let outcome = outcome.with_context(|| format!("Failed to record change request {cr_id}"))?;
    print_change(&outcome);
    complete(project, Command::Change)
}

async fn resolve_wiki(client: &AdoClient, wanted: Option<&str>) -> Result<String> {
    let wikis = client.list_wikis().await.context("Failed to list wikis")?;
    if let Some(wanted) = wanted {
        return wikis
            .into_iter()
            .find(|w| w.id == wanted || w.name == wanted)
            .map(|w| w.id)
            .with_context(|| format!("No wiki named '{wanted}'"));
    }

    let default_name = format!("{}.wiki", client.config().project);
    if let Some(wiki) = wikis.into_iter().find(|w| w.name == default_name) {
        return Ok(wiki.id);
    }
    let wiki = client.create_wiki().await.context("Failed to create the project wiki")?;
    println!("Created wiki {}", wiki.name);
    Ok(wiki.id)
}

async fn publish_page(
    client: &AdoClient,
    page_path: &str,
    file: &Path,
    wiki: Option<&str>,
    attachments: &[PathBuf],
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let wiki = resolve_wiki(client, wiki).await?;

    for attachment in attachments {
        let bytes = std::fs::read(attachment)
            .with_context(|| format!("Failed to read attachment {}", attachment.display()))?;
        let name = attachment
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Attachment path has no file name: {}", attachment.display()))?;
        let path = client.upload_wiki_attachment(&wiki, &bytes, &name).await?;
        println!("  Attachment {name} at {path}");
    }

    let existing = client.get_page(&wiki, page_path).await?;
    client
        .upsert_page(&wiki, page_path, &content, existing.etag())
        .await
        .with_context(|| format!("Failed to publish {page_path}"))?;
    println!(
        "{} wiki page {page_path}",
        if existing.etag().is_some() { "Updated" } else { "Created" }
    );
    Ok(())
}

pub async fn wiki_publish(
    project: &Project,
    page_path: &str,
    file: &Path,
    wiki: Option<&str>,
    attachments: &[PathBuf],
) -> Result<()> {
    let client = connected(project).await?;
    let result = publish_page(&client, page_path, file, wiki, attachments).await;
    log_usage(project, &client, "wiki-publish", vec![("page", Value::from(page_path))]);
    if result.is_ok() {
        project.log_event(Event::new(events::WIKI_PUBLISHED).data("page", page_path));
    }
    result
}

pub fn usage(project: &Project) -> Result<()> {
    let summary = project.usage_log().summary();
    if summary.total_operations == 0 {
        println!("No tracker usage recorded for {}", project.name());
        return Ok(());
    }
    println!(
        "{} operations, {} tracker API calls",
        summary.total_operations, summary.total_ado_api_calls
    );
    if let (Some(first), Some(last)) = (&summary.first_operation, &summary.last_operation) {
        println!("From {first} to {last}");
    }
    for (operation, usage) in &summary.by_operation {
        println!(
            "  {operation:<14} {:>4} runs {:>6} calls {:>8.1}s",
            usage.runs, usage.ado_calls, usage.seconds
        );
    }
    Ok(())
}
