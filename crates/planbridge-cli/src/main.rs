//! Planbridge command line
//!
//! Drives one project directory through the pipeline: records finished steps,
//! pushes the work plan to the tracker, attaches spec files, files change
//! requests and publishes wiki pages.
//!
//! # Usage
//!
//! ```bash
//! planbridge init portal --organization contoso --ado-project Portal
//! planbridge --project portal record breakdown
//! planbridge --project portal push --dry-run
//! planbridge --project portal push --yes
//!
//! # Projects live under ./projects unless told otherwise
//! PLANBRIDGE_PROJECTS_DIR=/srv/plans planbridge list
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use planbridge::project::projects_root;
use planbridge::Project;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding project folders (overrides PLANBRIDGE_PROJECTS_DIR)
    #[arg(long, global = true)]
    projects_dir: Option<PathBuf>,

    /// Project to operate on
    #[arg(long, short = 'p', global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a new project folder and project.yaml
    Init {
        name: String,
        /// Tracker organization (falls back to ADO_ORGANIZATION at use time)
        #[arg(long, default_value = "")]
        organization: String,
        /// Tracker project (falls back to ADO_PROJECT at use time)
        #[arg(long, default_value = "")]
        ado_project: String,
        /// Personal access token; leave empty to read ADO_PAT at use time
        #[arg(long, default_value = "")]
        pat: String,
    },

    /// List projects under the projects directory
    List,

    /// Verify tracker settings and connectivity
    Check,

    /// Show pipeline flags, staleness warnings and change history
    Status,

    /// Mark a pipeline step as completed outside this tool
    Record {
        /// Step produced outside the tool: ingest, overview, breakdown, specs or validate
        step: String,
    },

    /// Push the work plan to the tracker
    Push {
        /// Show what would be created without touching the tracker
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },

    /// Attach generated spec files to their [FE]/[BE] tasks
    SpecsUpload,

    /// Record a change request against the pushed plan
    Change {
        /// Change request id, e.g. CR-001
        #[arg(long)]
        cr: String,
        /// Change analysis JSON
        #[arg(long)]
        analysis: PathBuf,
        /// Original change request text
        #[arg(long)]
        source: PathBuf,
    },

    /// Create or update a wiki page from a markdown file
    WikiPublish {
        /// Page path, e.g. /Release Notes/Sprint 1
        #[arg(long)]
        path: String,
        /// Markdown file with the page content
        #[arg(long)]
        file: PathBuf,
        /// Wiki id or name; defaults to the project wiki, created if missing
        #[arg(long)]
        wiki: Option<String>,
        /// Files to upload as wiki attachments before publishing
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },

    /// Summarize tracker API usage recorded for the project
    Usage,
}

impl Cli {
    fn open_project(&self, root: &std::path::Path) -> Result<Project> {
        let name = self
            .project
            .as_deref()
            .context("No project selected. Pass --project <name>")?;
        Project::load(root, name).with_context(|| format!("Failed to open project '{name}'"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let root = projects_root(cli.projects_dir.as_deref());

    match &cli.command {
        Cmd::Init {
            name,
            organization,
            ado_project,
            pat,
        } => commands::init(&root, name, organization, ado_project, pat),
        Cmd::List => commands::list(&root),
        Cmd::Check => commands::check(&cli.open_project(&root)?).await,
        Cmd::Status => commands::status(&cli.open_project(&root)?),
        Cmd::Record { step } => commands::record(&mut cli.open_project(&root)?, step),
        Cmd::Push { dry_run, yes } => {
            commands::push(&mut cli.open_project(&root)?, *dry_run, *yes).await
        }
        Cmd::SpecsUpload => commands::specs_upload(&mut cli.open_project(&root)?).await,
        Cmd::Change {
            cr,
            analysis,
            source,
        } => commands::change(&mut cli.open_project(&root)?, cr, analysis, source).await,
        Cmd::WikiPublish {
            path,
            file,
            wiki,
            attachments,
        } => {
            let project = cli.open_project(&root)?;
            commands::wiki_publish(&project, path, file, wiki.as_deref(), attachments).await
        }
        Cmd::Usage => commands::usage(&cli.open_project(&root)?),
    }
}
