//! Staleness graph
//!
//! Two static tables drive every pipeline command:
//! - preconditions: flags that must be set before the command may run
//! - invalidations: flags cleared once the command completes, because the
//!   artifacts they describe were derived from what the command just rewrote
//!
//! A flag is only ever set by the command that [`produces`] it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::error::{PipelineError, PipelineResult};

/// One flag per generated artifact class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineFlag {
    RequirementsIngested,
    OverviewGenerated,
    BreakdownGenerated,
    AdoPushed,
    Validated,
    Enriched,
    SpecsGenerated,
}

impl PipelineFlag {
    pub const ALL: [PipelineFlag; 7] = [
        Self::RequirementsIngested,
        Self::OverviewGenerated,
        Self::BreakdownGenerated,
        Self::AdoPushed,
        Self::Validated,
        Self::Enriched,
        Self::SpecsGenerated,
    ];

    /// Key in the persisted state table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequirementsIngested => "requirements_ingested",
            Self::OverviewGenerated => "overview_generated",
            Self::BreakdownGenerated => "breakdown_generated",
            Self::AdoPushed => "ado_pushed",
            Self::Validated => "validated",
            Self::Enriched => "enriched",
            Self::SpecsGenerated => "specs_generated",
        }
    }
}

impl fmt::Display for PipelineFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline steps known to the staleness graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ingest,
    Overview,
    Breakdown,
    BreakdownExport,
    Push,
    Specs,
    Validate,
    SpecsUpload,
    Rtm,
    Change,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Self::Ingest,
        Self::Overview,
        Self::Breakdown,
        Self::BreakdownExport,
        Self::Push,
        Self::Specs,
        Self::Validate,
        Self::SpecsUpload,
        Self::Rtm,
        Self::Change,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Overview => "overview",
            Self::Breakdown => "breakdown",
            Self::BreakdownExport => "breakdown-export",
            Self::Push => "push",
            Self::Specs => "specs",
            Self::Validate => "validate",
            Self::SpecsUpload => "specs-upload",
            Self::Rtm => "rtm",
            Self::Change => "change",
        }
    }

    /// Steps whose artifacts are produced outside this tool and can only be
    /// recorded by hand. Every other command sets its flag by running.
    pub fn is_recorded_externally(&self) -> bool {
        matches!(
            self,
            Self::Ingest | Self::Overview | Self::Breakdown | Self::Specs | Self::Validate
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownCommand { name: s.to_string() })
    }
}

const NEED_BREAKDOWN: (PipelineFlag, &str) = (
    PipelineFlag::BreakdownGenerated,
    "Breakdown not generated. Generate it first, then run: planbridge record breakdown",
);
const NEED_PUSH: (PipelineFlag, &str) = (
    PipelineFlag::AdoPushed,
    "Stories not pushed to the tracker. Run: planbridge push",
);

/// Flags that must be set before `command` runs, with the message shown when
/// one is missing.
pub fn preconditions(command: Command) -> &'static [(PipelineFlag, &'static str)] {
    match command {
        Command::Ingest | Command::Overview | Command::Breakdown | Command::Change => &[],
        Command::BreakdownExport | Command::Push | Command::Specs => &[NEED_BREAKDOWN],
        Command::Validate | Command::SpecsUpload | Command::Rtm => &[NEED_PUSH],
    }
}

/// Flags cleared after `command` completes.
pub fn invalidates(command: Command) -> &'static [PipelineFlag] {
    use PipelineFlag::*;
    match command {
        Command::Ingest => &[BreakdownGenerated, AdoPushed, SpecsGenerated, Validated],
        Command::Breakdown => &[AdoPushed, SpecsGenerated, Validated],
        Command::Push => &[SpecsGenerated, Validated],
        Command::Change => &[Validated],
        Command::Overview
        | Command::BreakdownExport
        | Command::Specs
        | Command::Validate
        | Command::SpecsUpload
        | Command::Rtm => &[],
    }
}

/// The flag `command` sets on success, if any.
pub fn produces(command: Command) -> Option<PipelineFlag> {
    match command {
        Command::Ingest => Some(PipelineFlag::RequirementsIngested),
        Command::Overview => Some(PipelineFlag::OverviewGenerated),
        Command::Breakdown => Some(PipelineFlag::BreakdownGenerated),
        Command::Push => Some(PipelineFlag::AdoPushed),
        Command::Specs => Some(PipelineFlag::SpecsGenerated),
        Command::Validate => Some(PipelineFlag::Validated),
        Command::BreakdownExport | Command::SpecsUpload | Command::Rtm | Command::Change => None,
    }
}

/// Artifact validity flags plus the input fingerprint recorded at ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default)]
    pub requirements_hash: Option<String>,
    /// Keyed by [`PipelineFlag::as_str`]; unknown keys are preserved.
    #[serde(flatten)]
    flags: BTreeMap<String, bool>,
}

impl Default for PipelineState {
    fn default() -> Self {
        let mut state = Self {
            requirements_hash: None,
            flags: BTreeMap::new(),
        };
        state.fill_defaults();
        state
    }
}

impl PipelineState {
    /// Add any known flag missing from a state written by an older version.
    pub fn fill_defaults(&mut self) {
        for flag in PipelineFlag::ALL {
            self.flags.entry(flag.as_str().to_string()).or_insert(false);
        }
    }

    pub fn is_set(&self, flag: PipelineFlag) -> bool {
        self.flags.get(flag.as_str()).copied().unwrap_or(false)
    }

    pub fn set(&mut self, flag: PipelineFlag, value: bool) {
        self.flags.insert(flag.as_str().to_string(), value);
    }

    /// Every known flag with its value.
    pub fn flags(&self) -> impl Iterator<Item = (PipelineFlag, bool)> + '_ {
        PipelineFlag::ALL.into_iter().map(|flag| (flag, self.is_set(flag)))
    }
}

/// Fail on the first unmet precondition of `command`.
pub fn check_preconditions(command: Command, state: &PipelineState) -> PipelineResult<()> {
    match preconditions(command)
        .iter()
        .find(|(flag, _)| !state.is_set(*flag))
    {
        Some((flag, message)) => Err(PipelineError::MissingPrerequisite {
            command,
            flag: *flag,
            message: message.to_string(),
        }),
        None => Ok(()),
    }
}

/// Clear the flags `command` invalidates. Returns only those that were set.
pub fn invalidate(command: Command, state: &mut PipelineState) -> Vec<PipelineFlag> {
    invalidates(command)
        .iter()
        .copied()
        .filter(|flag| {
            let was_set = state.is_set(*flag);
            if was_set {
                state.set(*flag, false);
            }
            was_set
        })
        .collect()
}

/// Record a successful run: invalidate downstream flags, then set the flag the
/// command produces. Returns the cleared flags.
pub fn complete(command: Command, state: &mut PipelineState) -> Vec<PipelineFlag> {
    let cleared = invalidate(command, state);
    if let Some(flag) = produces(command) {
        state.set(flag, true);
    }
    cleared
}

/// Advisory messages about artifacts that look out of date.
///
/// `current_input_hash` is the fingerprint of the input directory now; `None`
/// when it has no files. `answers_present` is true when client answers have
/// been dropped into the project.
pub fn staleness_warnings(
    state: &PipelineState,
    current_input_hash: Option<&str>,
    answers_present: bool,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if state.is_set(PipelineFlag::RequirementsIngested) {
        if let (Some(current), Some(stored)) = (current_input_hash, state.requirements_hash.as_deref()) {
            if !stored.is_empty() && current != stored {
                warnings.push("Input files changed since last ingest. Run: planbridge record ingest".to_string());
            }
        }
    }

    if answers_present
        && state.is_set(PipelineFlag::OverviewGenerated)
        && !state.is_set(PipelineFlag::BreakdownGenerated)
    {
        warnings.push(
            "Client answers available but breakdown not yet generated. Run: planbridge record breakdown"
                .to_string(),
        );
    }

    if state.is_set(PipelineFlag::BreakdownGenerated) && !state.is_set(PipelineFlag::AdoPushed) {
        warnings.push("Breakdown ready but not pushed to the tracker. Run: planbridge push".to_string());
    }

    warnings
}
