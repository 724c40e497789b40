//! Story relation pass
//!
//! Runs after every story is resolved. Both endpoints of a declared reference
//! are looked up in the final mapping; unmapped references are reported and
//! skipped. Created edges are recorded in the mapping so a later run does not
//! add them again.

use tracing::{info, warn};

use crate::ado::{RelationKind, WorkItemRepository};
use crate::plan::WorkPlan;
use crate::sync::error::SyncResult;
use crate::sync::mapping::{MappingState, MappingStore};
use crate::sync::report::SyncReport;

const PREDECESSOR_COMMENT: &str = "Predecessor: feature builds on this story's output";
const SIMILAR_COMMENT: &str = "Similar: same pattern/approach as this story";

struct Reference<'a> {
    target: &'a str,
    kind: RelationKind,
    label: &'static str,
    comment: &'static str,
}

pub(crate) async fn link_relations<R: WorkItemRepository + ?Sized>(
    repo: &R,
    store: &MappingStore,
    plan: &WorkPlan,
    state: &mut MappingState,
    report: &mut SyncReport,
) -> SyncResult<()> {
    for story_ref in plan.stories() {
        let story = story_ref.story;
        let local_id = story_ref.local_id();
        let references = story
            .predecessors
            .iter()
            .map(|target| Reference {
                target,
                kind: RelationKind::Predecessor,
                label: "predecessor",
                comment: PREDECESSOR_COMMENT,
            })
            .chain(story.similar_stories.iter().map(|target| Reference {
                target,
                kind: RelationKind::Related,
                label: "similar",
                comment: SIMILAR_COMMENT,
            }));

        for reference in references {
            let Some(source_id) = state.story_remote_id(&local_id) else {
                let message = format!("{local_id} is not mapped, cannot link {} {}", reference.label, reference.target);
                warn!(%message, "Skipping relation");
                report.link_warnings.push(message);
                continue;
            };
            let Some(target_id) = state.story_remote_id(reference.target) else {
                let message = format!("{local_id} → {} {}: target is not mapped", reference.label, reference.target);
                warn!(%message, "Skipping relation");
                report.link_warnings.push(message);
                continue;
            };
            if state.has_relation(&local_id, reference.target, reference.kind) {
                report.links_existing += 1;
                continue;
            }

            match repo
                .add_relation(source_id, target_id, reference.kind, Some(reference.comment.to_string()))
                .await
            {
                Ok(_) => {
                    state.record_relation(&local_id, reference.target, reference.kind);
                    store.save(state)?;
                    report.links_created += 1;
                }
                Err(e) => {
                    let message = format!("{local_id} → {} {}: {e}", reference.label, reference.target);
                    warn!(%message, "Failed to create relation");
                    report.link_warnings.push(message);
                }
            }
        }
    }

    if report.links_created > 0 {
        info!(links = report.links_created, "Created story relation links");
    }
    Ok(())
}
