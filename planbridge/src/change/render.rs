//! HTML bodies for change-log items.

use crate::change::analysis::ChangeAnalysis;
use crate::plan::{render, AcceptanceCriteria, WorkPlan};
use crate::project::ChangeRecord;

/// Characters of the raw request quoted in the CR item.
const QUOTE_LIMIT: usize = 500;
const SUMMARY_LIMIT: usize = 60;
const CRITERIA_LIMIT: usize = 80;

pub fn changelog_epic_title(project: &str) -> String {
    format!("Change Log — {project}")
}

pub fn changelog_epic_description(project: &str) -> String {
    format!(
        "<h3>Change Log for {project}</h3>\
         <p>Each child item represents a change request with full impact analysis.</p>"
    )
}

/// Dollar amount with an explicit sign and thousands separators: `$+1,300`.
pub fn signed_money(amount: f64) -> String {
    let rounded = amount.round();
    let sign = if rounded < 0.0 { '-' } else { '+' };
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("${sign}{grouped}")
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// `<p>` wrapped user story, one `<br>` per line.
pub fn new_story_description(user_story: &str) -> String {
    format!("<p>{}</p>", user_story.replace('\n', "<br>\n"))
}

/// Criteria of a story created by a change request, followed by its first
/// change-log entry.
pub fn new_story_acceptance(criteria: &AcceptanceCriteria, cr_id: &str, date: &str) -> String {
    let mut html = if criteria.is_empty() {
        String::new()
    } else {
        render::criteria_html(criteria)
    };
    html.push_str(&format!(
        "<br><b>Change Log:</b><br><br>\
         <b>Change 1:</b> Story created<br>\
         <b>Date:</b> {date}<br>\
         <b>Reason:</b> {cr_id}"
    ));
    html
}

/// Description of the CR item created under the change-log epic.
pub fn change_request_description(
    cr_id: &str,
    analysis: &ChangeAnalysis,
    change_text: &str,
    timestamp: &str,
) -> String {
    let impact = &analysis.impact;
    let mut html = format!(
        "<h3>{cr_id}: {}</h3>\n\
         <p><b>Date:</b> {timestamp}</p>\n\
         <p><b>Classification:</b> {}</p>\n\
         <p><b>Risk:</b> {}</p>\n\n\
         <h4>Impact</h4>\n<table>\n\
         <tr><td><b>Effort delta</b></td><td>{} days</td></tr>\n\
         <tr><td><b>Cost delta</b></td><td>{}</td></tr>\n\
         <tr><td><b>Timeline</b></td><td>{}</td></tr>\n\
         </table>\n",
        analysis.summary,
        analysis.classification,
        impact.risk_assessment,
        impact.total_delta_days,
        signed_money(impact.total_delta_cost),
        impact.timeline_impact,
    );

    if !analysis.new_stories.is_empty() {
        html.push_str(
            "\n<h4>New Stories</h4><table><tr><th>ID</th><th>Title</th><th>FE</th>\
             <th>BE</th><th>DevOps</th><th>Design</th></tr>",
        );
        for spec in &analysis.new_stories {
            let story = &spec.story;
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                story.id.as_deref().unwrap_or("?"),
                story.title,
                story.fe_days,
                story.be_days,
                story.devops_days,
                story.design_days,
            ));
        }
        html.push_str("</table>\n");
    }

    if !analysis.modified_stories.is_empty() {
        html.push_str("\n<h4>Modified Stories</h4><table><tr><th>ID</th><th>Title</th><th>Change</th></tr>");
        for modification in &analysis.modified_stories {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                modification.original_id.as_deref().unwrap_or("?"),
                modification.original_title.as_deref().unwrap_or("?"),
                modification.change_description,
            ));
        }
        html.push_str("</table>\n");
    }

    let quoted = truncate(change_text, QUOTE_LIMIT);
    let ellipsis = if quoted.len() < change_text.len() { "..." } else { "" };
    html.push_str(&format!(
        "\n<h4>Original Request</h4>\n<blockquote>{quoted}{ellipsis}</blockquote>\n\n\
         <p><b>Recommendation:</b> {}</p>",
        analysis.recommendation
    ));
    html
}

/// Running summary table for the change-log epic: every recorded change plus
/// the one being recorded now.
pub fn changelog_summary(project: &str, recorded: &[ChangeRecord], latest: &ChangeRecord) -> String {
    let all: Vec<&ChangeRecord> = recorded.iter().chain(std::iter::once(latest)).collect();
    let total: f64 = all.iter().map(|cr| cr.cost_delta).sum();

    let rows: String = all
        .iter()
        .map(|cr| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                if cr.approved { "Approved" } else { "Pending" },
                cr.id,
                truncate(&cr.summary, SUMMARY_LIMIT),
                signed_money(cr.cost_delta),
            )
        })
        .collect();

    format!(
        "<h3>Change Log Summary — {project}</h3>\n\
         <p><b>Total change requests:</b> {}</p>\n\
         <p><b>Total cost impact:</b> {}</p>\n\n\
         <table>\n\
         <tr><th>Status</th><th>ID</th><th>Summary</th><th>Cost Impact</th></tr>\n\
         {rows}\
         <tr><td colspan=\"3\"><b>Total</b></td><td><b>{}</b></td></tr>\n\
         </table>",
        all.len(),
        signed_money(total),
        signed_money(total),
    )
}

/// Compact outline of a plan, one line per story, used as context when
/// analysing a change request.
pub fn summarize_breakdown(plan: &WorkPlan) -> String {
    let mut lines = Vec::new();
    for epic in &plan.epics {
        lines.push(format!("\nEPIC: {}", epic.name));
        for feature in &epic.features {
            lines.push(format!("  FEATURE: {}", feature.name));
            for story in &feature.stories {
                let criteria = story.acceptance_criteria.plain_text();
                lines.push(format!(
                    "    {}: {} (FE:{}d BE:{}d) — {}",
                    story.id.as_deref().unwrap_or("?"),
                    story.title,
                    story.fe_days,
                    story.be_days,
                    truncate(&criteria, CRITERIA_LIMIT),
                ));
            }
        }
    }
    lines.join("\n")
}
