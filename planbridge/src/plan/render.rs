//! HTML bodies for created work items.

use crate::plan::model::{AcceptanceCriteria, PlanEpic, PlanFeature, TechnicalContext};

/// Shown when a story has no acceptance criteria yet.
pub const CRITERIA_PLACEHOLDER: &str = "To be defined when designs are ready.";

fn list_items<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    items
        .into_iter()
        .map(|item| format!("<li>{item}</li>"))
        .collect()
}

pub fn epic_description(epic: &PlanEpic) -> String {
    format!(
        "<h3>{}</h3><p>{}</p><p><b>Features:</b></p><ul>{}</ul>",
        epic.name,
        epic.description,
        list_items(epic.features.iter().map(|f| f.name.as_str()))
    )
}

pub fn feature_description(feature: &PlanFeature) -> String {
    format!(
        "<h4>{}</h4><p><b>Stories:</b></p><ul>{}</ul>",
        feature.name,
        list_items(feature.stories.iter().map(|s| s.title.as_str()))
    )
}

/// The user story text with one line per `<br>`.
pub fn story_description(user_story: &str) -> String {
    user_story.replace('\n', "<br>")
}

/// Numbered criteria groups, or the placeholder when there are none.
pub fn criteria_html(criteria: &AcceptanceCriteria) -> String {
    if criteria.is_empty() {
        return format!("<p>{CRITERIA_PLACEHOLDER}</p>");
    }
    match criteria {
        AcceptanceCriteria::Text(text) => format!("<p>{text}</p>"),
        AcceptanceCriteria::Groups(groups) => groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let n = i + 1;
                let title = group
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("Criterion {n}"));
                format!(
                    "<b>AC {n}:</b> {title}<br><ul>{}</ul>",
                    list_items(group.items.iter().map(String::as_str))
                )
            })
            .collect(),
        AcceptanceCriteria::Lines(lines) => lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .map(|(i, line)| format!("<b>AC {}:</b> {line}<br><ul><li>{line}</li></ul>", i + 1))
            .collect(),
    }
}

/// Criteria followed by the technical context block, if any.
pub fn acceptance_html(criteria: &AcceptanceCriteria, context: Option<&TechnicalContext>) -> String {
    let mut html = criteria_html(criteria);
    if let Some(context) = context {
        html.push_str(&technical_context_html(context));
    }
    html
}

/// Empty when every section is empty.
pub fn technical_context_html(context: &TechnicalContext) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut html = String::from("<hr><b>Technical Context</b><br><br>");
    for (heading, items) in context.sections() {
        if !items.is_empty() {
            html.push_str(&format!(
                "<b>{heading}:</b><br><ul>{}</ul>",
                list_items(items.iter().map(String::as_str))
            ));
        }
    }
    html
}
