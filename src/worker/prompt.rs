//! Agent prompt rendering.
//!
//! The prompt is a pure function of the issue snapshot and its comments so a
//! re-run of the same task sends the same text.

use chrono::DateTime;

use crate::tracker::{Comment, Issue};

/// Build the full prompt for an issue.
pub fn build_prompt(issue: &Issue, comments: &[Comment]) -> String {
    let summary = issue.fields.summary.trim();
    let description = issue.description_text();
    let description = if description.trim().is_empty() {
        "(no description)".to_string()
    } else {
        description
    };

    format!(
        "\
You are working on issue {key}: {summary}

Implement the change described below in this repository. Keep the change \
focused on the issue, run the project's tests if there are any, then commit \
your work on the current branch and push it to origin.

## Description
{description}

## Comments
{comments}
",
        key = issue.key,
        comments = render_comments(comments),
    )
}

/// Render comments as a numbered list: index, author, date, body.
pub fn render_comments(comments: &[Comment]) -> String {
    if comments.is_empty() {
        return "(no comments)".to_string();
    }

    comments
        .iter()
        .enumerate()
        .map(|(i, comment)| {
            format!(
                "[{}] {} ({}):\n{}",
                i + 1,
                comment.author_name(),
                format_date(&comment.created),
                comment.body_text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Jira timestamps look like `2024-05-01T10:00:00.000+0000`.
fn format_date(raw: &str) -> String {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}
