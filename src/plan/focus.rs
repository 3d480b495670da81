//! Focus-area extraction from recent meeting notes.
//!
//! Rule-based: bullets matching action/todo/follow-up patterns and
//! section headings from notes in the lookback window. LLM mode adds a
//! few statements linking recent meetings to open tasks; provider
//! failure silently keeps the rule-based set.

use regex::Regex;
use tracing::debug;

use crate::core::{MeetingNote, Task};
use crate::llm::{LlmProvider, oneshot_request};

/// Maximum focus bullets surfaced in a plan.
const MAX_FOCUS_ITEMS: usize = 8;

/// Extracts focus bullets from notes with the rule table:
/// `action|todo|follow-up|TODO` bullet patterns plus section headings.
#[must_use]
pub fn rule_based_focus(notes: &[MeetingNote]) -> Vec<String> {
    let Ok(bullet_re) = Regex::new(r"(?i)^\s*[-*•]\s*(?:\[.\]\s*)?(.*\b(?:action|todo|follow[ -]?up)\b.*)$")
    else {
        return Vec::new();
    };
    let Ok(heading_re) = Regex::new(r"^#+\s+(.+)$") else {
        return Vec::new();
    };

    let mut focus = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for note in notes {
        for line in note.body.lines() {
            let extracted = bullet_re
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .or_else(|| {
                    heading_re
                        .captures(line)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().trim().to_string())
                });
            if let Some(item) = extracted
                && !item.is_empty()
                && seen.insert(item.to_lowercase())
            {
                focus.push(item);
            }
        }
    }

    focus.truncate(MAX_FOCUS_ITEMS);
    focus
}

/// System prompt for the LLM focus pass.
const FOCUS_PROMPT: &str = "Given recent meeting notes and a list of open tasks, write 2-4 short \
                            focus statements linking what was discussed to the open work. One \
                            statement per line, no bullets, no preamble.";

/// Asks the LLM for 2-4 focus statements tying recent meetings to open
/// tasks. Returns an empty list on provider failure.
pub async fn llm_focus(
    provider: &dyn LlmProvider,
    model: &str,
    notes: &[MeetingNote],
    open_tasks: &[Task],
) -> Vec<String> {
    if notes.is_empty() {
        return Vec::new();
    }

    let notes_text: String = notes
        .iter()
        .map(|n| format!("### {} ({})\n{}", n.path, n.date, n.body))
        .collect::<Vec<_>>()
        .join("\n\n");
    let tasks_text: String = open_tasks
        .iter()
        .map(|t| format!("- {} ({})", t.title, t.id))
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!("Meeting notes:\n{notes_text}\n\nOpen tasks:\n{tasks_text}");

    match provider
        .chat(&oneshot_request(model, FOCUS_PROMPT, &user, false))
        .await
    {
        Ok(response) => response
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(4)
            .map(ToString::to_string)
            .collect(),
        Err(e) => {
            debug!(error = %e, "focus provider unavailable, keeping rule-based focus");
            Vec::new()
        }
    }
}
