//! Meeting analysis.
//!
//! Pure extraction of decisions, action items, next steps, participants,
//! and candidate tasks from meeting text. No side effects: converting a
//! suggestion into a task is the caller's decision through the document
//! store.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{TaskPriority, extract_date};

/// A candidate task surfaced from a meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSuggestion {
    /// Proposed task title.
    pub title: String,
    /// Longer description with the originating line.
    pub description: String,
    /// Proposed priority.
    pub priority: TaskPriority,
    /// Deadline when one was stated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    /// Assignee when one was stated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Suggestion category.
    pub category: String,
    /// Extraction confidence in [0, 1].
    pub confidence: f64,
    /// The meeting line the suggestion came from.
    pub context: String,
}

/// Structured analysis of one meeting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingAnalysis {
    /// Short summary of the meeting.
    pub summary: String,
    /// Decisions recorded in the text.
    pub key_decisions: Vec<String>,
    /// Action items found.
    pub action_items: Vec<String>,
    /// Next steps found.
    pub next_steps: Vec<String>,
    /// Participant names.
    pub participants: Vec<String>,
    /// Candidate tasks derived from action items.
    pub suggested_tasks: Vec<TaskSuggestion>,
    /// Overall extraction confidence in [0, 1].
    pub confidence_score: f64,
}

/// Analyzes meeting text into a structured record.
///
/// Pure function over its inputs; given identical text, date, and title
/// the output is identical.
#[must_use]
pub fn analyze(meeting_text: &str, date: NaiveDate, title: Option<&str>) -> MeetingAnalysis {
    let lines: Vec<&str> = meeting_text.lines().collect();

    let key_decisions = matching_lines(
        &lines,
        r"(?i)\b(decided|decision|agreed|approved|resolved)\b",
    );
    let action_items = extract_action_items(&lines);
    let next_steps = extract_section(&lines, r"(?i)^#+\s*next steps|^next steps\b")
        .into_iter()
        .chain(matching_lines(&lines, r"(?i)\bnext step\b"))
        .collect::<Vec<_>>();
    let participants = extract_participants(&lines);

    let suggested_tasks: Vec<TaskSuggestion> = action_items
        .iter()
        .map(|item| suggestion_from_item(item, date, title))
        .collect();

    let confidence_score = if suggested_tasks.is_empty() {
        if key_decisions.is_empty() && action_items.is_empty() {
            0.2
        } else {
            0.5
        }
    } else {
        suggested_tasks.iter().map(|s| s.confidence).sum::<f64>()
            / suggested_tasks.len() as f64
    };

    MeetingAnalysis {
        summary: summarize(meeting_text, title),
        key_decisions,
        action_items,
        next_steps,
        participants,
        suggested_tasks,
        confidence_score,
    }
}

/// Lines matching a pattern, trimmed of bullet markers.
fn matching_lines(lines: &[&str], pattern: &str) -> Vec<String> {
    let Ok(re) = Regex::new(pattern) else {
        return Vec::new();
    };
    lines
        .iter()
        .filter(|line| re.is_match(line))
        .map(|line| clean_bullet(line))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Action item patterns: bullet markers with action/todo/follow-up
/// keywords, unchecked checkboxes, and "X will ..." commitments.
fn extract_action_items(lines: &[&str]) -> Vec<String> {
    let Ok(keyword_re) = Regex::new(r"(?i)\b(action|todo|follow[ -]?up)\b") else {
        return Vec::new();
    };
    let Ok(checkbox_re) = Regex::new(r"^\s*[-*]\s*\[ \]") else {
        return Vec::new();
    };
    let Ok(will_re) = Regex::new(r"^[A-Z][a-z]+(?: [A-Z][a-z]+)? will\b") else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for line in lines {
        let cleaned = clean_bullet(line);
        if cleaned.is_empty() {
            continue;
        }
        if checkbox_re.is_match(line) || keyword_re.is_match(line) || will_re.is_match(&cleaned) {
            items.push(cleaned);
        }
    }
    items
}

/// Collects the bullet lines under a heading matching `pattern`.
fn extract_section(lines: &[&str], pattern: &str) -> Vec<String> {
    let Ok(re) = Regex::new(pattern) else {
        return Vec::new();
    };
    let mut in_section = false;
    let mut collected = Vec::new();
    for line in lines {
        if re.is_match(line) {
            in_section = true;
            continue;
        }
        if in_section {
            if line.trim_start().starts_with('#') || line.trim().is_empty() {
                in_section = false;
                continue;
            }
            let cleaned = clean_bullet(line);
            if !cleaned.is_empty() {
                collected.push(cleaned);
            }
        }
    }
    collected
}

/// Participant names from an attendees line.
fn extract_participants(lines: &[&str]) -> Vec<String> {
    let Ok(re) = Regex::new(r"(?i)^\s*(attendees|participants|present)\s*[:\-]\s*(.+)$") else {
        return Vec::new();
    };
    for line in lines {
        if let Some(captures) = re.captures(line) {
            return captures
                .get(2)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty())
                        .collect()
                })
                .unwrap_or_default();
        }
    }
    Vec::new()
}

/// Builds a task suggestion from an action-item line.
fn suggestion_from_item(item: &str, date: NaiveDate, title: Option<&str>) -> TaskSuggestion {
    let priority = if Regex::new(r"(?i)\b(urgent|asap|critical|blocker)\b")
        .is_ok_and(|re| re.is_match(item))
    {
        TaskPriority::High
    } else if Regex::new(r"(?i)\b(should|soon|important)\b").is_ok_and(|re| re.is_match(item)) {
        TaskPriority::Medium
    } else {
        TaskPriority::Low
    };

    // "by <date expression>" deadlines, resolved against the meeting date
    let deadline = item
        .to_lowercase()
        .split_once(" by ")
        .and_then(|(_, tail)| extract_date(tail, date));

    let strip_re = Regex::new(r"(?i)^(action item|action|todo|follow[ -]?up)\s*[:\-]\s*").ok();
    let task_title = strip_re
        .and_then(|re| {
            let stripped = re.replace(item, "").trim().to_string();
            (!stripped.is_empty()).then_some(stripped)
        })
        .unwrap_or_else(|| item.to_string());

    // "Name will ..." / "Name to ..." / "Name: ..." commitment patterns,
    // matched after the keyword prefix is gone
    let assignee = Regex::new(r"^([A-Z][a-z]+(?: [A-Z][a-z]+)?)(?: will\b|:| to\b)")
        .ok()
        .and_then(|re| re.captures(&task_title))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    // Confidence: explicit keyword + assignee beats a bare commitment line
    let has_keyword = Regex::new(r"(?i)\b(action|todo|follow[ -]?up)\b")
        .is_ok_and(|re| re.is_match(item));
    let confidence = match (has_keyword, assignee.is_some()) {
        (true, true) => 0.9,
        (true, false) => 0.75,
        (false, true) => 0.6,
        (false, false) => 0.4,
    };

    TaskSuggestion {
        title: truncate_title(&task_title),
        description: title.map_or_else(
            || item.to_string(),
            |t| format!("From meeting \"{t}\": {item}"),
        ),
        priority,
        deadline,
        assignee,
        category: "meeting_follow_up".to_string(),
        confidence,
        context: item.to_string(),
    }
}

/// First sentence or two as the summary.
fn summarize(text: &str, title: Option<&str>) -> String {
    let first_para = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| {
            let lowered = p.to_lowercase();
            !p.is_empty()
                && !p.starts_with('#')
                && !lowered.starts_with("attendees")
                && !lowered.starts_with("participants")
        })
        .unwrap_or("");
    let mut sentences = first_para.split_inclusive(['.', '!', '?']);
    let lead: String = sentences.by_ref().take(2).collect::<String>();
    let lead = lead.trim();
    match (title, lead.is_empty()) {
        (Some(t), true) => format!("Meeting: {t}."),
        (Some(t), false) => format!("{t}: {lead}"),
        (None, true) => String::new(),
        (None, false) => lead.to_string(),
    }
}

/// Strips bullet markers and checkbox syntax from a line.
fn clean_bullet(line: &str) -> String {
    let trimmed = line.trim();
    let trimmed = trimmed
        .trim_start_matches(['-', '*', '•'])
        .trim_start();
    let trimmed = trimmed
        .strip_prefix("[ ]")
        .or_else(|| trimmed.strip_prefix("[x]"))
        .unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Keeps a title to a readable length, cutting at a word boundary.
fn truncate_title(title: &str) -> String {
    const MAX: usize = 80;
    if title.len() <= MAX {
        return title.to_string();
    }
    let mut cut = MAX;
    while cut > 0 && !title.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &title[..cut];
    head.rfind(' ')
        .map_or_else(|| head.to_string(), |pos| head[..pos].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEETING: &str = "\
# Atlas sync

Attendees: Alice Nguyen, Bob Martin, Carol Jones

We reviewed the rollout timeline and the data migration.
Decision: we agreed to ship the ingestion pipeline first.

- [ ] TODO: Alice to draft the migration runbook by friday
- Action: Bob will update the capacity forecast
- General note about the weather

## Next steps
- Schedule the load test
- Confirm the vendor contract
";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    #[test]
    fn test_participants() {
        let analysis = analyze(MEETING, date(), Some("Atlas sync"));
        assert_eq!(
            analysis.participants,
            vec!["Alice Nguyen", "Bob Martin", "Carol Jones"]
        );
    }

    #[test]
    fn test_decisions() {
        let analysis = analyze(MEETING, date(), None);
        assert_eq!(analysis.key_decisions.len(), 1);
        assert!(analysis.key_decisions[0].contains("agreed to ship"));
    }

    #[test]
    fn test_action_items() {
        let analysis = analyze(MEETING, date(), None);
        assert_eq!(analysis.action_items.len(), 2);
        assert!(analysis.action_items[0].contains("migration runbook"));
        assert!(analysis.action_items[1].contains("capacity forecast"));
    }

    #[test]
    fn test_next_steps_section() {
        let analysis = analyze(MEETING, date(), None);
        assert!(
            analysis
                .next_steps
                .iter()
                .any(|s| s.contains("load test"))
        );
        assert!(
            analysis
                .next_steps
                .iter()
                .any(|s| s.contains("vendor contract"))
        );
    }

    #[test]
    fn test_suggested_tasks() {
        let analysis = analyze(MEETING, date(), Some("Atlas sync"));
        assert_eq!(analysis.suggested_tasks.len(), 2);

        let runbook = &analysis.suggested_tasks[0];
        assert!(runbook.title.contains("migration runbook"));
        assert_eq!(runbook.assignee.as_deref(), Some("Alice"));
        // "by friday" resolves against the meeting date (a Tuesday)
        assert_eq!(runbook.deadline, NaiveDate::from_ymd_opt(2025, 6, 13));
        assert!(runbook.confidence >= 0.9);
        assert_eq!(runbook.category, "meeting_follow_up");

        let forecast = &analysis.suggested_tasks[1];
        assert_eq!(forecast.assignee.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_summary_uses_title() {
        let analysis = analyze(MEETING, date(), Some("Atlas sync"));
        assert!(analysis.summary.starts_with("Atlas sync:"));
        assert!(analysis.summary.contains("rollout timeline"));
    }

    #[test]
    fn test_pure_and_deterministic() {
        let a = analyze(MEETING, date(), Some("Atlas sync"));
        let b = analyze(MEETING, date(), Some("Atlas sync"));
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_empty_text_low_confidence() {
        let analysis = analyze("", date(), None);
        assert!(analysis.suggested_tasks.is_empty());
        assert!(analysis.confidence_score <= 0.2);
        assert!(analysis.summary.is_empty());
    }

    #[test]
    fn test_priority_keywords() {
        let urgent = analyze("- TODO: fix the urgent login outage", date(), None);
        assert_eq!(urgent.suggested_tasks[0].priority, TaskPriority::High);

        let medium = analyze("- TODO: we should refresh the docs", date(), None);
        assert_eq!(medium.suggested_tasks[0].priority, TaskPriority::Medium);
    }

    #[test]
    fn test_truncate_title_word_boundary() {
        let long = "word ".repeat(40);
        let truncated = truncate_title(&long);
        assert!(truncated.len() <= 80);
        assert!(truncated.ends_with("word"));
    }
}
