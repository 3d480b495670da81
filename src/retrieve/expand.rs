//! Deterministic query expansion.
//!
//! Generates up to five diverse variants of a query without an LLM:
//! the literal text, a tag-seeded form, key terms after stopword
//! removal, and (for task-seeded brainstorm retrieval) objective- and
//! subtask-seeded forms.

use crate::core::{Task, TaskDetail};

/// Hard ceiling on generated variants.
pub const MAX_VARIANTS: usize = 5;

/// Common English stopwords removed by the key-term variant.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "for", "nor", "so", "yet", "to", "of", "in", "on",
    "at", "by", "with", "from", "into", "about", "over", "after", "is", "are", "was", "were",
    "be", "been", "being", "have", "has", "had", "do", "does", "did", "will", "would", "can",
    "could", "should", "may", "might", "must", "this", "that", "these", "those", "it", "its",
    "my", "our", "your", "their", "his", "her", "what", "which", "who", "how", "when", "where",
    "i", "we", "you", "they", "he", "she", "me", "us", "them",
];

/// Expands a free-text query into up to [`MAX_VARIANTS`] variants.
///
/// The literal query always comes first; duplicates (after whitespace
/// normalization) are dropped. Deterministic.
#[must_use]
pub fn expand_query(query: &str) -> Vec<String> {
    let mut variants = Vec::new();
    push_unique(&mut variants, query);
    push_unique(&mut variants, &key_terms(query));
    variants
}

/// Expands a task into up to `limit` variants for brainstorm retrieval:
/// literal title, tag-seeded, key terms, objective-seeded, and
/// subtask-seeded. Deterministic; `limit` is clamped to
/// [`MAX_VARIANTS`].
#[must_use]
pub fn expand_for_task(task: &Task, detail: Option<&TaskDetail>, limit: usize) -> Vec<String> {
    let limit = limit.clamp(1, MAX_VARIANTS);
    let mut variants = Vec::new();

    // Literal title
    push_unique(&mut variants, &task.title);

    // Tag-seeded
    if !task.tags.is_empty() {
        let tagged = format!("{} {}", task.title, task.tags.join(" "));
        push_unique(&mut variants, &tagged);
    }

    // Key terms over title + description
    let text = task.description.as_ref().map_or_else(
        || task.title.clone(),
        |d| format!("{} {d}", task.title),
    );
    push_unique(&mut variants, &key_terms(&text));

    if let Some(detail) = detail {
        // Objective-seeded
        if let Some(objective) = &detail.objective {
            push_unique(&mut variants, objective);
        }
        // Subtask-seeded: the first sub-items carry the concrete nouns
        if !detail.tasks.is_empty() {
            let seed = detail.tasks.iter().take(3).cloned().collect::<Vec<_>>().join(" ");
            push_unique(&mut variants, &seed);
        }
    }

    variants.truncate(limit);
    variants
}

/// Key terms: lowercase tokens with stopwords and punctuation removed.
#[must_use]
pub fn key_terms(text: &str) -> String {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| token.len() > 1 && !STOPWORDS.contains(&token.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pushes a normalized variant when non-empty and not already present.
fn push_unique(variants: &mut Vec<String>, candidate: &str) {
    let normalized = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return;
    }
    let key = normalized.to_lowercase();
    if !variants.iter().any(|v| v.to_lowercase() == key) {
        variants.push(normalized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_query_literal_first() {
        let variants = expand_query("How do I configure the vector index?");
        assert_eq!(variants[0], "How do I configure the vector index?");
        assert!(variants.len() >= 2);
        // Key-term variant drops stopwords
        assert_eq!(variants[1], "configure vector index");
    }

    #[test]
    fn test_expand_query_dedupes() {
        // A query of pure key terms produces no second variant
        let variants = expand_query("vector index");
        assert_eq!(variants.len(), 1);
    }

    #[test]
    fn test_key_terms() {
        assert_eq!(
            key_terms("What is the plan for the Q3 launch?"),
            "plan q3 launch"
        );
        assert_eq!(key_terms("the a an"), "");
    }

    #[test]
    fn test_expand_for_task_full() {
        let task = Task::new("T1", "Migrate the ingestion pipeline")
            .with_tags(["infra", "pipeline"]);
        let detail = TaskDetail {
            task_id: "T1".to_string(),
            objective: Some("Move ingestion to the new queue".to_string()),
            tasks: vec![
                "Inventory existing consumers".to_string(),
                "Write the cutover script".to_string(),
            ],
            acceptance_criteria: vec![],
        };

        let variants = expand_for_task(&task, Some(&detail), 5);
        assert_eq!(variants.len(), 5);
        assert_eq!(variants[0], "Migrate the ingestion pipeline");
        assert!(variants[1].contains("infra"));
        assert!(variants[3].contains("new queue"));
        assert!(variants[4].contains("cutover script"));
    }

    #[test]
    fn test_expand_for_task_limit() {
        let task = Task::new("T1", "Title").with_tags(["x"]);
        let variants = expand_for_task(&task, None, 2);
        assert_eq!(variants.len(), 2);

        // Limit clamps to the ceiling
        let variants = expand_for_task(&task, None, 50);
        assert!(variants.len() <= MAX_VARIANTS);
    }

    #[test]
    fn test_expand_for_task_deterministic() {
        let task = Task::new("T1", "Ship the release").with_tags(["release"]);
        assert_eq!(
            expand_for_task(&task, None, 5),
            expand_for_task(&task, None, 5)
        );
    }
}
