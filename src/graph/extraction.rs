//! Entity and relationship extraction from episode text.
//!
//! Primary path asks the LLM for a constrained JSON envelope; the
//! rule-based path covers provider outages and keeps ingestion
//! deterministic in tests. Both produce the same [`Extraction`] shape.

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::EntityKind;
use crate::error::{GraphError, ProviderError};
use crate::llm::{LlmProvider, oneshot_request};

/// An entity named by the extractor.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    /// Entity name as it appears in the text.
    pub name: String,
    /// Entity kind label.
    #[serde(rename = "type")]
    pub kind: String,
    /// One-sentence summary.
    #[serde(default)]
    pub summary: String,
}

/// A relationship named by the extractor.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelationship {
    /// Source entity name.
    pub source: String,
    /// Target entity name.
    pub target: String,
    /// Relationship kind.
    pub kind: String,
    /// Fact sentence the edge asserts.
    pub fact: String,
}

/// Extractor output for one episode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extraction {
    /// Entities found in the text.
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    /// Relationships among those entities.
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

/// System prompt constraining the extraction envelope.
const EXTRACTION_PROMPT: &str = r#"Extract entities and relationships from the text. Respond with JSON only:
{"entities": [{"name": "...", "type": "Person|Project|Technology|Organization|Topic|Date|Email|Document", "summary": "..."}],
 "relationships": [{"source": "...", "target": "...", "kind": "...", "fact": "..."}]}
Use entity names exactly as they appear. Keep summaries to one sentence."#;

/// Extracts entities and relationships via the LLM.
///
/// # Errors
///
/// Returns [`GraphError::Extraction`] when the response is not the
/// expected envelope; provider transport errors pass through for the
/// caller's fallback decision.
pub async fn llm_extraction(
    provider: &dyn LlmProvider,
    model: &str,
    text: &str,
) -> Result<Extraction, ExtractionFailure> {
    let request = oneshot_request(model, EXTRACTION_PROMPT, text, true);
    let response = provider
        .chat(&request)
        .await
        .map_err(ExtractionFailure::Provider)?;

    let parsed: Extraction = serde_json::from_str(strip_fences(&response.content))
        .map_err(|e| {
            ExtractionFailure::Malformed(GraphError::Extraction(format!(
                "bad extraction envelope: {e}"
            )))
        })?;
    debug!(
        entities = parsed.entities.len(),
        relationships = parsed.relationships.len(),
        "llm extraction complete"
    );
    Ok(parsed)
}

/// Why an LLM extraction did not produce a usable envelope.
#[derive(Debug)]
pub enum ExtractionFailure {
    /// The provider was unreachable; rule-based fallback applies.
    Provider(ProviderError),
    /// The provider answered with an unusable payload.
    Malformed(GraphError),
}

/// Strips a markdown code fence if the model wrapped its JSON in one.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map_or(trimmed, str::trim)
}

/// Deterministic rule-based extraction.
///
/// Heuristics: email addresses, ISO dates, and capitalized word runs
/// become entities; sentences containing two entities become a
/// `mentioned_with` relationship. Coarse but keeps the graph functional
/// without a provider.
#[must_use]
pub fn rule_based_extraction(text: &str) -> Extraction {
    let mut entities: Vec<ExtractedEntity> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut push = |name: &str, kind: EntityKind| {
        let key = super::normalize_name(name);
        if !key.is_empty() && seen.insert(key) {
            entities.push(ExtractedEntity {
                name: name.to_string(),
                kind: kind.as_str().to_string(),
                summary: String::new(),
            });
        }
    };

    if let Ok(email_re) = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}") {
        for m in email_re.find_iter(text) {
            push(m.as_str(), EntityKind::Email);
        }
    }
    if let Ok(date_re) = Regex::new(r"\b\d{4}-\d{2}-\d{2}\b") {
        for m in date_re.find_iter(text) {
            push(m.as_str(), EntityKind::Date);
        }
    }
    // Runs of capitalized words not at sentence start are likely names
    if let Ok(name_re) = Regex::new(r"\b[A-Z][a-z]+(?: [A-Z][a-z]+)+\b") {
        for m in name_re.find_iter(text) {
            push(m.as_str(), EntityKind::Person);
        }
    }

    // Pair entities co-occurring in a sentence
    let mut relationships = Vec::new();
    for sentence in text.split(['.', '!', '?', '\n']) {
        let present: Vec<&ExtractedEntity> = entities
            .iter()
            .filter(|e| sentence.contains(e.name.as_str()))
            .collect();
        for pair in present.windows(2) {
            relationships.push(ExtractedRelationship {
                source: pair[0].name.clone(),
                target: pair[1].name.clone(),
                kind: "mentioned_with".to_string(),
                fact: sentence.trim().to_string(),
            });
        }
    }

    Extraction {
        entities,
        relationships,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;

    #[tokio::test]
    async fn test_llm_extraction_parses_envelope() {
        let provider = ScriptedProvider::new([
            r#"{"entities":[{"name":"Alice Nguyen","type":"Person","summary":"Team lead."}],
                "relationships":[{"source":"Alice Nguyen","target":"Atlas","kind":"works_on","fact":"Alice leads Atlas."}]}"#,
        ]);
        let extraction = llm_extraction(&provider, "m", "Alice leads Atlas.")
            .await
            .unwrap();
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].kind, "Person");
        assert_eq!(extraction.relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_llm_extraction_strips_fences() {
        let provider = ScriptedProvider::new([
            "```json\n{\"entities\":[],\"relationships\":[]}\n```",
        ]);
        let extraction = llm_extraction(&provider, "m", "nothing here").await.unwrap();
        assert!(extraction.entities.is_empty());
    }

    #[tokio::test]
    async fn test_llm_extraction_malformed() {
        let provider = ScriptedProvider::new(["this is not json"]);
        let err = llm_extraction(&provider, "m", "text").await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::Malformed(_)));
    }

    #[tokio::test]
    async fn test_llm_extraction_provider_down() {
        let provider = ScriptedProvider::unavailable();
        let err = llm_extraction(&provider, "m", "text").await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::Provider(_)));
    }

    #[test]
    fn test_rule_based_finds_emails_dates_names() {
        let extraction = rule_based_extraction(
            "Alice Nguyen mailed bob@example.com on 2025-06-10 about the launch.",
        );
        let kinds: Vec<&str> = extraction.entities.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds.contains(&"Person"));
        assert!(kinds.contains(&"Email"));
        assert!(kinds.contains(&"Date"));
    }

    #[test]
    fn test_rule_based_cooccurrence_relationships() {
        let extraction =
            rule_based_extraction("Alice Nguyen met Bob Martin. Carol Jones was absent.");
        assert!(
            extraction
                .relationships
                .iter()
                .any(|r| r.kind == "mentioned_with"
                    && r.source == "Alice Nguyen"
                    && r.target == "Bob Martin")
        );
        // Carol appears alone in her sentence: no self-pairing
        assert!(
            !extraction
                .relationships
                .iter()
                .any(|r| r.source == "Carol Jones" || r.target == "Carol Jones")
        );
    }

    #[test]
    fn test_rule_based_dedupes_by_normalized_name() {
        let extraction = rule_based_extraction("Alice Nguyen spoke. Later, Alice Nguyen left.");
        let alice_count = extraction
            .entities
            .iter()
            .filter(|e| e.name == "Alice Nguyen")
            .count();
        assert_eq!(alice_count, 1);
    }
}
