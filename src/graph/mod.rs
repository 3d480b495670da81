//! Entity/relationship graph store with vector-indexed search.
//!
//! Episodes (text payloads) are ingested through LLM extraction and
//! merged into the graph keyed by normalized entity name. Name- and
//! fact-level vector search degrades to case-insensitive substring
//! matching when the vector indices are absent, warned once per handle.

mod extraction;
mod sqlite;

pub use extraction::{ExtractedEntity, ExtractedRelationship, Extraction, rule_based_extraction};
pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Maximum traversal depth for [`GraphStore::neighbors`].
pub const MAX_TRAVERSAL_DEPTH: usize = 3;

/// Name of the entity-name vector index.
pub const ENTITY_NAME_INDEX: &str = "entity_name_embedding_index";
/// Name of the relationship-fact vector index.
pub const RELATIONSHIP_FACT_INDEX: &str = "relationship_fact_embedding_index";

/// Kind of a graph entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A person.
    Person,
    /// A project.
    Project,
    /// A technology or tool.
    Technology,
    /// An organization.
    Organization,
    /// A discussion topic.
    Topic,
    /// A date reference.
    Date,
    /// An email address.
    Email,
    /// A document reference.
    Document,
}

impl EntityKind {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Project => "Project",
            Self::Technology => "Technology",
            Self::Organization => "Organization",
            Self::Topic => "Topic",
            Self::Date => "Date",
            Self::Email => "Email",
            Self::Document => "Document",
        }
    }

    /// Parses the stable string form; unknown kinds map to `Topic`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "Person" => Self::Person,
            "Project" => Self::Project,
            "Technology" => Self::Technology,
            "Organization" => Self::Organization,
            "Date" => Self::Date,
            "Email" => Self::Email,
            "Document" => Self::Document,
            _ => Self::Topic,
        }
    }
}

/// An entity node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Short summary accumulated across episodes.
    pub summary: String,
    /// Dense embedding of the name, when the index is populated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_embedding: Option<Vec<f32>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A typed relationship edge.
///
/// Relationships may become invalid (`valid_to` set) but are never
/// physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier.
    pub uuid: String,
    /// Source entity uuid.
    pub source_uuid: String,
    /// Target entity uuid.
    pub target_uuid: String,
    /// Relationship kind (e.g. `works_on`, `mentions`).
    pub kind: String,
    /// Natural-language fact the edge asserts.
    pub fact: String,
    /// Dense embedding of the fact; required before the edge is
    /// eligible for vector search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_embedding: Option<Vec<f32>>,
    /// Episodes that produced or reasserted this edge (weak references
    /// by uuid, never ownership).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<String>,
    /// When the fact became valid.
    pub valid_from: DateTime<Utc>,
    /// When the fact stopped being valid, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

/// A bounded neighborhood of an entity.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    /// Entities reached by the traversal, root first.
    pub entities: Vec<Entity>,
    /// Edges among the reached entities.
    pub relationships: Vec<Relationship>,
}

/// Result of ingesting one episode.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    /// New entities created.
    pub entities_created: usize,
    /// Existing entities merged into.
    pub entities_merged: usize,
    /// Relationships created or reasserted.
    pub relationships_touched: usize,
}

/// Health snapshot of the graph store.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GraphHealth {
    /// Total entities.
    pub entity_count: usize,
    /// Total relationships.
    pub relationship_count: usize,
    /// Share of entities carrying a name embedding, in [0, 1].
    pub embedding_coverage: f64,
    /// Whether both vector indices are present.
    pub vector_indices_present: bool,
}

/// Normalizes an entity name for merge keying: trimmed, lowercased,
/// inner whitespace collapsed.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trait for graph stores. Every method is a suspension point.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Extracts entities and relationships from `text` and merges them
    /// into the graph, attaching `episode_uuid` to every relationship
    /// the episode produced.
    async fn ingest_episode(&self, episode_uuid: &str, text: &str) -> Result<IngestReport>;

    /// Vector search over entity-name embeddings; substring fallback
    /// over name and summary when the index is unavailable.
    async fn entity_search(&self, query: &str, k: usize) -> Result<Vec<(Entity, f64)>>;

    /// Vector search over relationship-fact embeddings; substring
    /// fallback over the fact text when the index is unavailable.
    async fn fact_search(&self, query: &str, k: usize) -> Result<Vec<(Relationship, f64)>>;

    /// Bounded traversal from an entity (depth at most
    /// [`MAX_TRAVERSAL_DEPTH`]).
    async fn neighbors(&self, entity_uuid: &str, depth: usize) -> Result<Subgraph>;

    /// Health snapshot.
    async fn health_check(&self) -> Result<GraphHealth>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in [
            EntityKind::Person,
            EntityKind::Project,
            EntityKind::Technology,
            EntityKind::Organization,
            EntityKind::Topic,
            EntityKind::Date,
            EntityKind::Email,
            EntityKind::Document,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), kind);
        }
        // Unknown kinds default to Topic rather than failing ingestion
        assert_eq!(EntityKind::parse("Animal"), EntityKind::Topic);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Alice   Nguyen "), "alice nguyen");
        assert_eq!(normalize_name("ALICE NGUYEN"), "alice nguyen");
        assert_eq!(normalize_name("alice nguyen"), "alice nguyen");
    }

    #[test]
    fn test_index_names() {
        assert_eq!(ENTITY_NAME_INDEX, "entity_name_embedding_index");
        assert_eq!(RELATIONSHIP_FACT_INDEX, "relationship_fact_embedding_index");
    }
}
