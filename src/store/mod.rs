//! Multi-collection vector store.
//!
//! Persistent store of `{id, embedding, body, metadata}` rows grouped
//! into named collections, supporting dense-vector search, keyword
//! (BM25) search, and weighted-RRF hybrid search with metadata filters.
//! The embedded implementation is [`SqliteVectorStore`]; remote engines
//! sit behind the same trait.

mod schema;
mod sqlite;

pub use schema::{CURRENT_SCHEMA_VERSION, FTS_SCHEMA_SQL, SCHEMA_SQL};
pub use sqlite::SqliteVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::{Chunk, ChunkMeta, SourceKind};

/// Default weight of the dense list in hybrid fusion.
pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.7;
/// Default weight of the keyword list in hybrid fusion.
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.3;

/// A search result row.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Chunk id.
    pub id: String,
    /// Retrieval score; semantics depend on the search mode but higher
    /// is always better and result lists are non-increasing.
    pub score: f64,
    /// Raw chunk body.
    pub body: String,
    /// Tagged metadata of the row.
    pub meta: ChunkMeta,
}

/// Metadata filter applied to searches and deletes.
///
/// All present fields must match (conjunction). The empty filter matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Restrict to rows owned by this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Restrict to chunks of this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Restrict to rows from this source kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<SourceKind>,
}

impl SearchFilter {
    /// The empty filter.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Filter by owner.
    #[must_use]
    pub fn owner(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            ..Self::default()
        }
    }

    /// Filter by document.
    #[must_use]
    pub fn document(document_id: &str) -> Self {
        Self {
            document_id: Some(document_id.to_string()),
            ..Self::default()
        }
    }

    /// Whether this filter matches everything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.owner_id.is_none() && self.document_id.is_none() && self.source_kind.is_none()
    }

    /// Canonical JSON form, used in cache keys.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Trait for multi-collection vector stores.
///
/// Every method is a suspension point. Implementations surface transport
/// failures as `StoreError::Unavailable` and keep result scores
/// monotonically non-increasing.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upserts chunks into a collection, assigning embeddings to chunks
    /// that lack them.
    ///
    /// At-least-once idempotent: re-ingesting an existing `chunk.id`
    /// updates the row. Row-level transactional: a partial batch failure
    /// reports the failing subset via `StoreError::PartialUpsert` while
    /// succeeded rows stay durable. Invalidates the collection's cache
    /// entries.
    ///
    /// Returns the number of rows written.
    async fn upsert(&self, collection: &str, chunks: Vec<Chunk>) -> Result<usize>;

    /// Dense-vector search by cosine similarity.
    async fn vector_search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Keyword (BM25) search. Falls back to vector search when the
    /// keyword index is unavailable, logging a single warning per store
    /// handle.
    async fn keyword_search(
        &self,
        collection: &str,
        query_text: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Hybrid search: vector and keyword lists combined by weighted
    /// Reciprocal Rank Fusion.
    async fn hybrid_search(
        &self,
        collection: &str,
        query_text: &str,
        k: usize,
        vec_weight: f64,
        kw_weight: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Deletes rows matching the filter. Cascading: a document filter
    /// removes every chunk of the document. Invalidates the collection's
    /// cache entries.
    ///
    /// Returns the number of rows removed.
    async fn delete(&self, collection: &str, filter: &SearchFilter) -> Result<usize>;

    /// Number of rows in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_json_deterministic() {
        let f = SearchFilter::owner("u1");
        assert_eq!(f.to_json(), r#"{"owner_id":"u1"}"#);
        assert_eq!(SearchFilter::none().to_json(), "{}");
    }

    #[test]
    fn test_filter_is_empty() {
        assert!(SearchFilter::none().is_empty());
        assert!(!SearchFilter::document("d1").is_empty());
    }

    #[test]
    fn test_filter_serde_roundtrip() {
        let f = SearchFilter {
            owner_id: Some("u1".to_string()),
            document_id: Some("d1".to_string()),
            source_kind: Some(SourceKind::Website),
        };
        let json = f.to_json();
        let back: SearchFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
