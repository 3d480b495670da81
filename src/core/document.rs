//! Documents, source kinds, and collection configuration.
//!
//! A [`Document`] is the unit of ingestion; a [`Collection`] fixes the
//! chunking parameters for every chunk derived from documents of one
//! source family. Documents are immutable once committed; deletion
//! cascades to their chunks at the store layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Embedding dimensionality used across every collection and both graph
/// vector indices.
pub const EMBEDDING_DIM: usize = 1536;

/// Origin of a document, also the first segment of every chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Crawled web page.
    Website,
    /// Imported conversation transcript.
    Conversation,
    /// Curated knowledge document.
    Knowledge,
    /// Meeting note file.
    MeetingNote,
}

impl SourceKind {
    /// Stable string form, used as the chunk-id prefix and in metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::Conversation => "conversation",
            Self::Knowledge => "knowledge",
            Self::MeetingNote => "meeting_note",
        }
    }

    /// Source-quality prior used by the reranker.
    #[must_use]
    pub const fn quality(self) -> f64 {
        match self {
            Self::Website => 0.6,
            Self::Conversation => 0.7,
            Self::MeetingNote => 0.8,
            Self::Knowledge => 0.9,
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "website" => Some(Self::Website),
            "conversation" => Some(Self::Conversation),
            "knowledge" => Some(Self::Knowledge),
            "meeting_note" => Some(Self::MeetingNote),
            _ => None,
        }
    }

    /// Default collection for documents of this kind.
    #[must_use]
    pub const fn default_collection(self) -> &'static str {
        match self {
            Self::Website => "websites",
            Self::Conversation => "conversations",
            Self::Knowledge | Self::MeetingNote => "knowledge",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as ingested by a crawler or importer.
///
/// Immutable once committed to a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Opaque document identifier.
    pub id: String,
    /// Origin of the document.
    pub source_kind: SourceKind,
    /// Canonical URI (URL, file path, or conversation id).
    pub uri: String,
    /// Human-readable title.
    pub title: String,
    /// Full document text.
    pub body: String,
    /// Last modification time at the origin.
    pub modified_at: DateTime<Utc>,
    /// Owning user, when the row is user-scoped.
    pub owner_id: Option<String>,
}

impl Document {
    /// Creates a document with the current time as `modified_at`.
    #[must_use]
    pub fn new(id: &str, source_kind: SourceKind, uri: &str, title: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            source_kind,
            uri: uri.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            modified_at: Utc::now(),
            owner_id: None,
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner_id: &str) -> Self {
        self.owner_id = Some(owner_id.to_string());
        self
    }

    /// Borrowed header view used by the chunker.
    #[must_use]
    pub fn info(&self) -> DocumentInfo<'_> {
        DocumentInfo {
            id: &self.id,
            source_kind: self.source_kind,
            uri: &self.uri,
            title: &self.title,
            owner_id: self.owner_id.as_deref(),
        }
    }
}

/// Borrowed document header passed to the chunker; avoids cloning the
/// body alongside its own metadata.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInfo<'a> {
    /// Document identifier.
    pub id: &'a str,
    /// Origin of the document.
    pub source_kind: SourceKind,
    /// Canonical URI.
    pub uri: &'a str,
    /// Human-readable title.
    pub title: &'a str,
    /// Owning user, when user-scoped.
    pub owner_id: Option<&'a str>,
}

/// A named group of chunks with fixed chunking parameters.
///
/// Chunk size and overlap are fixed at creation; changing them requires a
/// new collection and re-ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection name.
    pub name: String,
    /// Window size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive windows in characters.
    pub chunk_overlap: usize,
    /// Embedding dimensionality for rows in this collection.
    pub embedding_dim: usize,
}

impl Collection {
    /// Creates a collection with the shared embedding dimensionality.
    #[must_use]
    pub fn new(name: &str, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            name: name.to_string(),
            chunk_size,
            chunk_overlap,
            embedding_dim: EMBEDDING_DIM,
        }
    }

    /// Returns the recognized collection for `name`, if any.
    ///
    /// Recognized names and their chunking defaults:
    /// `websites` (1500/200), `conversations` (500/50),
    /// `knowledge` (1000/100).
    #[must_use]
    pub fn recognized(name: &str) -> Option<Self> {
        match name {
            "websites" => Some(Self::new("websites", 1500, 200)),
            "conversations" => Some(Self::new("conversations", 500, 50)),
            "knowledge" => Some(Self::new("knowledge", 1000, 100)),
            _ => None,
        }
    }

    /// All recognized collections.
    #[must_use]
    pub fn all_recognized() -> Vec<Self> {
        ["websites", "conversations", "knowledge"]
            .iter()
            .filter_map(|n| Self::recognized(n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_roundtrip() {
        for kind in [
            SourceKind::Website,
            SourceKind::Conversation,
            SourceKind::Knowledge,
            SourceKind::MeetingNote,
        ] {
            assert_eq!(SourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SourceKind::parse("podcast"), None);
    }

    #[test]
    fn test_source_quality_table() {
        assert!((SourceKind::Website.quality() - 0.6).abs() < f64::EPSILON);
        assert!((SourceKind::Conversation.quality() - 0.7).abs() < f64::EPSILON);
        assert!((SourceKind::MeetingNote.quality() - 0.8).abs() < f64::EPSILON);
        assert!((SourceKind::Knowledge.quality() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recognized_collections() {
        let c = Collection::recognized("websites").unwrap();
        assert_eq!((c.chunk_size, c.chunk_overlap), (1500, 200));

        let c = Collection::recognized("conversations").unwrap();
        assert_eq!((c.chunk_size, c.chunk_overlap), (500, 50));

        let c = Collection::recognized("knowledge").unwrap();
        assert_eq!((c.chunk_size, c.chunk_overlap), (1000, 100));

        assert!(Collection::recognized("scratch").is_none());
        assert_eq!(Collection::all_recognized().len(), 3);
    }

    #[test]
    fn test_collection_dim() {
        let c = Collection::recognized("knowledge").unwrap();
        assert_eq!(c.embedding_dim, EMBEDDING_DIM);
        assert_eq!(EMBEDDING_DIM, 1536);
    }

    #[test]
    fn test_document_info_borrows() {
        let doc = Document::new(
            "doc-1",
            SourceKind::Website,
            "https://example.com",
            "Example",
            "body text",
        )
        .with_owner("u1");
        let info = doc.info();
        assert_eq!(info.id, "doc-1");
        assert_eq!(info.owner_id, Some("u1"));
        assert_eq!(info.source_kind, SourceKind::Website);
    }

    #[test]
    fn test_default_collection_mapping() {
        assert_eq!(SourceKind::Website.default_collection(), "websites");
        assert_eq!(
            SourceKind::Conversation.default_collection(),
            "conversations"
        );
        assert_eq!(SourceKind::Knowledge.default_collection(), "knowledge");
        assert_eq!(SourceKind::MeetingNote.default_collection(), "knowledge");
    }

    #[test]
    fn test_document_serialization() {
        let doc = Document::new("d", SourceKind::Knowledge, "file.md", "T", "B");
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("\"knowledge\""));
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "d");
    }
}
