//! Chunk representation and the tagged metadata record.
//!
//! Chunks are windows of a document with a prepended context header, the
//! atomic unit of retrieval. Chunk ids carry a source prefix and document
//! hash so re-ingesting one source can never collide with another:
//! `<source_kind>::<document_hash>::chunk_<ordinal>`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{DocumentInfo, SourceKind};

/// A chunk of a document plus its context header.
///
/// Invariant: `0 <= ordinal < total`. The stored `body` is the raw window;
/// the embeddable text prepends the context header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk id: `<source_kind>::<document_hash>::chunk_<ordinal>`.
    pub id: String,
    /// Owning document id.
    pub document_id: String,
    /// Position of this chunk within the document (0-based).
    pub ordinal: usize,
    /// Number of chunks the document was split into.
    pub total: usize,
    /// Raw window text, without the header.
    pub body: String,
    /// Context header situating the chunk in its document.
    pub context_header: String,
    /// Whether the header came from an LLM (vs. the deterministic template).
    pub has_context: bool,
    /// Dense embedding, assigned at upsert when absent.
    pub embedding: Option<Vec<f32>>,
    /// Tagged metadata record.
    pub meta: ChunkMeta,
}

/// Tagged metadata carried by every chunk.
///
/// These are the reserved keys of the store layer as typed fields; the
/// freeform map survives only inside the persistence payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Origin of the owning document.
    pub source_kind: Option<SourceKind>,
    /// Owning document id.
    pub document_id: Option<String>,
    /// Position within the document.
    pub ordinal: Option<usize>,
    /// Total chunks in the document.
    pub total: Option<usize>,
    /// Whether an LLM context header was used.
    pub has_context: bool,
    /// Owning user for user-scoped rows.
    pub owner_id: Option<String>,
    /// When the row was indexed.
    pub indexed_at: Option<DateTime<Utc>>,
    /// Source URL for website documents.
    pub url: Option<String>,
    /// Source path for file-backed documents.
    pub file_path: Option<String>,
    /// Conversation id for transcript documents.
    pub conversation_id: Option<String>,
    /// Human-verified flag; grants a rerank bonus.
    pub verified: bool,
}

/// Builds a chunk id from its parts.
///
/// The source prefix keeps re-ingested conversation chunks from colliding
/// with file chunks that share a document hash.
#[must_use]
pub fn chunk_id(source_kind: SourceKind, doc_hash: &str, ordinal: usize) -> String {
    format!("{}::{}::chunk_{}", source_kind.as_str(), doc_hash, ordinal)
}

/// Stable 16-hex-digit hash of a document id.
#[must_use]
pub fn document_hash(document_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    document_id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl Chunk {
    /// Creates a chunk for one window of a document.
    #[must_use]
    pub fn new(info: &DocumentInfo<'_>, ordinal: usize, total: usize, body: String) -> Self {
        let hash = document_hash(info.id);
        let mut meta = ChunkMeta {
            source_kind: Some(info.source_kind),
            document_id: Some(info.id.to_string()),
            ordinal: Some(ordinal),
            total: Some(total),
            owner_id: info.owner_id.map(ToString::to_string),
            ..ChunkMeta::default()
        };
        match info.source_kind {
            SourceKind::Website => meta.url = Some(info.uri.to_string()),
            SourceKind::Conversation => meta.conversation_id = Some(info.uri.to_string()),
            SourceKind::Knowledge | SourceKind::MeetingNote => {
                meta.file_path = Some(info.uri.to_string());
            }
        }
        Self {
            id: chunk_id(info.source_kind, &hash, ordinal),
            document_id: info.id.to_string(),
            ordinal,
            total,
            body,
            context_header: String::new(),
            has_context: false,
            embedding: None,
            meta,
        }
    }

    /// Sets the context header.
    ///
    /// `from_llm` marks the header as model-generated; the deterministic
    /// template leaves `has_context` false.
    pub fn set_header(&mut self, header: String, from_llm: bool) {
        self.context_header = header;
        self.has_context = from_llm;
        self.meta.has_context = from_llm;
    }

    /// The text submitted to the embedding provider: header, blank line,
    /// raw body. Without a header this is just the body.
    #[must_use]
    pub fn embeddable_text(&self) -> String {
        if self.context_header.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.context_header, self.body)
        }
    }

    /// Returns the size of the raw body in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Checks the ordinal/total invariant.
    #[must_use]
    pub const fn ordinal_valid(&self) -> bool {
        self.ordinal < self.total
    }
}

impl ChunkMeta {
    /// Serializes into the persistence payload map.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (effectively never for
    /// this record shape).
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Restores from a persistence payload map.
    ///
    /// # Errors
    ///
    /// Returns an error on a malformed payload.
    pub fn from_payload(value: &serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value.clone())
    }
}
