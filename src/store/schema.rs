//! Database schema for the embedded vector store.
//!
//! The FTS5 virtual table is created separately so a SQLite build
//! without FTS5 degrades to vector-only operation instead of failing
//! initialization.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Chunk rows, keyed per collection
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT NOT NULL,
    collection TEXT NOT NULL,
    document_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    total INTEGER NOT NULL,
    body TEXT NOT NULL,
    context_header TEXT NOT NULL DEFAULT '',
    has_context INTEGER NOT NULL DEFAULT 0,
    embedding BLOB,  -- f32 array serialized as little-endian bytes
    meta TEXT NOT NULL,  -- JSON persistence payload of the tagged record
    owner_id TEXT,
    indexed_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);

-- Index for cascade deletes and per-document lookups
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(collection, document_id);

-- Index for per-user filters
CREATE INDEX IF NOT EXISTS idx_chunks_owner ON chunks(collection, owner_id);
";

/// FTS5 virtual table for BM25 keyword search.
///
/// Kept in sync manually on upsert and delete; the chunk id is carried
/// as an unindexed column because the primary key is textual.
pub const FTS_SCHEMA_SQL: &str = r"
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    body,
    chunk_id UNINDEXED,
    collection UNINDEXED,
    tokenize = 'porter unicode61'
);
";
