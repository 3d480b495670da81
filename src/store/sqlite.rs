//! Embedded SQLite implementation of the vector store.
//!
//! Rows live in a `chunks` table keyed by `(collection, id)`; dense
//! vectors are serialized f32 blobs scanned with cosine similarity, and
//! keyword search rides an FTS5 table kept in sync manually. FTS5
//! unavailability degrades keyword search to vector search with a single
//! warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::schema::{CURRENT_SCHEMA_VERSION, FTS_SCHEMA_SQL, SCHEMA_SQL};
use super::{SearchFilter, SearchHit, VectorStore};
use crate::Result;
use crate::cache::QueryCache;
use crate::core::{Chunk, ChunkMeta};
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::{Error, StoreError};
use crate::rerank::weighted_rrf;

/// Embedded multi-collection vector store over SQLite.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    cache: Option<Arc<QueryCache>>,
    rrf_k: u32,
    fts_available: bool,
    keyword_fallback_warned: AtomicBool,
}

impl SqliteVectorStore {
    /// Opens (or creates) a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the database cannot be
    /// opened, `StoreError::Database` on schema failures.
    pub fn open(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            Error::Store(StoreError::Unavailable {
                reason: format!("cannot open {path}: {e}"),
            })
        })?;
        Self::init(conn, embedder)
    }

    /// Creates an in-memory store (tests, ephemeral sessions).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on schema failures.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::init(conn, embedder)
    }

    fn init(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL).map_err(StoreError::from)?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?1)",
            params![CURRENT_SCHEMA_VERSION.to_string()],
        )
        .map_err(StoreError::from)?;

        // FTS5 may be absent from the linked SQLite; keyword search then
        // degrades to vector search
        let fts_available = match conn.execute_batch(FTS_SCHEMA_SQL) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "FTS5 unavailable, keyword search will use vector fallback");
                false
            }
        };

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            cache: None,
            rrf_k: crate::rerank::DEFAULT_RRF_K,
            fts_available,
            keyword_fallback_warned: AtomicBool::new(false),
        })
    }

    /// Attaches the shared query cache; upserts and deletes invalidate
    /// the targeted collection's entries.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Overrides the RRF k parameter used in hybrid fusion.
    #[must_use]
    pub const fn with_rrf_k(mut self, k: u32) -> Self {
        self.rrf_k = k;
        self
    }

    /// Whether the keyword index is available.
    #[must_use]
    pub const fn keyword_index_available(&self) -> bool {
        self.fts_available
    }

    #[cfg(test)]
    pub(crate) fn disable_fts_for_test(&mut self) {
        self.fts_available = false;
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            Error::Store(StoreError::Unavailable {
                reason: "store mutex poisoned".to_string(),
            })
        })
    }

    fn invalidate(&self, collection: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_collection(collection);
        }
    }

    /// Serializes an embedding as little-endian f32 bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Restores an embedding from its byte form.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Builds the SQL clause and parameter list for a filter, with
    /// placeholders starting at `first_index` and columns qualified by
    /// `prefix` (empty or `"c."`).
    fn filter_clause(
        filter: &SearchFilter,
        first_index: usize,
        prefix: &str,
    ) -> (String, Vec<String>) {
        let mut clause = String::new();
        let mut values = Vec::new();
        let mut idx = first_index;

        if let Some(owner) = &filter.owner_id {
            clause.push_str(&format!(" AND {prefix}owner_id = ?{idx}"));
            values.push(owner.clone());
            idx += 1;
        }
        if let Some(document_id) = &filter.document_id {
            clause.push_str(&format!(" AND {prefix}document_id = ?{idx}"));
            values.push(document_id.clone());
            idx += 1;
        }
        if let Some(kind) = filter.source_kind {
            clause.push_str(&format!(
                " AND json_extract({prefix}meta, '$.source_kind') = ?{idx}"
            ));
            values.push(kind.as_str().to_string());
        }

        (clause, values)
    }

    /// Upserts one row in its own transaction, keeping the FTS index in
    /// sync. A failure leaves previously written rows durable.
    fn upsert_row(
        conn: &mut Connection,
        collection: &str,
        chunk: &Chunk,
        fts_available: bool,
    ) -> std::result::Result<(), StoreError> {
        let tx = conn.transaction()?;

        let meta_json = serde_json::to_string(&chunk.meta)?;
        let embedding_bytes = chunk.embedding.as_deref().map(Self::embedding_to_bytes);
        let indexed_at = chunk
            .meta
            .indexed_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339();

        tx.execute(
            r"
            INSERT INTO chunks
                (id, collection, document_id, ordinal, total, body,
                 context_header, has_context, embedding, meta, owner_id, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (collection, id) DO UPDATE SET
                document_id = excluded.document_id,
                ordinal = excluded.ordinal,
                total = excluded.total,
                body = excluded.body,
                context_header = excluded.context_header,
                has_context = excluded.has_context,
                embedding = excluded.embedding,
                meta = excluded.meta,
                owner_id = excluded.owner_id,
                indexed_at = excluded.indexed_at
            ",
            params![
                chunk.id,
                collection,
                chunk.document_id,
                chunk.ordinal as i64,
                chunk.total as i64,
                chunk.body,
                chunk.context_header,
                chunk.has_context,
                embedding_bytes,
                meta_json,
                chunk.meta.owner_id,
                indexed_at,
            ],
        )?;

        if fts_available {
            tx.execute(
                "DELETE FROM chunks_fts WHERE chunk_id = ?1 AND collection = ?2",
                params![chunk.id, collection],
            )?;
            tx.execute(
                "INSERT INTO chunks_fts (body, chunk_id, collection) VALUES (?1, ?2, ?3)",
                params![chunk.body, chunk.id, collection],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Reads one hit row: `(id, body, meta, score)`.
    fn read_hit(
        id: String,
        body: String,
        meta_json: &str,
        score: f64,
    ) -> std::result::Result<SearchHit, StoreError> {
        let meta: ChunkMeta = serde_json::from_str(meta_json)?;
        Ok(SearchHit {
            id,
            score,
            body,
            meta,
        })
    }

    /// Sorts hits by score descending with the deterministic tie-break
    /// (`indexed_at` younger first, then id).
    fn sort_hits(hits: &mut [(SearchHit, Option<DateTime<Utc>>)]) {
        hits.sort_by(|a, b| {
            b.0.score
                .partial_cmp(&a.0.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
    }

    /// FTS5 BM25 search without the vector fallback; used directly by
    /// hybrid fusion.
    fn fts_search(
        &self,
        collection: &str,
        query_text: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Quote each term so FTS5 operators are treated as literals, and
        // OR them for forgiving matching
        let fts_query = query_text
            .split_whitespace()
            .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.lock()?;
        let (clause, values) = Self::filter_clause(filter, 4, "c.");
        let sql = format!(
            r"
            SELECT c.id, c.body, c.meta, -bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c
              ON c.id = chunks_fts.chunk_id AND c.collection = chunks_fts.collection
            WHERE chunks_fts MATCH ?1 AND chunks_fts.collection = ?2{clause}
            ORDER BY score DESC
            LIMIT ?3
            "
        );

        #[allow(clippy::cast_possible_wrap)]
        let limit = k as i64;
        let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&fts_query, &collection, &limit];
        for value in &values {
            params_vec.push(value);
        }

        let rows = stmt
            .query_map(params_vec.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let hits = rows
            .into_iter()
            .map(|(id, body, meta, score)| Self::read_hit(id, body, &meta, score))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: &str, mut chunks: Vec<Chunk>) -> Result<usize> {
        // Assign embeddings to chunks that lack them (suspension point)
        let missing: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.embedding.is_none().then_some(i))
            .collect();
        if !missing.is_empty() {
            let texts: Vec<String> = missing
                .iter()
                .map(|&i| chunks[i].embeddable_text())
                .collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let vectors = self.embedder.embed(&refs).await?;
            for (&i, vector) in missing.iter().zip(vectors) {
                chunks[i].embedding = Some(vector);
            }
        }

        let total = chunks.len();
        let mut written = 0usize;
        let mut failing_ids = Vec::new();

        {
            let mut conn = self.lock()?;
            for chunk in &chunks {
                match Self::upsert_row(&mut conn, collection, chunk, self.fts_available) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        warn!(chunk = %chunk.id, error = %e, "row upsert failed");
                        failing_ids.push(chunk.id.clone());
                    }
                }
            }
        }

        if written > 0 {
            self.invalidate(collection);
        }

        if failing_ids.is_empty() {
            debug!(collection, written, "upsert complete");
            Ok(written)
        } else {
            Err(Error::Store(StoreError::PartialUpsert {
                failed: failing_ids.len(),
                total,
                failing_ids,
            }))
        }
    }

    async fn vector_search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.lock()?;
        let (clause, values) = Self::filter_clause(filter, 2, "");
        let sql = format!(
            r"
            SELECT id, body, meta, embedding
            FROM chunks
            WHERE collection = ?1 AND embedding IS NOT NULL{clause}
            "
        );

        let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&collection];
        for value in &values {
            params_vec.push(value);
        }

        let rows = stmt
            .query_map(params_vec.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let mut scored: Vec<(SearchHit, Option<DateTime<Utc>>)> = Vec::with_capacity(rows.len());
        for (id, body, meta_json, embedding_bytes) in rows {
            let embedding = Self::bytes_to_embedding(&embedding_bytes);
            let score = f64::from(cosine_similarity(query_embedding, &embedding));
            let hit = Self::read_hit(id, body, &meta_json, score)?;
            let indexed_at = hit.meta.indexed_at;
            scored.push((hit, indexed_at));
        }

        Self::sort_hits(&mut scored);
        Ok(scored.into_iter().take(k).map(|(hit, _)| hit).collect())
    }

    async fn keyword_search(
        &self,
        collection: &str,
        query_text: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        if self.fts_available {
            return self.fts_search(collection, query_text, k, filter);
        }

        if !self.keyword_fallback_warned.swap(true, Ordering::Relaxed) {
            warn!(collection, "keyword index unavailable, falling back to vector search");
        }
        let query_embedding = self.embedder.embed_one(query_text).await?;
        self.vector_search(collection, &query_embedding, k, filter)
            .await
    }

    async fn hybrid_search(
        &self,
        collection: &str,
        query_text: &str,
        k: usize,
        vec_weight: f64,
        kw_weight: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let query_embedding = self.embedder.embed_one(query_text).await?;

        // Over-fetch both lists so fusion has real candidates to merge
        let fetch = (k * 2).max(k);
        let vector_hits = self
            .vector_search(collection, &query_embedding, fetch, filter)
            .await?;
        let keyword_hits = if self.fts_available {
            self.fts_search(collection, query_text, fetch, filter)?
        } else {
            Vec::new()
        };

        if keyword_hits.is_empty() {
            return Ok(vector_hits.into_iter().take(k).collect());
        }

        let vector_ids: Vec<String> = vector_hits.iter().map(|h| h.id.clone()).collect();
        let keyword_ids: Vec<String> = keyword_hits.iter().map(|h| h.id.clone()).collect();
        let fused = weighted_rrf(
            &[(&vector_ids, vec_weight), (&keyword_ids, kw_weight)],
            self.rrf_k,
        );

        let mut by_id: std::collections::HashMap<String, SearchHit> = std::collections::HashMap::new();
        for hit in keyword_hits.into_iter().chain(vector_hits) {
            by_id.entry(hit.id.clone()).or_insert(hit);
        }

        let results = fused
            .into_iter()
            .take(k)
            .filter_map(|(id, score)| {
                by_id.remove(&id).map(|mut hit| {
                    hit.score = score;
                    hit
                })
            })
            .collect();
        Ok(results)
    }

    async fn delete(&self, collection: &str, filter: &SearchFilter) -> Result<usize> {
        let removed = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(StoreError::from)?;

            let (clause, values) = Self::filter_clause(filter, 2, "");
            let select_sql =
                format!("SELECT id FROM chunks WHERE collection = ?1{clause}");
            let doomed: Vec<String> = {
                let mut stmt = tx.prepare(&select_sql).map_err(StoreError::from)?;
                let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&collection];
                for value in &values {
                    params_vec.push(value);
                }
                stmt.query_map(params_vec.as_slice(), |row| row.get::<_, String>(0))
                    .map_err(StoreError::from)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?
            };

            for id in &doomed {
                tx.execute(
                    "DELETE FROM chunks WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                )
                .map_err(StoreError::from)?;
                if self.fts_available {
                    tx.execute(
                        "DELETE FROM chunks_fts WHERE collection = ?1 AND chunk_id = ?2",
                        params![collection, id],
                    )
                    .map_err(StoreError::from)?;
                }
            }

            tx.commit().map_err(StoreError::from)?;
            doomed.len()
        };

        if removed > 0 {
            self.invalidate(collection);
        }
        debug!(collection, removed, "delete complete");
        Ok(removed)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?
            .unwrap_or(0);
        #[allow(clippy::cast_sign_loss)]
        Ok(count as usize)
    }
}
