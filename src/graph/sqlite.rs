//! Embedded SQLite implementation of the graph store.
//!
//! Entities and relationships live in plain tables; the two vector
//! indices are tracked in a `graph_indices` table and realized as
//! in-process cosine scans over embedding blobs. Dropping the index
//! records switches both searches to substring fallback, which keeps the
//! store functional on degraded deployments.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::{debug, warn};
use uuid::Uuid;

use super::extraction::{ExtractionFailure, llm_extraction, rule_based_extraction};
use super::{
    ENTITY_NAME_INDEX, Entity, EntityKind, GraphHealth, GraphStore, IngestReport,
    MAX_TRAVERSAL_DEPTH, RELATIONSHIP_FACT_INDEX, Relationship, Subgraph, normalize_name,
};
use crate::Result;
use crate::core::EMBEDDING_DIM;
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::{Error, GraphError};
use crate::llm::LlmProvider;

/// Graph schema.
const GRAPH_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS entities (
    uuid TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    name_embedding BLOB,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relationships (
    uuid TEXT PRIMARY KEY,
    source_uuid TEXT NOT NULL,
    target_uuid TEXT NOT NULL,
    kind TEXT NOT NULL,
    fact TEXT NOT NULL,
    fact_embedding BLOB,
    episodes TEXT NOT NULL DEFAULT '[]',
    valid_from TEXT NOT NULL,
    valid_to TEXT,
    FOREIGN KEY (source_uuid) REFERENCES entities(uuid),
    FOREIGN KEY (target_uuid) REFERENCES entities(uuid)
);

CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_uuid);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_uuid);

-- Vector index registry; searches fall back to substring matching when
-- a required row is absent
CREATE TABLE IF NOT EXISTS graph_indices (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL,
    similarity TEXT NOT NULL
);
";

/// Embedded graph store over SQLite.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    provider: Option<Arc<dyn LlmProvider>>,
    model: String,
    fallback_warned: AtomicBool,
}

impl SqliteGraphStore {
    /// Opens (or creates) a graph store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Database` when the database cannot be opened
    /// or the schema fails.
    pub fn open(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open(path).map_err(GraphError::from)?;
        Self::init(conn, embedder)
    }

    /// Creates an in-memory graph store.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Database` on schema failures.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(GraphError::from)?;
        Self::init(conn, embedder)
    }

    fn init(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        conn.execute_batch(GRAPH_SCHEMA_SQL).map_err(GraphError::from)?;
        let store = Self {
            conn: Mutex::new(conn),
            embedder,
            provider: None,
            model: String::new(),
            fallback_warned: AtomicBool::new(false),
        };
        store.ensure_vector_indices()?;
        Ok(store)
    }

    /// Attaches the LLM used for episode extraction. Without one,
    /// ingestion uses the rule-based extractor.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>, model: &str) -> Self {
        self.provider = Some(provider);
        self.model = model.to_string();
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            Error::Graph(GraphError::Database("graph mutex poisoned".to_string()))
        })
    }

    /// Registers both vector indices (idempotent).
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Database` on write failure.
    pub fn ensure_vector_indices(&self) -> Result<()> {
        let conn = self.lock()?;
        for name in [ENTITY_NAME_INDEX, RELATIONSHIP_FACT_INDEX] {
            conn.execute(
                "INSERT OR IGNORE INTO graph_indices (name, dimensions, similarity)
                 VALUES (?1, ?2, 'cosine')",
                params![name, EMBEDDING_DIM as i64],
            )
            .map_err(GraphError::from)?;
        }
        Ok(())
    }

    /// Drops both vector index registrations; searches fall back to
    /// substring matching until [`Self::ensure_vector_indices`] runs
    /// again. Maintenance operation.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Database` on write failure.
    pub fn drop_vector_indices(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM graph_indices", [])
            .map_err(GraphError::from)?;
        Ok(())
    }

    fn vector_indices_present(&self) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM graph_indices", [], |row| row.get(0))
            .map_err(GraphError::from)?;
        Ok(count >= 2)
    }

    fn warn_fallback_once(&self, what: &str) {
        if !self.fallback_warned.swap(true, Ordering::Relaxed) {
            warn!(search = what, "graph vector index unavailable, using substring fallback");
        }
    }

    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn read_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
        let embedding: Option<Vec<u8>> = row.get(5)?;
        let created_at: String = row.get(6)?;
        Ok(Entity {
            uuid: row.get(0)?,
            name: row.get(1)?,
            kind: EntityKind::parse(&row.get::<_, String>(3)?),
            summary: row.get(4)?,
            name_embedding: embedding.as_deref().map(Self::bytes_to_embedding),
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    fn read_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relationship> {
        let embedding: Option<Vec<u8>> = row.get(5)?;
        let episodes_json: String = row.get(6)?;
        let valid_from: String = row.get(7)?;
        let valid_to: Option<String> = row.get(8)?;
        Ok(Relationship {
            uuid: row.get(0)?,
            source_uuid: row.get(1)?,
            target_uuid: row.get(2)?,
            kind: row.get(3)?,
            fact: row.get(4)?,
            fact_embedding: embedding.as_deref().map(Self::bytes_to_embedding),
            episodes: serde_json::from_str(&episodes_json).unwrap_or_default(),
            valid_from: valid_from.parse().unwrap_or_else(|_| Utc::now()),
            valid_to: valid_to.and_then(|v| v.parse().ok()),
        })
    }

    const ENTITY_COLUMNS: &'static str =
        "uuid, name, normalized_name, kind, summary, name_embedding, created_at";
    const RELATIONSHIP_COLUMNS: &'static str =
        "uuid, source_uuid, target_uuid, kind, fact, fact_embedding, episodes, valid_from, valid_to";

    fn all_entities(&self) -> Result<Vec<Entity>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM entities", Self::ENTITY_COLUMNS);
        let mut stmt = conn.prepare(&sql).map_err(GraphError::from)?;
        let rows = stmt
            .query_map([], Self::read_entity)
            .map_err(GraphError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(GraphError::from)?;
        Ok(rows)
    }

    fn all_relationships(&self) -> Result<Vec<Relationship>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM relationships", Self::RELATIONSHIP_COLUMNS);
        let mut stmt = conn.prepare(&sql).map_err(GraphError::from)?;
        let rows = stmt
            .query_map([], Self::read_relationship)
            .map_err(GraphError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(GraphError::from)?;
        Ok(rows)
    }

    /// Case-insensitive substring search over entity name and summary.
    fn substring_entity_search(&self, query: &str, k: usize) -> Result<Vec<(Entity, f64)>> {
        let needle = query.to_lowercase();
        let mut matches: Vec<(Entity, f64)> = self
            .all_entities()?
            .into_iter()
            .filter_map(|entity| {
                if entity.name.to_lowercase().contains(&needle) {
                    Some((entity, 1.0))
                } else if entity.summary.to_lowercase().contains(&needle) {
                    Some((entity, 0.5))
                } else {
                    None
                }
            })
            .collect();
        matches.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.name.cmp(&b.0.name))
        });
        matches.truncate(k);
        Ok(matches)
    }

    /// Case-insensitive substring search over relationship facts.
    fn substring_fact_search(&self, query: &str, k: usize) -> Result<Vec<(Relationship, f64)>> {
        let needle = query.to_lowercase();
        let mut matches: Vec<(Relationship, f64)> = self
            .all_relationships()?
            .into_iter()
            .filter(|r| r.fact.to_lowercase().contains(&needle))
            .map(|r| (r, 1.0))
            .collect();
        matches.sort_by(|a, b| a.0.fact.cmp(&b.0.fact));
        matches.truncate(k);
        Ok(matches)
    }

    /// Merges one extracted entity; returns (uuid, created).
    async fn merge_entity(
        &self,
        name: &str,
        kind: &str,
        summary: &str,
        embed: bool,
    ) -> Result<(String, bool)> {
        let normalized = normalize_name(name);

        let existing: Option<(String, String)> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT uuid, summary FROM entities WHERE normalized_name = ?1",
                params![normalized],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_or(None, Some)
        };

        if let Some((uuid, old_summary)) = existing {
            // Merge: keep the longer summary
            if !summary.is_empty() && summary.len() > old_summary.len() {
                let conn = self.lock()?;
                conn.execute(
                    "UPDATE entities SET summary = ?1 WHERE uuid = ?2",
                    params![summary, uuid],
                )
                .map_err(GraphError::from)?;
            }
            return Ok((uuid, false));
        }

        let name_embedding = if embed {
            Some(self.embedder.embed_one(name).await?)
        } else {
            None
        };

        let uuid = Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO entities
                 (uuid, name, normalized_name, kind, summary, name_embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid,
                name,
                normalized,
                EntityKind::parse(kind).as_str(),
                summary,
                name_embedding.as_deref().map(Self::embedding_to_bytes),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(GraphError::from)?;
        Ok((uuid, true))
    }

    /// Creates or reasserts one relationship, attaching the episode.
    async fn merge_relationship(
        &self,
        episode_uuid: &str,
        source_uuid: &str,
        target_uuid: &str,
        kind: &str,
        fact: &str,
        embed: bool,
    ) -> Result<()> {
        let existing: Option<(String, String)> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT uuid, episodes FROM relationships
                 WHERE source_uuid = ?1 AND target_uuid = ?2 AND kind = ?3",
                params![source_uuid, target_uuid, kind],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_or(None, Some)
        };

        if let Some((uuid, episodes_json)) = existing {
            let mut episodes: Vec<String> =
                serde_json::from_str(&episodes_json).unwrap_or_default();
            if !episodes.iter().any(|e| e == episode_uuid) {
                episodes.push(episode_uuid.to_string());
            }
            let conn = self.lock()?;
            conn.execute(
                "UPDATE relationships SET episodes = ?1, fact = ?2 WHERE uuid = ?3",
                params![
                    serde_json::to_string(&episodes)
                        .map_err(|e| GraphError::Database(e.to_string()))?,
                    fact,
                    uuid
                ],
            )
            .map_err(GraphError::from)?;
            return Ok(());
        }

        let fact_embedding = if embed {
            Some(self.embedder.embed_one(fact).await?)
        } else {
            None
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO relationships
                 (uuid, source_uuid, target_uuid, kind, fact, fact_embedding,
                  episodes, valid_from, valid_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
            params![
                Uuid::new_v4().to_string(),
                source_uuid,
                target_uuid,
                kind,
                fact,
                fact_embedding.as_deref().map(Self::embedding_to_bytes),
                serde_json::to_string(&vec![episode_uuid])
                    .map_err(|e| GraphError::Database(e.to_string()))?,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(GraphError::from)?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn ingest_episode(&self, episode_uuid: &str, text: &str) -> Result<IngestReport> {
        // Extract via LLM when available; provider outage degrades to the
        // rule-based extractor, malformed output is an error
        let extraction = match &self.provider {
            Some(provider) => match llm_extraction(provider.as_ref(), &self.model, text).await {
                Ok(extraction) => extraction,
                Err(ExtractionFailure::Provider(e)) => {
                    warn!(error = %e, "extraction provider unavailable, using rule-based extractor");
                    rule_based_extraction(text)
                }
                Err(ExtractionFailure::Malformed(e)) => return Err(Error::Graph(e)),
            },
            None => rule_based_extraction(text),
        };

        let embed = self.vector_indices_present()?;
        let mut report = IngestReport::default();
        let mut uuids: HashMap<String, String> = HashMap::new();

        for entity in &extraction.entities {
            let (uuid, created) = self
                .merge_entity(&entity.name, &entity.kind, &entity.summary, embed)
                .await?;
            if created {
                report.entities_created += 1;
            } else {
                report.entities_merged += 1;
            }
            uuids.insert(normalize_name(&entity.name), uuid);
        }

        for rel in &extraction.relationships {
            let (Some(source), Some(target)) = (
                uuids.get(&normalize_name(&rel.source)),
                uuids.get(&normalize_name(&rel.target)),
            ) else {
                // Relationship names an entity the extractor did not emit
                continue;
            };
            self.merge_relationship(episode_uuid, source, target, &rel.kind, &rel.fact, embed)
                .await?;
            report.relationships_touched += 1;
        }

        debug!(
            episode = episode_uuid,
            created = report.entities_created,
            merged = report.entities_merged,
            relationships = report.relationships_touched,
            "episode ingested"
        );
        Ok(report)
    }

    async fn entity_search(&self, query: &str, k: usize) -> Result<Vec<(Entity, f64)>> {
        if !self.vector_indices_present()? {
            self.warn_fallback_once("entity");
            return self.substring_entity_search(query, k);
        }

        let candidates: Vec<Entity> = self
            .all_entities()?
            .into_iter()
            .filter(|e| e.name_embedding.is_some())
            .collect();
        if candidates.is_empty() {
            // Index registered but no row carries the property
            self.warn_fallback_once("entity");
            return self.substring_entity_search(query, k);
        }

        let query_embedding = self.embedder.embed_one(query).await?;
        let mut scored: Vec<(Entity, f64)> = candidates
            .into_iter()
            .map(|entity| {
                let score = entity
                    .name_embedding
                    .as_deref()
                    .map_or(0.0, |e| f64::from(cosine_similarity(&query_embedding, e)));
                (entity, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.name.cmp(&b.0.name))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn fact_search(&self, query: &str, k: usize) -> Result<Vec<(Relationship, f64)>> {
        if !self.vector_indices_present()? {
            self.warn_fallback_once("fact");
            return self.substring_fact_search(query, k);
        }

        // Only edges with a fact embedding are eligible for vector search
        let candidates: Vec<Relationship> = self
            .all_relationships()?
            .into_iter()
            .filter(|r| r.fact_embedding.is_some())
            .collect();
        if candidates.is_empty() {
            self.warn_fallback_once("fact");
            return self.substring_fact_search(query, k);
        }

        let query_embedding = self.embedder.embed_one(query).await?;
        let mut scored: Vec<(Relationship, f64)> = candidates
            .into_iter()
            .map(|rel| {
                let score = rel
                    .fact_embedding
                    .as_deref()
                    .map_or(0.0, |e| f64::from(cosine_similarity(&query_embedding, e)));
                (rel, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.fact.cmp(&b.0.fact))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn neighbors(&self, entity_uuid: &str, depth: usize) -> Result<Subgraph> {
        if depth > MAX_TRAVERSAL_DEPTH {
            return Err(Error::Graph(GraphError::DepthExceeded {
                requested: depth,
                max: MAX_TRAVERSAL_DEPTH,
            }));
        }

        let entities = self.all_entities()?;
        let by_uuid: HashMap<&str, &Entity> =
            entities.iter().map(|e| (e.uuid.as_str(), e)).collect();
        if !by_uuid.contains_key(entity_uuid) {
            return Err(Error::Graph(GraphError::EntityNotFound {
                uuid: entity_uuid.to_string(),
            }));
        }
        let relationships = self.all_relationships()?;

        // BFS bounded by depth
        let mut visited: HashSet<&str> = HashSet::new();
        let mut ordered: Vec<&str> = Vec::new();
        let mut frontier: VecDeque<(&str, usize)> = VecDeque::new();
        visited.insert(entity_uuid);
        ordered.push(entity_uuid);
        frontier.push_back((entity_uuid, 0));

        while let Some((uuid, dist)) = frontier.pop_front() {
            if dist == depth {
                continue;
            }
            for rel in &relationships {
                let next = if rel.source_uuid == uuid {
                    rel.target_uuid.as_str()
                } else if rel.target_uuid == uuid {
                    rel.source_uuid.as_str()
                } else {
                    continue;
                };
                if visited.insert(next) {
                    ordered.push(next);
                    frontier.push_back((next, dist + 1));
                }
            }
        }

        let subgraph_entities: Vec<Entity> = ordered
            .iter()
            .filter_map(|uuid| by_uuid.get(uuid).map(|e| (*e).clone()))
            .collect();
        let subgraph_relationships: Vec<Relationship> = relationships
            .iter()
            .filter(|r| {
                visited.contains(r.source_uuid.as_str()) && visited.contains(r.target_uuid.as_str())
            })
            .cloned()
            .collect();

        Ok(Subgraph {
            entities: subgraph_entities,
            relationships: subgraph_relationships,
        })
    }

    async fn health_check(&self) -> Result<GraphHealth> {
        let vector_indices_present = self.vector_indices_present()?;
        let conn = self.lock()?;
        let entity_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .map_err(GraphError::from)?;
        let embedded_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE name_embedding IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(GraphError::from)?;
        let relationship_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))
            .map_err(GraphError::from)?;

        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
        let embedding_coverage = if entity_count == 0 {
            1.0
        } else {
            embedded_count as f64 / entity_count as f64
        };

        #[allow(clippy::cast_sign_loss)]
        Ok(GraphHealth {
            entity_count: entity_count as usize,
            relationship_count: relationship_count as usize,
            embedding_coverage,
            vector_indices_present,
        })
    }
}
