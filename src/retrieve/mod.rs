//! Hybrid retrieval orchestration.
//!
//! Expands a query into deterministic variants, probes the query cache,
//! fans cache misses out across collections and variants under a
//! bounded worker pool, deduplicates near-identical bodies, reranks,
//! fuses multi-collection lists with RRF, and writes the final top-k
//! back to the cache.

mod dedup;
mod expand;

pub use dedup::{DEDUP_THRESHOLD, dedup_indices, similarity_ratio};
pub use expand::{MAX_VARIANTS, expand_for_task, expand_query, key_terms};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::cache::{CacheKey, QueryCache};
use crate::config::Settings;
use crate::core::{ChunkMeta, Collection, Task, TaskDetail};
use crate::embedding::Embedder;
use crate::error::{Error, RetrieveError};
use crate::rerank::{RerankCandidate, Reranker, reciprocal_rank_fusion};
use crate::store::{
    DEFAULT_KEYWORD_WEIGHT, DEFAULT_VECTOR_WEIGHT, SearchFilter, SearchHit, VectorStore,
};

/// Default per-variant search deadline.
const DEFAULT_VARIANT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the underlying store is queried for each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Dense-vector search only.
    Vector,
    /// Keyword search only.
    Keyword,
    /// Vector and keyword fused per collection.
    #[default]
    Hybrid,
}

/// Options for one retrieval call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Store query mode.
    pub mode: SearchMode,
    /// Metadata filter applied to every search.
    pub filter: SearchFilter,
    /// Per-variant deadline; an elapsed variant contributes nothing.
    pub timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            filter: SearchFilter::none(),
            timeout: DEFAULT_VARIANT_TIMEOUT,
        }
    }
}

/// A final retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct Retrieved {
    /// Chunk id.
    pub id: String,
    /// Collection the chunk came from.
    pub collection: String,
    /// Final score (reranked, possibly RRF-fused).
    pub score: f64,
    /// Raw chunk body.
    pub body: String,
    /// Tagged metadata.
    pub meta: ChunkMeta,
}

impl Retrieved {
    #[cfg(test)]
    pub(crate) fn test_fixture(id: &str, score: f64) -> Self {
        Self {
            id: id.to_string(),
            collection: "knowledge".to_string(),
            score,
            body: format!("body of {id}"),
            meta: ChunkMeta::default(),
        }
    }
}

/// Orchestrates expansion, caching, fan-out, dedup, rerank, and fusion.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<QueryCache>,
    reranker: Reranker,
    max_concurrency: usize,
    max_variants: usize,
    rrf_k: u32,
}

impl HybridRetriever {
    /// Creates a retriever wired to the shared services.
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<QueryCache>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            reranker: Reranker::new(settings.rerank_weights),
            max_concurrency: settings.max_retrieval_concurrency,
            max_variants: settings.max_brainstorm_queries,
            rrf_k: settings.rrf_k,
        }
    }

    /// Replaces the reranker (e.g. to install a cross-encoder).
    #[must_use]
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    /// Searches with deterministic query expansion.
    ///
    /// `collections` empty means every recognized collection. When all
    /// (collection, variant) pairs hit the cache no external store is
    /// contacted.
    ///
    /// # Errors
    ///
    /// Returns `RetrieveError::Cancelled` when `cancel` fires (partial
    /// results are discarded); store errors other than per-variant
    /// timeouts propagate.
    pub async fn search(
        &self,
        query: &str,
        collections: &[String],
        k: usize,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Retrieved>> {
        let variants = {
            let mut v = expand_query(query);
            v.truncate(self.max_variants);
            v
        };
        self.search_variants(query, &variants, collections, k, options, cancel)
            .await
    }

    /// Searches with task-seeded expansion (brainstorm mode).
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::search`].
    pub async fn search_task(
        &self,
        task: &Task,
        detail: Option<&TaskDetail>,
        collections: &[String],
        k: usize,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Retrieved>> {
        let variants = expand_for_task(task, detail, self.max_variants);
        self.search_variants(&task.title, &variants, collections, k, options, cancel)
            .await
    }

    async fn search_variants(
        &self,
        query: &str,
        variants: &[String],
        collections: &[String],
        k: usize,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Retrieved>> {
        if cancel.is_cancelled() {
            return Err(Error::Retrieve(RetrieveError::Cancelled));
        }

        let collections: Vec<String> = if collections.is_empty() {
            Collection::all_recognized()
                .into_iter()
                .map(|c| c.name)
                .collect()
        } else {
            collections.to_vec()
        };

        let filter_json = options.filter.to_json();
        let keys: Vec<CacheKey> = collections
            .iter()
            .flat_map(|collection| {
                variants
                    .iter()
                    .map(|variant| CacheKey::new(collection, variant, &filter_json))
            })
            .collect();

        // Cache probe: a full hit answers without touching any store
        let cached: Vec<Vec<Retrieved>> =
            keys.iter().filter_map(|key| self.cache.get(key)).collect();
        if cached.len() == keys.len() && !keys.is_empty() {
            debug!(query, "retrieval served from cache");
            return Ok(merge_cached(cached, k));
        }

        // Fan out across (collection, variant) under the worker bound
        let per_collection = self
            .fan_out(variants, &collections, k, options, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(Error::Retrieve(RetrieveError::Cancelled));
        }

        // Per collection: dedup by id and body, then rerank
        let now = Utc::now();
        let mut ranked_per_collection: Vec<(String, Vec<Retrieved>)> = Vec::new();
        for (collection, hits) in per_collection {
            if hits.is_empty() {
                continue;
            }
            let candidates = collapse_hits(hits);
            let kept = dedup_indices(&candidates, |c| c.body.as_str());
            let deduped: Vec<RerankCandidate> = kept
                .into_iter()
                .map(|i| candidates[i].clone())
                .collect();

            let reranked = self.reranker.rerank(query, deduped, now);
            let retrieved: Vec<Retrieved> = reranked
                .into_iter()
                .map(|r| Retrieved {
                    id: r.candidate.id,
                    collection: collection.clone(),
                    score: r.score,
                    body: r.candidate.body,
                    meta: r.candidate.meta,
                })
                .collect();
            ranked_per_collection.push((collection, retrieved));
        }

        // Fuse multi-collection lists by RRF; single lists pass through
        let mut results = fuse_collections(ranked_per_collection, self.rrf_k);
        results.truncate(k);

        // Write the final top-k back under every probed key
        for key in keys {
            self.cache.put(key, results.clone());
        }

        Ok(results)
    }

    /// Bounded parallel fan-out over (collection, variant) pairs.
    ///
    /// A timed-out variant contributes no candidates; any other failure
    /// propagates. Cancellation abandons in-flight searches.
    async fn fan_out(
        &self,
        variants: &[String],
        collections: &[String],
        k: usize,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Vec<SearchHit>)>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let fetch = (k * 2).max(k);
        let mut handles = Vec::with_capacity(collections.len() * variants.len());

        for collection in collections {
            for variant in variants {
                let sem = Arc::clone(&semaphore);
                let store = Arc::clone(&self.store);
                let embedder = Arc::clone(&self.embedder);
                let cancel = cancel.clone();
                let collection = collection.clone();
                let variant = variant.clone();
                let filter = options.filter.clone();
                let mode = options.mode;
                let timeout = options.timeout;

                handles.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await.map_err(|e| {
                        Error::Retrieve(RetrieveError::TaskFailed(e.to_string()))
                    })?;

                    let search = async {
                        match mode {
                            SearchMode::Hybrid => {
                                store
                                    .hybrid_search(
                                        &collection,
                                        &variant,
                                        fetch,
                                        DEFAULT_VECTOR_WEIGHT,
                                        DEFAULT_KEYWORD_WEIGHT,
                                        &filter,
                                    )
                                    .await
                            }
                            SearchMode::Keyword => {
                                store.keyword_search(&collection, &variant, fetch, &filter).await
                            }
                            SearchMode::Vector => {
                                let embedding = embedder.embed_one(&variant).await?;
                                store
                                    .vector_search(&collection, &embedding, fetch, &filter)
                                    .await
                            }
                        }
                    };

                    let outcome = tokio::select! {
                        () = cancel.cancelled() => None,
                        result = tokio::time::timeout(timeout, search) => Some(result),
                    };
                    match outcome {
                        None => Err(Error::Retrieve(RetrieveError::Cancelled)),
                        Some(Ok(hits)) => hits.map(|h| (collection, h)),
                        Some(Err(_elapsed)) => {
                            // Deadline passed: this variant contributes nothing
                            warn!(variant = %variant, collection = %collection,
                                  "variant search timed out");
                            Ok((collection, Vec::new()))
                        }
                    }
                }));
            }
        }

        let mut per_collection: std::collections::HashMap<String, Vec<SearchHit>> =
            std::collections::HashMap::new();
        for joined in join_all(handles).await {
            let outcome = joined
                .map_err(|e| Error::Retrieve(RetrieveError::TaskFailed(e.to_string())))?;
            match outcome {
                Ok((collection, hits)) => {
                    per_collection.entry(collection).or_default().extend(hits);
                }
                Err(Error::Retrieve(RetrieveError::Cancelled)) => {
                    return Err(Error::Retrieve(RetrieveError::Cancelled));
                }
                Err(other) => return Err(other),
            }
        }

        let mut ordered: Vec<(String, Vec<SearchHit>)> = per_collection.into_iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ordered)
    }
}

/// Merges cached per-key result lists: dedup by id keeping the higher
/// score, sort, truncate. Identical lists (the repeat-call case, where
/// every key holds the same final top-k) pass through unchanged.
fn merge_cached(mut lists: Vec<Vec<Retrieved>>, k: usize) -> Vec<Retrieved> {
    let identical = lists.windows(2).all(|pair| {
        pair[0].len() == pair[1].len()
            && pair[0].iter().zip(&pair[1]).all(|(a, b)| a.id == b.id)
    });
    if identical && !lists.is_empty() {
        let mut first = lists.swap_remove(0);
        first.truncate(k);
        return first;
    }

    let mut by_id: std::collections::HashMap<String, Retrieved> = std::collections::HashMap::new();
    for item in lists.into_iter().flatten() {
        match by_id.get(&item.id) {
            Some(existing) if existing.score >= item.score => {}
            _ => {
                by_id.insert(item.id.clone(), item);
            }
        }
    }
    let mut merged: Vec<Retrieved> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(k);
    merged
}

/// Collapses cross-variant hits: one candidate per id with the maximum
/// base score, ordered by score descending for the body dedup pass.
fn collapse_hits(hits: Vec<SearchHit>) -> Vec<RerankCandidate> {
    let mut by_id: std::collections::HashMap<String, RerankCandidate> =
        std::collections::HashMap::new();
    for hit in hits {
        match by_id.get_mut(&hit.id) {
            Some(existing) => {
                if hit.score > existing.base_score {
                    existing.base_score = hit.score;
                }
            }
            None => {
                by_id.insert(
                    hit.id.clone(),
                    RerankCandidate {
                        id: hit.id,
                        base_score: hit.score,
                        meta: hit.meta,
                        body: hit.body,
                    },
                );
            }
        }
    }
    let mut candidates: Vec<RerankCandidate> = by_id.into_values().collect();
    candidates.sort_by(|a, b| {
        b.base_score
            .partial_cmp(&a.base_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
}

/// RRF-fuses per-collection ranked lists; a single list passes through.
fn fuse_collections(mut ranked: Vec<(String, Vec<Retrieved>)>, rrf_k: u32) -> Vec<Retrieved> {
    match ranked.len() {
        0 => Vec::new(),
        1 => ranked.remove(0).1,
        _ => {
            let id_lists: Vec<Vec<String>> = ranked
                .iter()
                .map(|(_, list)| list.iter().map(|r| r.id.clone()).collect())
                .collect();
            let id_slices: Vec<&[String]> = id_lists.iter().map(Vec::as_slice).collect();
            let fused = reciprocal_rank_fusion(&id_slices, rrf_k);

            let mut by_id: std::collections::HashMap<String, Retrieved> =
                std::collections::HashMap::new();
            for (_, list) in ranked {
                for item in list {
                    by_id.entry(item.id.clone()).or_insert(item);
                }
            }

            fused
                .into_iter()
                .filter_map(|(id, score)| {
                    by_id.remove(&id).map(|mut item| {
                        item.score = score;
                        item
                    })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Chunk, Document, SourceKind};
    use crate::embedding::HashEmbedder;
    use crate::store::SqliteVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store wrapper counting every search call.
    struct CountingStore {
        inner: SqliteVectorStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        async fn upsert(&self, collection: &str, chunks: Vec<Chunk>) -> Result<usize> {
            self.inner.upsert(collection, chunks).await
        }
        async fn vector_search(
            &self,
            collection: &str,
            query_embedding: &[f32],
            k: usize,
            filter: &SearchFilter,
        ) -> Result<Vec<SearchHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.vector_search(collection, query_embedding, k, filter).await
        }
        async fn keyword_search(
            &self,
            collection: &str,
            query_text: &str,
            k: usize,
            filter: &SearchFilter,
        ) -> Result<Vec<SearchHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.keyword_search(collection, query_text, k, filter).await
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .hybrid_search(collection, query_text, k, vec_weight, kw_weight, filter)
                .await
        }
        async fn delete(&self, collection: &str, filter: &SearchFilter) -> Result<usize> {
            self.inner.delete(collection, filter).await
        }
        async fn count(&self, collection: &str) -> Result<usize> {
            self.inner.count(collection).await
        }
    }

    async fn seeded_retriever() -> (HybridRetriever, Arc<CountingStore>) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let cache = Arc::new(QueryCache::with_defaults());
        let inner = SqliteVectorStore::in_memory(Arc::clone(&embedder)).unwrap();

        let doc = Document::new(
            "d1",
            SourceKind::Knowledge,
            "kb.md",
            "KB",
            "",
        );
        let info = doc.info();
        let bodies = [
            "chromadb usage patterns for embedding collections",
            "postgres pgvector index tuning notes",
            "daily standup notes from the atlas team",
        ];
        let chunks: Vec<Chunk> = bodies
            .iter()
            .enumerate()
            .map(|(i, b)| Chunk::new(&info, i, bodies.len(), (*b).to_string()))
            .collect();
        inner.upsert("knowledge", chunks).await.unwrap();

        let store = Arc::new(CountingStore {
            inner,
            calls: AtomicUsize::new(0),
        });
        let retriever = HybridRetriever::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            cache,
            &Settings::default(),
        );
        (retriever, store)
    }

    fn knowledge() -> Vec<String> {
        vec!["knowledge".to_string()]
    }

    #[tokio::test]
    async fn test_search_returns_ranked_results() {
        let (retriever, _store) = seeded_retriever().await;
        let results = retriever
            .search(
                "chromadb usage",
                &knowledge(),
                5,
                &SearchOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results[0].body.contains("chromadb"));
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_second_call_is_cache_only() {
        let (retriever, store) = seeded_retriever().await;
        let cancel = CancellationToken::new();
        let options = SearchOptions::default();

        let first = retriever
            .search("chromadb usage", &knowledge(), 5, &options, &cancel)
            .await
            .unwrap();
        let calls_after_first = store.calls.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);

        let second = retriever
            .search("chromadb usage", &knowledge(), 5, &options, &cancel)
            .await
            .unwrap();
        // No store contact on the all-hit path
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(
            first.iter().map(|r| &r.id).collect::<Vec<_>>(),
            second.iter().map(|r| &r.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (retriever, _store) = seeded_retriever().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = retriever
            .search(
                "anything",
                &knowledge(),
                5,
                &SearchOptions::default(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Retrieve(RetrieveError::Cancelled)));
    }

    #[tokio::test]
    async fn test_task_seeded_search() {
        let (retriever, _store) = seeded_retriever().await;
        let task = Task::new("T1", "chromadb usage").with_tags(["embeddings"]);
        let results = retriever
            .search_task(
                &task,
                None,
                &knowledge(),
                3,
                &SearchOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_collections_defaults_to_recognized() {
        let (retriever, _store) = seeded_retriever().await;
        let results = retriever
            .search(
                "pgvector tuning",
                &[],
                5,
                &SearchOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        // Only the knowledge collection has rows; fusion handles the
        // empty ones
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.collection == "knowledge"));
    }

    #[test]
    fn test_merge_cached_dedup_by_id() {
        let lists = vec![
            vec![Retrieved::test_fixture("a", 0.9), Retrieved::test_fixture("b", 0.5)],
            vec![Retrieved::test_fixture("a", 0.4), Retrieved::test_fixture("c", 0.7)],
        ];
        let merged = merge_cached(lists, 10);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, "a");
        assert!((merged[0].score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_collapse_hits_keeps_max_score() {
        let hits = vec![
            SearchHit {
                id: "x".to_string(),
                score: 0.3,
                body: "b".to_string(),
                meta: ChunkMeta::default(),
            },
            SearchHit {
                id: "x".to_string(),
                score: 0.8,
                body: "b".to_string(),
                meta: ChunkMeta::default(),
            },
        ];
        let collapsed = collapse_hits(hits);
        assert_eq!(collapsed.len(), 1);
        assert!((collapsed[0].base_score - 0.8).abs() < f64::EPSILON);
    }
}
