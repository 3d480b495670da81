//! End-to-end scenarios over the assembled service stack.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use ensemble_rs::agent::{AgentRouter, Fragment};
use ensemble_rs::core::{SourceKind, chunk_id, document_hash};
use ensemble_rs::error::ProviderError;
use ensemble_rs::rerank::{RerankCandidate, Reranker, RerankWeights};
use ensemble_rs::{
    Chunk, ChunkMeta, Collection, Document, DocumentStore, Embedder, GraphStore, HashEmbedder,
    HybridRetriever, Meeting, MemoryDocumentStore, PlanRequest, Planner, QueryCache,
    ScriptedProvider, SearchFilter, SearchHit, SearchOptions, Services, Settings,
    SqliteGraphStore, SqliteVectorStore, Task, TaskPriority, VectorStore,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
}

fn chunks_for(doc_id: &str, bodies: &[&str]) -> Vec<Chunk> {
    let doc = Document::new(doc_id, SourceKind::Knowledge, "kb.md", doc_id, "");
    let info = doc.info();
    bodies
        .iter()
        .enumerate()
        .map(|(i, body)| Chunk::new(&info, i, bodies.len(), (*body).to_string()))
        .collect()
}

/// Embedder wrapper counting every provider call.
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

/// Store wrapper counting every search call.
struct CountingStore {
    inner: SqliteVectorStore,
    searches: AtomicUsize,
}

#[async_trait]
impl VectorStore for CountingStore {
    async fn upsert(&self, collection: &str, chunks: Vec<Chunk>) -> ensemble_rs::Result<usize> {
        self.inner.upsert(collection, chunks).await
    }
    async fn vector_search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> ensemble_rs::Result<Vec<SearchHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .vector_search(collection, query_embedding, k, filter)
            .await
    }
    async fn keyword_search(
        &self,
        collection: &str,
        query_text: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> ensemble_rs::Result<Vec<SearchHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .keyword_search(collection, query_text, k, filter)
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
    ) -> ensemble_rs::Result<Vec<SearchHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .hybrid_search(collection, query_text, k, vec_weight, kw_weight, filter)
            .await
    }
    async fn delete(&self, collection: &str, filter: &SearchFilter) -> ensemble_rs::Result<usize> {
        self.inner.delete(collection, filter).await
    }
    async fn count(&self, collection: &str) -> ensemble_rs::Result<usize> {
        self.inner.count(collection).await
    }
}

// -------------------------------------------------------------------------
// S1: plan skeleton
// -------------------------------------------------------------------------

#[tokio::test]
async fn s1_plan_skeleton_avoids_meeting() {
    let tz = FixedOffset::east_opt(0).unwrap();
    let store = MemoryDocumentStore::new()
        .with_tasks([Task::new("T1", "Write spec")
            .with_priority(TaskPriority::High)
            .with_estimate(2.0)])
        .with_meetings([Meeting {
            id: "m1".to_string(),
            title: "Sync".to_string(),
            start: tz.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap(),
            end: tz.with_ymd_and_hms(2025, 6, 10, 10, 30, 0).unwrap(),
            participants: vec![],
        }]);

    let planner = Planner::new(Arc::new(store), &Settings::default());
    let output = planner
        .plan(
            &PlanRequest {
                target_date: Some("2025-06-10".to_string()),
                work_hours: Some((
                    NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                )),
                ..PlanRequest::default()
            },
            today(),
        )
        .await
        .unwrap();

    // Exactly one block for T1, two hours long, never overlapping the
    // 10:00-10:30 meeting
    assert_eq!(output.blocks.len(), 1);
    let block = &output.blocks[0];
    assert_eq!(block.task_id, "T1");
    let meeting_start = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
    let meeting_end = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
    assert!(block.end <= meeting_start || block.start >= meeting_end);
    let minutes = (block.end - block.start).num_minutes();
    assert_eq!(minutes, 120);
}

// -------------------------------------------------------------------------
// S2: date parse through the router
// -------------------------------------------------------------------------

#[tokio::test]
async fn s2_plan_tomorrow_resolves_next_day() {
    let dir = tempfile::tempdir().unwrap();
    let services = Services::ephemeral(
        Settings::default(),
        Arc::new(ScriptedProvider::unavailable()),
        dir.path().to_path_buf(),
    )
    .unwrap();
    let router = Arc::new(AgentRouter::new(Arc::new(services)));
    let mut session = router.open_session(today());

    let fragments = session.ask("plan tomorrow").await.unwrap();
    let plan_text = fragments
        .iter()
        .find_map(|f| match f {
            Fragment::Tool { marker, text } if marker == "plan_day" => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert!(plan_text.contains("2025-06-11"));
}

// -------------------------------------------------------------------------
// S3: cache hit means zero provider and store calls
// -------------------------------------------------------------------------

#[tokio::test]
async fn s3_second_search_is_cache_only() {
    let settings = Settings::default();
    let embedder = Arc::new(CountingEmbedder {
        inner: HashEmbedder::new(64),
        calls: AtomicUsize::new(0),
    });
    let cache = Arc::new(QueryCache::with_defaults());
    let inner = SqliteVectorStore::in_memory(
        Arc::clone(&embedder) as Arc<dyn Embedder>
    )
    .unwrap();
    inner
        .upsert(
            "knowledge",
            chunks_for("d1", &["chromadb usage patterns", "unrelated gardening notes"]),
        )
        .await
        .unwrap();
    let store = Arc::new(CountingStore {
        inner,
        searches: AtomicUsize::new(0),
    });

    let retriever = HybridRetriever::new(
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        cache,
        &settings,
    );

    let collections = vec!["knowledge".to_string()];
    let options = SearchOptions::default();
    let cancel = CancellationToken::new();

    retriever
        .search("chromadb usage", &collections, 5, &options, &cancel)
        .await
        .unwrap();
    let embed_calls = embedder.calls.load(Ordering::SeqCst);
    let store_calls = store.searches.load(Ordering::SeqCst);
    assert!(embed_calls > 0);
    assert!(store_calls > 0);

    retriever
        .search("chromadb usage", &collections, 5, &options, &cancel)
        .await
        .unwrap();
    // Second call within TTL: zero additional embedding or store calls
    assert_eq!(embedder.calls.load(Ordering::SeqCst), embed_calls);
    assert_eq!(store.searches.load(Ordering::SeqCst), store_calls);
}

// -------------------------------------------------------------------------
// S4: brainstorm idempotence
// -------------------------------------------------------------------------

#[tokio::test]
async fn s4_brainstorm_new_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    // One scripted envelope: a second build attempt would exhaust the
    // script and take the fallback path, changing the content
    let provider = ScriptedProvider::new([
        r#"{"overview":"O.","key_considerations":"K.","potential_approaches":"P.","risks":"R.","recommendations":"Rec."}"#,
    ]);
    let services = Services::ephemeral(
        Settings::default(),
        Arc::new(provider),
        dir.path().to_path_buf(),
    )
    .unwrap();
    services
        .doc_store
        .create_task(Task::new("T1", "Ship the importer"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let first = services
        .brainstorm
        .process("brainstorm task id T1", &cancel)
        .await
        .unwrap();
    assert!(first.newly_generated);

    let second = services
        .brainstorm
        .process("brainstorm task id T1", &cancel)
        .await
        .unwrap();
    assert_eq!(second.source.as_str(), "existing");
    assert!(!second.newly_generated);
    // Byte-for-byte identical file content
    assert_eq!(first.content, second.content);

    let per_task = std::fs::read_to_string(dir.path().join("T1_brainstorm.md")).unwrap();
    assert_eq!(per_task, first.content);
}

// -------------------------------------------------------------------------
// S5: rerank ordering
// -------------------------------------------------------------------------

#[tokio::test]
async fn s5_young_verified_beats_stale_higher_base() {
    let now = Utc::now();
    let stale = RerankCandidate {
        id: "stale".to_string(),
        base_score: 0.8,
        meta: ChunkMeta {
            source_kind: Some(SourceKind::Website),
            indexed_at: Some(now - chrono::Duration::days(90)),
            ..ChunkMeta::default()
        },
        body: "older chunk".to_string(),
    };
    let young = RerankCandidate {
        id: "young".to_string(),
        base_score: 0.7,
        meta: ChunkMeta {
            source_kind: Some(SourceKind::Website),
            indexed_at: Some(now - chrono::Duration::days(1)),
            verified: true,
            ..ChunkMeta::default()
        },
        body: "younger verified chunk".to_string(),
    };

    // Default weights 0.5/0.2/0.3/0.0 with no cross-encoder installed
    let reranker = Reranker::new(RerankWeights::default());
    let out = reranker.rerank("query", vec![stale, young], now);
    assert_eq!(out[0].candidate.id, "young");
}

// -------------------------------------------------------------------------
// S6: graph substring fallback
// -------------------------------------------------------------------------

#[tokio::test]
async fn s6_graph_fallback_without_vector_index() {
    let graph = SqliteGraphStore::in_memory(Arc::new(HashEmbedder::new(64))).unwrap();
    graph
        .ingest_episode("ep-1", "Alice Nguyen met Bob Martin about the rollout.")
        .await
        .unwrap();
    graph.drop_vector_indices().unwrap();

    let hits = graph.entity_search("Alice", 5).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].0.name.to_lowercase().contains("alice"));

    let health = graph.health_check().await.unwrap();
    assert!(!health.vector_indices_present);
}

// -------------------------------------------------------------------------
// Invariants
// -------------------------------------------------------------------------

#[tokio::test]
async fn chunk_ids_carry_source_prefix_and_valid_ordinals() {
    let collection = Collection::recognized("conversations").unwrap();
    let doc = Document::new(
        "conv-1",
        SourceKind::Conversation,
        "conv-1",
        "Standup transcript",
        &"hello world, we discussed the rollout. ".repeat(40),
    );
    let chunks = ensemble_rs::chunking::chunk(&doc.body, &collection, &doc.info()).unwrap();

    assert!(chunks.len() > 1);
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.ordinal, i);
        assert_eq!(chunk.total, total);
        assert!(chunk.ordinal < chunk.total);
        assert!(chunk.id.starts_with("conversation::"));
    }
    // The id embeds the document hash, preventing cross-source collisions
    assert_eq!(
        chunks[0].id,
        chunk_id(SourceKind::Conversation, &document_hash("conv-1"), 0)
    );
}

#[tokio::test]
async fn store_results_non_increasing_and_upsert_idempotent() {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let store = SqliteVectorStore::in_memory(Arc::clone(&embedder)).unwrap();

    let chunks = chunks_for("d1", &["alpha beta", "beta gamma", "gamma delta"]);
    store.upsert("knowledge", chunks.clone()).await.unwrap();
    assert_eq!(store.count("knowledge").await.unwrap(), 3);

    // Idempotent on id: same batch again leaves the row count unchanged
    store.upsert("knowledge", chunks).await.unwrap();
    assert_eq!(store.count("knowledge").await.unwrap(), 3);

    let query = embedder.embed_one("beta").await.unwrap();
    let hits = store
        .vector_search("knowledge", &query, 10, &SearchFilter::none())
        .await
        .unwrap();
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn cache_capacity_and_ttl_hold() {
    let cache = QueryCache::new(5, Duration::ZERO);
    for i in 0..20 {
        let key = ensemble_rs::CacheKey::new("knowledge", &format!("q{i}"), "{}");
        cache.put(key, Vec::new());
    }
    let stats = cache.stats();
    assert!(stats.size <= 5);

    // TTL zero: everything is expired on read
    let key = ensemble_rs::CacheKey::new("knowledge", "q19", "{}");
    std::thread::sleep(Duration::from_millis(2));
    assert!(cache.get(&key).is_none());
}

#[tokio::test]
async fn planner_equal_work_hours_yield_empty_plan() {
    let store = MemoryDocumentStore::new().with_tasks([Task::new("T1", "Anything")]);
    let planner = Planner::new(Arc::new(store), &Settings::default());
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

    let output = planner
        .plan(
            &PlanRequest {
                work_hours: Some((nine, nine)),
                ..PlanRequest::default()
            },
            today(),
        )
        .await
        .unwrap();
    assert!(output.blocks.is_empty());
}

#[tokio::test]
async fn chunker_exact_size_single_chunk() {
    let body = "b".repeat(500);
    let collection = Collection::new("scratch", 500, 50);
    let doc = Document::new("d", SourceKind::Knowledge, "d.md", "D", &body);
    let chunks = ensemble_rs::chunking::chunk(&body, &collection, &doc.info()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].ordinal, 0);
    assert_eq!(chunks[0].total, 1);
}

#[tokio::test]
async fn brainstorm_dual_write_both_or_neither() {
    let dir = tempfile::tempdir().unwrap();
    let services = Services::ephemeral(
        Settings::default(),
        Arc::new(ScriptedProvider::unavailable()),
        dir.path().to_path_buf(),
    )
    .unwrap();
    services
        .doc_store
        .create_task(Task::new("T1", "Fallback build"))
        .await
        .unwrap();

    services
        .brainstorm
        .process("brainstorm task id T1", &CancellationToken::new())
        .await
        .unwrap();

    // Both artifacts observable together
    let per_task = dir.path().join("T1_brainstorm.md");
    let collective = dir.path().join("task_brainstorms.md");
    assert!(per_task.exists());
    assert!(collective.exists());
    let per_task_content = std::fs::read_to_string(per_task).unwrap();
    let collective_content = std::fs::read_to_string(collective).unwrap();
    assert!(collective_content.contains(per_task_content.trim()));
}

#[tokio::test]
async fn graph_ingest_attaches_episodes() {
    let graph = SqliteGraphStore::in_memory(Arc::new(HashEmbedder::new(64))).unwrap();
    graph
        .ingest_episode("ep-1", "Alice Nguyen met Bob Martin.")
        .await
        .unwrap();
    graph
        .ingest_episode("ep-2", "Alice Nguyen met Bob Martin.")
        .await
        .unwrap();

    let facts = graph.fact_search("met", 10).await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].0.episodes.len(), 2);
}

#[tokio::test]
async fn planner_handles_a_thousand_tasks_and_logs() {
    let store = MemoryDocumentStore::new().with_tasks((0..1000).map(|i| {
        Task::new(&format!("t{i:04}"), &format!("Task number {i}"))
            .with_priority(match i % 3 {
                0 => TaskPriority::High,
                1 => TaskPriority::Medium,
                _ => TaskPriority::Low,
            })
            .with_estimate(0.5)
    }));
    for i in 0..1000 {
        store
            .append_log(ensemble_rs::WorkLog {
                log_id: format!("l{i:04}"),
                date: NaiveDate::from_ymd_opt(2025, 6, 9).unwrap(),
                description: format!("work item {i}"),
                actual_hours: 0.1,
                task_id: None,
            })
            .await
            .unwrap();
    }

    let planner = Planner::new(Arc::new(store), &Settings::default());
    let started = std::time::Instant::now();
    let output = planner.plan(&PlanRequest::default(), today()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    // Full working day packed with half-hour blocks, all disjoint
    assert!(!output.blocks.is_empty());
    for pair in output.blocks.windows(2) {
        assert!(pair[0].end <= pair[1].start);
    }
    // Yesterday summary stays capped despite a thousand entries
    assert!(output.yesterday_markdown.matches("\n- ").count() <= 5);
}

#[tokio::test]
async fn router_add_meeting_and_log_via_envelopes() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Vec::<String>::new())
        .with_keyed(
            "sync with the team",
            r#"{"action":"add_meeting","data":{"title":"Team sync","date":"tomorrow","start":"10:00","end":"10:30","participants":["Alice","Bob"]}}"#,
        )
        .with_keyed(
            "log two hours",
            r#"{"action":"add_log","data":{"description":"importer work","hours":2.0,"date":"today"}}"#,
        );
    let services = Services::ephemeral(
        Settings::default(),
        Arc::new(provider),
        dir.path().to_path_buf(),
    )
    .unwrap();
    let doc_store = Arc::clone(&services.doc_store);
    let router = Arc::new(AgentRouter::new(Arc::new(services)));
    let mut session = router.open_session(today());

    let fragments = session
        .ask("schedule a sync with the team tomorrow at 10")
        .await
        .unwrap();
    assert!(fragments.iter().any(|f| matches!(
        f,
        Fragment::Tool { marker, .. } if marker == "add_meeting"
    )));
    let meetings = doc_store
        .meetings_on(NaiveDate::from_ymd_opt(2025, 6, 11).unwrap())
        .await
        .unwrap();
    assert_eq!(meetings.len(), 1);
    assert_eq!(meetings[0].title, "Team sync");
    assert_eq!(meetings[0].participants, vec!["Alice", "Bob"]);

    let fragments = session.ask("log two hours on the importer").await.unwrap();
    assert!(fragments.iter().any(|f| matches!(
        f,
        Fragment::Tool { marker, .. } if marker == "add_log"
    )));
    let logs = doc_store.logs_for(today()).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!((logs[0].actual_hours - 2.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn session_survives_failures_and_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let services = Services::ephemeral(
        Settings::default(),
        Arc::new(ScriptedProvider::unavailable()),
        dir.path().to_path_buf(),
    )
    .unwrap();
    let router = Arc::new(AgentRouter::new(Arc::new(services)));
    let mut session = router.open_session(today());

    // A failing query produces a typed error fragment
    let fragments = session.ask("remove task T404").await.unwrap();
    assert!(
        fragments
            .iter()
            .any(|f| matches!(f, Fragment::Error { kind, .. } if kind == "store"))
    );

    // The session keeps serving subsequent queries in order
    let fragments = session.ask("add task: first").await.unwrap();
    assert!(fragments.iter().any(|f| matches!(f, Fragment::Tool { .. })));
    let fragments = session.ask("search tasks: first").await.unwrap();
    let found = fragments.iter().any(|f| {
        matches!(f, Fragment::Tool { text, .. } if text.contains("first"))
    });
    assert!(found);
}
