//! Shared service handles.
//!
//! A single dependency-injection record threaded through the call stack
//! in place of module-level singletons. Built once at startup from
//! [`Settings`]; every field is an `Arc` so agents, tools, and sessions
//! share the same handles.

use std::path::PathBuf;
use std::sync::Arc;

use crate::Result;
use crate::brainstorm::BrainstormEngine;
use crate::cache::QueryCache;
use crate::config::Settings;
use crate::docstore::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};
use crate::embedding::{Embedder, HashEmbedder, RetryingEmbedder};
use crate::graph::{GraphStore, SqliteGraphStore};
use crate::intent::IntentParser;
use crate::llm::LlmProvider;
use crate::plan::Planner;
use crate::retrieve::HybridRetriever;
use crate::store::{SqliteVectorStore, VectorStore};

/// The shared service record.
pub struct Services {
    /// Immutable runtime settings.
    pub settings: Settings,
    /// Embedding provider.
    pub embedder: Arc<dyn Embedder>,
    /// Multi-collection vector store.
    pub vector_store: Arc<dyn VectorStore>,
    /// Entity/relationship graph store.
    pub graph_store: Arc<dyn GraphStore>,
    /// Typed record store.
    pub doc_store: Arc<dyn DocumentStore>,
    /// Process-wide query cache.
    pub cache: Arc<QueryCache>,
    /// LLM provider.
    pub provider: Arc<dyn LlmProvider>,
    /// Retrieval pipeline.
    pub retriever: Arc<HybridRetriever>,
    /// Brainstorm pipeline.
    pub brainstorm: Arc<BrainstormEngine>,
    /// Day planner.
    pub planner: Arc<Planner>,
    /// Intent parser.
    pub intent: Arc<IntentParser>,
}

impl Services {
    /// Assembles an ephemeral stack: in-memory stores, the hash
    /// embedder under retry, and the given provider. Used by tests and
    /// the default interactive session.
    ///
    /// # Errors
    ///
    /// Returns store initialization failures.
    pub fn ephemeral(
        settings: Settings,
        provider: Arc<dyn LlmProvider>,
        brainstorm_dir: PathBuf,
    ) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(RetryingEmbedder::new(HashEmbedder::new(
            crate::core::EMBEDDING_DIM,
        )));
        let cache = Arc::new(QueryCache::new(settings.cache_size, settings.cache_ttl));

        let vector_store: Arc<dyn VectorStore> = Arc::new(
            SqliteVectorStore::in_memory(Arc::clone(&embedder))?
                .with_cache(Arc::clone(&cache))
                .with_rrf_k(settings.rrf_k),
        );
        let graph_store: Arc<dyn GraphStore> = Arc::new(
            SqliteGraphStore::in_memory(Arc::clone(&embedder))?
                .with_provider(Arc::clone(&provider), &settings.llm_model),
        );
        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());

        Self::assemble(
            settings,
            embedder,
            vector_store,
            graph_store,
            doc_store,
            cache,
            provider,
            brainstorm_dir,
        )
    }

    /// Assembles a durable stack: SQLite files at the configured
    /// locations for the vector store, the graph store, and the
    /// document records (tasks, meetings, logs, notes).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when a database cannot be
    /// opened.
    pub fn durable(
        settings: Settings,
        provider: Arc<dyn LlmProvider>,
        brainstorm_dir: PathBuf,
    ) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(RetryingEmbedder::new(HashEmbedder::new(
            crate::core::EMBEDDING_DIM,
        )));
        let cache = Arc::new(QueryCache::new(settings.cache_size, settings.cache_ttl));

        let vector_store: Arc<dyn VectorStore> = Arc::new(
            SqliteVectorStore::open(&settings.vector_store_url, Arc::clone(&embedder))?
                .with_cache(Arc::clone(&cache))
                .with_rrf_k(settings.rrf_k),
        );
        let graph_store: Arc<dyn GraphStore> = Arc::new(
            SqliteGraphStore::open(&settings.graph_uri, Arc::clone(&embedder))?
                .with_provider(Arc::clone(&provider), &settings.llm_model),
        );
        let doc_store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open(
            &docs_path(&settings.vector_store_url),
        )?);

        Self::assemble(
            settings,
            embedder,
            vector_store,
            graph_store,
            doc_store,
            cache,
            provider,
            brainstorm_dir,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        doc_store: Arc<dyn DocumentStore>,
        cache: Arc<QueryCache>,
        provider: Arc<dyn LlmProvider>,
        brainstorm_dir: PathBuf,
    ) -> Result<Self> {
        let retriever = Arc::new(HybridRetriever::new(
            Arc::clone(&vector_store),
            Arc::clone(&embedder),
            Arc::clone(&cache),
            &settings,
        ));
        let brainstorm = Arc::new(BrainstormEngine::new(
            Arc::clone(&doc_store),
            Arc::clone(&retriever),
            Arc::clone(&provider),
            &settings,
            brainstorm_dir,
        ));
        let planner = Arc::new(
            Planner::new(Arc::clone(&doc_store), &settings)
                .with_provider(Arc::clone(&provider)),
        );
        let intent = Arc::new(IntentParser::new(
            Arc::clone(&provider),
            &settings.llm_model,
        ));

        Ok(Self {
            settings,
            embedder,
            vector_store,
            graph_store,
            doc_store,
            cache,
            provider,
            retriever,
            brainstorm,
            planner,
            intent,
        })
    }
}

/// Document-record database path beside the vector store's:
/// `ensemble.db` becomes `ensemble-docs.db`.
fn docs_path(vector_store_url: &str) -> String {
    vector_store_url.strip_suffix(".db").map_or_else(
        || format!("{vector_store_url}-docs"),
        |stem| format!("{stem}-docs.db"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;

    #[test]
    fn test_docs_path_derivation() {
        assert_eq!(docs_path("ensemble.db"), "ensemble-docs.db");
        assert_eq!(docs_path("/var/data/store.db"), "/var/data/store-docs.db");
        assert_eq!(docs_path("ensemble"), "ensemble-docs");
    }

    #[tokio::test]
    async fn test_durable_records_survive_reassembly() {
        use crate::core::Task;

        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            vector_store_url: dir.path().join("store.db").to_string_lossy().to_string(),
            graph_uri: dir.path().join("graph.db").to_string_lossy().to_string(),
            ..Settings::default()
        };

        {
            let services = Services::durable(
                settings.clone(),
                Arc::new(ScriptedProvider::unavailable()),
                dir.path().join("brainstorms"),
            )
            .unwrap();
            services
                .doc_store
                .create_task(Task::new("T1", "Outlives the process"))
                .await
                .unwrap();
        }

        // A rebuilt stack over the same files still sees the task
        let services = Services::durable(
            settings,
            Arc::new(ScriptedProvider::unavailable()),
            dir.path().join("brainstorms"),
        )
        .unwrap();
        let task = services.doc_store.task("T1").await.unwrap().unwrap();
        assert_eq!(task.title, "Outlives the process");
    }

    #[tokio::test]
    async fn test_ephemeral_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services::ephemeral(
            Settings::default(),
            Arc::new(ScriptedProvider::unavailable()),
            dir.path().to_path_buf(),
        )
        .unwrap();

        assert_eq!(services.embedder.dimensions(), 1536);
        assert_eq!(services.vector_store.count("knowledge").await.unwrap(), 0);
        let health = services.graph_store.health_check().await.unwrap();
        assert!(health.vector_indices_present);
    }
}
