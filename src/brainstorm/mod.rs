//! Idempotent task brainstorming.
//!
//! Enriches a task with retrieved context and an LLM-generated
//! structured report, persisted durably. The pipeline per `(task,
//! action)` runs `parsing → locating_task → retrieving → generating →
//! persisting`; at most one build per task is in flight, a second
//! request with the same action joins the running build's result, a
//! different action is rejected with `BusyOnTask`.

mod persist;

pub use persist::{COLLECTIVE_FILE, SECTION_ORDER, parse, render, task_file_name, write_atomic};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::config::Settings;
use crate::core::{Brainstorm, BrainstormKind, Task};
use crate::docstore::DocumentStore;
use crate::error::{BrainstormError, Error};
use crate::intent::TaskSelector;
use crate::llm::{LlmProvider, oneshot_request};
use crate::retrieve::{HybridRetriever, Retrieved, SearchOptions};

/// Context snippets carried into the report.
const RAG_CONTEXT_LIMIT: usize = 5;
/// Candidates retrieved before the context cut.
const RETRIEVE_K: usize = 10;
/// LLM attempts before the template fallback.
const MAX_LLM_ATTEMPTS: u32 = 3;

/// Requested build action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrainstormAction {
    /// Build unless a report already exists.
    New,
    /// Build, replacing any existing report.
    Replace,
    /// Build an improved revision.
    Improve,
    /// Build a revision reflecting updated task state.
    Update,
}

impl BrainstormAction {
    /// Stable string form (used in `BusyOnTask` messages).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Replace => "replace",
            Self::Improve => "improve",
            Self::Update => "update",
        }
    }

    /// The report kind a build with this action produces.
    #[must_use]
    pub const fn kind(self) -> BrainstormKind {
        match self {
            Self::New | Self::Replace => BrainstormKind::Initial,
            Self::Improve => BrainstormKind::Improved,
            Self::Update => BrainstormKind::Updated,
        }
    }
}

/// Where a returned report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrainstormSource {
    /// Built by this call.
    Generated,
    /// Loaded from the existing per-task file.
    Existing,
}

impl BrainstormSource {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Existing => "existing",
        }
    }
}

/// Outcome of a brainstorm request.
#[derive(Debug, Clone)]
pub struct BrainstormResult {
    /// The task the report belongs to.
    pub task_id: String,
    /// Full report markdown.
    pub content: String,
    /// Report kind.
    pub kind: BrainstormKind,
    /// Generated now or loaded from disk.
    pub source: BrainstormSource,
    /// Whether this call ran the build pipeline.
    pub newly_generated: bool,
    /// Version of the report (monotonic per task).
    pub version: u32,
}

/// Parses a brainstorm request into an action and task selector.
///
/// Accepted shapes: `brainstorm [new|replace|improve|update] task id
/// <id>` and `brainstorm [action] [task] <title>`.
///
/// # Errors
///
/// Returns [`BrainstormError::Unparseable`] when no selector remains
/// after the keywords.
pub fn parse_request(
    text: &str,
) -> std::result::Result<(BrainstormAction, TaskSelector), BrainstormError> {
    let lowered = text.trim().to_lowercase();
    let mut rest = lowered
        .strip_prefix("brainstorm")
        .unwrap_or(&lowered)
        .trim();

    let action = if let Some(tail) = rest.strip_prefix("replace") {
        rest = tail.trim();
        BrainstormAction::Replace
    } else if let Some(tail) = rest.strip_prefix("improve") {
        rest = tail.trim();
        BrainstormAction::Improve
    } else if let Some(tail) = rest.strip_prefix("update") {
        rest = tail.trim();
        BrainstormAction::Update
    } else if let Some(tail) = rest.strip_prefix("new") {
        rest = tail.trim();
        BrainstormAction::New
    } else {
        BrainstormAction::New
    };

    let selector = if let Some(id) = rest
        .strip_prefix("task id")
        .or_else(|| rest.strip_prefix("task-id"))
    {
        let id = id.trim().trim_matches(['"', '\'']);
        if id.is_empty() {
            return Err(BrainstormError::Unparseable {
                input: text.to_string(),
            });
        }
        // Ids are case-sensitive: recover the original casing by offset
        // into the trimmed input (identical for ASCII lowering)
        let trimmed_text = text.trim();
        let original = lowered
            .rfind(id)
            .and_then(|offset| trimmed_text.get(offset..offset + id.len()))
            .unwrap_or(id);
        TaskSelector::ById(original.to_string())
    } else {
        let title = rest
            .strip_prefix("task")
            .unwrap_or(rest)
            .trim()
            .trim_matches(['"', '\'']);
        if title.is_empty() {
            return Err(BrainstormError::Unparseable {
                input: text.to_string(),
            });
        }
        TaskSelector::ByTitle(title.to_string())
    };

    Ok((action, selector))
}

type SharedOutcome = std::result::Result<BrainstormResult, String>;

struct InFlight {
    action: BrainstormAction,
    rx: watch::Receiver<Option<SharedOutcome>>,
}

/// The brainstorm pipeline.
pub struct BrainstormEngine {
    doc_store: Arc<dyn DocumentStore>,
    retriever: Arc<HybridRetriever>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    dir: PathBuf,
    inflight: Mutex<HashMap<String, InFlight>>,
}

/// JSON envelope the generation prompt asks for.
#[derive(Debug, Deserialize)]
struct GeneratedSections {
    overview: String,
    key_considerations: String,
    potential_approaches: String,
    risks: String,
    recommendations: String,
}

/// System prompt for report generation.
const GENERATION_PROMPT: &str = r#"Write a brainstorm report for the given task using the provided context. Respond with JSON only:
{"overview": "...", "key_considerations": "...", "potential_approaches": "...", "risks": "...", "recommendations": "..."}
Each value is markdown (bullet lists welcome). Ground claims in the context where possible."#;

impl BrainstormEngine {
    /// Creates an engine persisting under `dir`.
    #[must_use]
    pub fn new(
        doc_store: Arc<dyn DocumentStore>,
        retriever: Arc<HybridRetriever>,
        provider: Arc<dyn LlmProvider>,
        settings: &Settings,
        dir: PathBuf,
    ) -> Self {
        Self {
            doc_store,
            retriever,
            provider,
            model: settings.llm_model.clone(),
            dir,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Processes a natural-language brainstorm request end to end.
    ///
    /// # Errors
    ///
    /// [`BrainstormError::Unparseable`] for an unreadable request,
    /// [`BrainstormError::TaskNotFound`] for a missing task,
    /// [`BrainstormError::BusyOnTask`] when a different-action build is
    /// in flight, [`BrainstormError::Failed`] when both retrieval and
    /// generation fail, [`BrainstormError::Persist`] on write failure.
    pub async fn process(
        &self,
        request_text: &str,
        cancel: &CancellationToken,
    ) -> Result<BrainstormResult> {
        // parsing
        let (action, selector) = parse_request(request_text).map_err(Error::Brainstorm)?;

        // locating_task
        let task = match &selector {
            TaskSelector::ById(id) => self.doc_store.task(id).await?,
            TaskSelector::ByTitle(title) => self.doc_store.find_task_by_title(title).await?,
        }
        .ok_or_else(|| {
            Error::Brainstorm(BrainstormError::TaskNotFound {
                selector: selector.as_str().to_string(),
            })
        })?;

        // Idempotence: an existing report satisfies `new` without a build
        if action == BrainstormAction::New
            && let Some((content, record)) = persist::load_existing(&self.dir, &task.id)
        {
            debug!(task = %task.id, "existing brainstorm reused");
            return Ok(BrainstormResult {
                task_id: task.id,
                content,
                kind: record.kind,
                source: BrainstormSource::Existing,
                newly_generated: false,
                version: record.version,
            });
        }

        // At-most-one build per task: join same-action, reject otherwise
        let mut rx = {
            let mut inflight = self.inflight.lock().await;
            if let Some(running) = inflight.get(&task.id) {
                if running.action == action {
                    Some(running.rx.clone())
                } else {
                    return Err(Error::Brainstorm(BrainstormError::BusyOnTask {
                        task_id: task.id,
                        in_flight: running.action.as_str().to_string(),
                    }));
                }
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(task.id.clone(), InFlight { action, rx });
                drop(inflight);

                let outcome = self.build(&task, action, cancel).await;
                let shared: SharedOutcome = match &outcome {
                    Ok(result) => Ok(result.clone()),
                    Err(e) => Err(e.to_string()),
                };
                self.inflight.lock().await.remove(&task.id);
                let _ = tx.send(Some(shared));
                return outcome;
            }
        };

        // Joiner path: wait for the builder's outcome
        if let Some(rx) = rx.as_mut() {
            loop {
                if let Some(outcome) = rx.borrow_and_update().clone() {
                    return outcome.map_err(|message| {
                        Error::Brainstorm(BrainstormError::Failed { reason: message })
                    });
                }
                if rx.changed().await.is_err() {
                    return Err(Error::Brainstorm(BrainstormError::Failed {
                        reason: "builder dropped without a result".to_string(),
                    }));
                }
            }
        }
        Err(Error::Internal {
            message: "brainstorm join state".to_string(),
        })
    }

    /// Runs retrieval, generation, and persistence for one build.
    async fn build(
        &self,
        task: &Task,
        action: BrainstormAction,
        cancel: &CancellationToken,
    ) -> Result<BrainstormResult> {
        // retrieving
        let detail = self.doc_store.task_detail(&task.id).await?;
        let retrieval = self
            .retriever
            .search_task(
                task,
                detail.as_ref(),
                &[],
                RETRIEVE_K,
                &SearchOptions::default(),
                cancel,
            )
            .await;
        let (context, retrieval_ok) = match retrieval {
            Ok(results) => (top_context(results), true),
            Err(e) => {
                warn!(task = %task.id, error = %e, "brainstorm retrieval failed");
                (Vec::new(), false)
            }
        };

        // generating
        let generated = self.generate_with_retry(task, &context).await;
        let sections = match generated {
            Ok(sections) => sections,
            Err(e) if retrieval_ok => {
                warn!(task = %task.id, error = %e, "generation failed, emitting template fallback");
                template_fallback(task)
            }
            Err(e) => {
                return Err(Error::Brainstorm(BrainstormError::Failed {
                    reason: format!("retrieval and generation both failed: {e}"),
                }));
            }
        };

        // persisting
        let version = persist::load_existing(&self.dir, &task.id)
            .map_or(1, |(_, record)| record.version + 1);
        let record = Brainstorm {
            task_id: task.id.clone(),
            kind: action.kind(),
            generated_at: Utc::now(),
            sections: assemble_sections(sections, &context),
            rag_context: context.iter().map(|r| snippet(&r.body)).collect(),
            sources: context.iter().map(|r| r.id.clone()).collect(),
            version,
        };
        let content = persist::render(task, &record);
        persist::write_atomic(&self.dir, &task.id, &content).map_err(Error::Brainstorm)?;

        debug!(task = %task.id, version, "brainstorm persisted");
        Ok(BrainstormResult {
            task_id: task.id.clone(),
            content,
            kind: record.kind,
            source: BrainstormSource::Generated,
            newly_generated: true,
            version,
        })
    }

    /// Calls the LLM under the bounded backoff schedule.
    async fn generate_with_retry(
        &self,
        task: &Task,
        context: &[Retrieved],
    ) -> std::result::Result<GeneratedSections, String> {
        let context_text: String = context
            .iter()
            .enumerate()
            .map(|(i, r)| format!("[{}] ({}) {}", i + 1, r.id, snippet(&r.body)))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Task: {}\nDescription: {}\n\nContext:\n{}",
            task.title,
            task.description.as_deref().unwrap_or("(none)"),
            if context_text.is_empty() {
                "(no context retrieved)"
            } else {
                &context_text
            }
        );
        let request = oneshot_request(&self.model, GENERATION_PROMPT, &user, true);

        let mut last_error = String::new();
        for attempt in 1..=MAX_LLM_ATTEMPTS {
            match self.provider.chat(&request).await {
                Ok(response) => {
                    match serde_json::from_str::<GeneratedSections>(response.content.trim()) {
                        Ok(sections) => return Ok(sections),
                        Err(e) => last_error = format!("bad generation envelope: {e}"),
                    }
                }
                Err(e) => last_error = e.to_string(),
            }
            if attempt < MAX_LLM_ATTEMPTS {
                let delay = Duration::from_secs(1 << (attempt - 1).min(3));
                tokio::time::sleep(delay.min(Duration::from_secs(10))).await;
            }
        }
        Err(last_error)
    }
}

/// Keeps the top context snippets after rerank and dedup.
fn top_context(mut results: Vec<Retrieved>) -> Vec<Retrieved> {
    results.truncate(RAG_CONTEXT_LIMIT);
    results
}

/// First ~200 characters of a body, cut at a word boundary.
fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.replace('\n', " ");
    }
    let mut cut = MAX;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &body[..cut];
    let head = head.rfind(' ').map_or(head, |pos| &head[..pos]);
    format!("{}…", head.replace('\n', " "))
}

/// Fixed-template sections when the LLM is unavailable.
fn template_fallback(task: &Task) -> GeneratedSections {
    let banner = "> **LLM unavailable**: template fallback; retrieved context below.\n\n";
    GeneratedSections {
        overview: format!(
            "{banner}{}",
            task.description
                .clone()
                .unwrap_or_else(|| task.title.clone())
        ),
        key_considerations: "_LLM unavailable._".to_string(),
        potential_approaches: "_LLM unavailable._".to_string(),
        risks: "_LLM unavailable._".to_string(),
        recommendations: "_LLM unavailable._".to_string(),
    }
}

/// Orders the generated sections and appends the context sections.
fn assemble_sections(
    generated: GeneratedSections,
    context: &[Retrieved],
) -> Vec<(String, String)> {
    let rag_body = if context.is_empty() {
        String::new()
    } else {
        context
            .iter()
            .map(|r| format!("- {}", snippet(&r.body)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let sources_body = context
        .iter()
        .map(|r| format!("- {}", r.id))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        ("Overview".to_string(), generated.overview),
        ("Key Considerations".to_string(), generated.key_considerations),
        ("Potential Approaches".to_string(), generated.potential_approaches),
        ("Risks".to_string(), generated.risks),
        ("Recommendations".to_string(), generated.recommendations),
        ("RAG Context Used".to_string(), rag_body),
        ("Sources".to_string(), sources_body),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::core::{Chunk, Document, SourceKind};
    use crate::docstore::MemoryDocumentStore;
    use crate::embedding::HashEmbedder;
    use crate::llm::ScriptedProvider;
    use crate::store::{SqliteVectorStore, VectorStore};

    const GOOD_ENVELOPE: &str = r#"{"overview":"An overview.","key_considerations":"- one","potential_approaches":"- approach","risks":"- risk","recommendations":"- do it"}"#;

    async fn engine_with(
        provider: ScriptedProvider,
        dir: &std::path::Path,
    ) -> BrainstormEngine {
        let settings = Settings::default();
        let embedder: Arc<dyn crate::embedding::Embedder> = Arc::new(HashEmbedder::new(64));
        let cache = Arc::new(QueryCache::with_defaults());
        let store = SqliteVectorStore::in_memory(Arc::clone(&embedder)).unwrap();

        let doc = Document::new("d1", SourceKind::Knowledge, "kb.md", "KB", "");
        let info = doc.info();
        store
            .upsert(
                "knowledge",
                vec![Chunk::new(
                    &info,
                    0,
                    1,
                    "notes about the ingestion pipeline rollout".to_string(),
                )],
            )
            .await
            .unwrap();

        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(store) as Arc<dyn VectorStore>,
            embedder,
            cache,
            &settings,
        ));
        let doc_store = Arc::new(
            MemoryDocumentStore::new()
                .with_tasks([Task::new("T1", "Migrate the ingestion pipeline")]),
        );

        BrainstormEngine::new(
            doc_store,
            retriever,
            Arc::new(provider),
            &settings,
            dir.to_path_buf(),
        )
    }

    #[test]
    fn test_parse_request_forms() {
        let (action, selector) = parse_request("brainstorm task id T1").unwrap();
        assert_eq!(action, BrainstormAction::New);
        assert_eq!(selector, TaskSelector::ById("T1".to_string()));

        let (action, selector) = parse_request("brainstorm improve task id T1").unwrap();
        assert_eq!(action, BrainstormAction::Improve);
        assert_eq!(selector, TaskSelector::ById("T1".to_string()));

        let (action, selector) = parse_request("brainstorm update task write the spec").unwrap();
        assert_eq!(action, BrainstormAction::Update);
        assert_eq!(
            selector,
            TaskSelector::ByTitle("write the spec".to_string())
        );

        let (action, selector) = parse_request("brainstorm replace migration work").unwrap();
        assert_eq!(action, BrainstormAction::Replace);
        assert_eq!(selector, TaskSelector::ByTitle("migration work".to_string()));

        assert!(parse_request("brainstorm").is_err());
        assert!(parse_request("brainstorm task id").is_err());
    }

    #[test]
    fn test_parse_request_preserves_id_case() {
        let (_, selector) = parse_request("brainstorm task id TaskAbc1").unwrap();
        assert_eq!(selector, TaskSelector::ById("TaskAbc1".to_string()));
    }

    #[tokio::test]
    async fn test_full_build() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(ScriptedProvider::new([GOOD_ENVELOPE]), dir.path()).await;

        let result = engine
            .process("brainstorm task id T1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.source, BrainstormSource::Generated);
        assert!(result.newly_generated);
        assert_eq!(result.version, 1);
        assert!(result.content.contains("## Brainstorm: Migrate the ingestion pipeline (T1)"));
        assert!(result.content.contains("### RAG Context Used"));
        assert!(result.content.contains("ingestion pipeline rollout"));

        // Both artifacts exist
        assert!(dir.path().join("T1_brainstorm.md").exists());
        assert!(dir.path().join(COLLECTIVE_FILE).exists());
    }

    #[tokio::test]
    async fn test_new_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        // Script holds exactly one response; a second build would fail
        let engine = engine_with(ScriptedProvider::new([GOOD_ENVELOPE]), dir.path()).await;
        let cancel = CancellationToken::new();

        let first = engine.process("brainstorm task id T1", &cancel).await.unwrap();
        let second = engine.process("brainstorm task id T1", &cancel).await.unwrap();

        assert_eq!(second.source, BrainstormSource::Existing);
        assert!(!second.newly_generated);
        // Byte-identical content
        assert_eq!(first.content, second.content);
    }

    #[tokio::test]
    async fn test_task_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(ScriptedProvider::new([GOOD_ENVELOPE]), dir.path()).await;

        let err = engine
            .process("brainstorm task id missing-1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Brainstorm(BrainstormError::TaskNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_failure_template_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(ScriptedProvider::unavailable(), dir.path()).await;

        let result = engine
            .process("brainstorm task id T1", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.content.contains("LLM unavailable"));
        assert!(result.newly_generated);
        // Retrieval still contributed context
        assert!(result.content.contains("ingestion pipeline rollout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            ScriptedProvider::new([GOOD_ENVELOPE]).failing_first(2),
            dir.path(),
        )
        .await;

        let result = engine
            .process("brainstorm task id T1", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.content.contains("LLM unavailable"));
        assert!(result.content.contains("An overview."));
    }

    #[tokio::test]
    async fn test_improve_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            ScriptedProvider::new([GOOD_ENVELOPE, GOOD_ENVELOPE]),
            dir.path(),
        )
        .await;
        let cancel = CancellationToken::new();

        let first = engine.process("brainstorm task id T1", &cancel).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.kind, BrainstormKind::Initial);

        let second = engine
            .process("brainstorm improve task id T1", &cancel)
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.kind, BrainstormKind::Improved);
        assert!(second.newly_generated);
    }

    /// Provider that stalls before answering, widening the in-flight
    /// window for concurrency tests.
    struct SlowProvider {
        delay: Duration,
        response: String,
    }

    #[async_trait::async_trait]
    impl crate::llm::LlmProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn chat(
            &self,
            _request: &crate::llm::ChatRequest,
        ) -> std::result::Result<crate::llm::ChatResponse, crate::error::ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok(crate::llm::ChatResponse {
                content: self.response.clone(),
                usage: crate::llm::TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
            })
        }
        async fn chat_stream(
            &self,
            _request: &crate::llm::ChatRequest,
        ) -> std::result::Result<crate::llm::TokenStream, crate::error::ProviderError> {
            Err(crate::error::ProviderError::Unavailable {
                reason: "no streaming".to_string(),
                attempts: 1,
            })
        }
    }

    async fn slow_engine(dir: &std::path::Path) -> Arc<BrainstormEngine> {
        let settings = Settings::default();
        let embedder: Arc<dyn crate::embedding::Embedder> = Arc::new(HashEmbedder::new(64));
        let cache = Arc::new(QueryCache::with_defaults());
        let store = SqliteVectorStore::in_memory(Arc::clone(&embedder)).unwrap();
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(store) as Arc<dyn VectorStore>,
            embedder,
            cache,
            &settings,
        ));
        let doc_store = Arc::new(
            MemoryDocumentStore::new().with_tasks([Task::new("T1", "Slow build target")]),
        );
        Arc::new(BrainstormEngine::new(
            doc_store,
            retriever,
            Arc::new(SlowProvider {
                delay: Duration::from_millis(300),
                response: GOOD_ENVELOPE.to_string(),
            }),
            &settings,
            dir.to_path_buf(),
        ))
    }

    #[tokio::test]
    async fn test_different_action_rejected_while_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let engine = slow_engine(dir.path()).await;

        let builder = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .process("brainstorm improve task id T1", &CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = engine
            .process("brainstorm update task id T1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Brainstorm(BrainstormError::BusyOnTask { .. })
        ));

        let built = builder.await.unwrap().unwrap();
        assert!(built.newly_generated);
    }

    #[tokio::test]
    async fn test_same_action_joins_running_build() {
        let dir = tempfile::tempdir().unwrap();
        let engine = slow_engine(dir.path()).await;

        let builder = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .process("brainstorm improve task id T1", &CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Same action: joins and receives the builder's result
        let joined = engine
            .process("brainstorm improve task id T1", &CancellationToken::new())
            .await
            .unwrap();
        let built = builder.await.unwrap().unwrap();
        assert_eq!(joined.content, built.content);
        assert_eq!(joined.version, built.version);
    }

    #[tokio::test]
    async fn test_select_by_title() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(ScriptedProvider::new([GOOD_ENVELOPE]), dir.path()).await;

        let result = engine
            .process(
                "brainstorm task migrate the ingestion pipeline",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.task_id, "T1");
    }
}
