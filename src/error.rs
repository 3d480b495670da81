//! Error types for ensemble-rs operations.
//!
//! This module provides a comprehensive error hierarchy using `thiserror`
//! covering storage, retrieval, planning, brainstorming, and agent routing.

use thiserror::Error;

/// Result type alias for ensemble operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for ensemble operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Vector or document store errors.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Knowledge-graph errors.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Embedding or LLM provider errors.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Chunking-related errors (text processing).
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    /// Retrieval pipeline errors.
    #[error("retrieval error: {0}")]
    Retrieve(#[from] RetrieveError),

    /// Day-planning errors.
    #[error("planning error: {0}")]
    Plan(#[from] PlanError),

    /// Brainstorm pipeline errors.
    #[error("brainstorm error: {0}")]
    Brainstorm(#[from] BrainstormError),

    /// Agent routing and session errors.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Malformed user input (query, date, identifier).
    #[error("invalid input: {message}")]
    Input {
        /// Description of what was malformed.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Unexpected invariant violation. Fatal to the current operation;
    /// the session survives.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

/// Store-specific errors for the vector and document stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Backing engine unreachable.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Why the store could not be reached.
        reason: String,
    },

    /// Unknown collection name.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// Collection name that was not recognized.
        name: String,
    },

    /// Document not found by id.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// Document id that was not found.
        id: String,
    },

    /// Task not found by id or title.
    #[error("task not found: {selector}")]
    TaskNotFound {
        /// Identifier or title used in the lookup.
        selector: String,
    },

    /// A task with this id already exists.
    #[error("duplicate task id: {id}")]
    DuplicateTask {
        /// The conflicting task id.
        id: String,
    },

    /// A batch upsert partially failed. Succeeded rows remain durable.
    #[error("upsert failed for {failed} of {total} rows")]
    PartialUpsert {
        /// Number of rows that failed.
        failed: usize,
        /// Total rows in the batch.
        total: usize,
        /// Ids of the failing rows.
        failing_ids: Vec<String>,
    },

    /// Record failed schema validation on load.
    #[error("schema error in {source_name}: {reason}")]
    Schema {
        /// Which record source failed validation.
        source_name: String,
        /// What was wrong.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Graph-store errors.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Database connection or query error.
    #[error("graph database error: {0}")]
    Database(String),

    /// Entity not found by uuid.
    #[error("entity not found: {uuid}")]
    EntityNotFound {
        /// Entity uuid that was not found.
        uuid: String,
    },

    /// A required vector index or property is missing.
    ///
    /// Callers recover via substring fallback; surfaced only by
    /// `health_check` and diagnostics.
    #[error("missing vector index: {index}")]
    MissingIndex {
        /// Name of the absent index.
        index: String,
    },

    /// Traversal depth exceeded the bound.
    #[error("traversal depth {requested} exceeds maximum {max}")]
    DepthExceeded {
        /// Requested depth.
        requested: usize,
        /// Maximum allowed depth.
        max: usize,
    },

    /// Episode extraction produced unusable output.
    #[error("extraction failed: {0}")]
    Extraction(String),
}

/// Provider errors for embedding and LLM back-ends.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider unreachable after the bounded retry schedule.
    #[error("provider unavailable: {reason}")]
    Unavailable {
        /// Last failure observed.
        reason: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Provider returned a malformed response.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// A deadline passed while waiting on the provider.
    #[error("provider timeout after {seconds}s")]
    Timeout {
        /// Deadline that elapsed, in seconds.
        seconds: u64,
    },

    /// Embedding dimensions did not match the collection.
    #[error("dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch {
        /// Dimensions produced.
        got: usize,
        /// Dimensions required.
        expected: usize,
    },
}

/// Chunking-specific errors for text processing.
#[derive(Error, Debug)]
pub enum ChunkingError {
    /// Invalid chunk configuration.
    #[error("invalid chunk configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Overlap exceeds chunk size.
    #[error("overlap {overlap} must be less than chunk size {size}")]
    OverlapTooLarge {
        /// Overlap size in characters.
        overlap: usize,
        /// Chunk size in characters.
        size: usize,
    },

    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(String),
}

/// Retrieval pipeline errors.
#[derive(Error, Debug)]
pub enum RetrieveError {
    /// The caller cancelled the search; partial results are discarded.
    #[error("search cancelled")]
    Cancelled,

    /// Every variant timed out or failed; no candidates were gathered.
    #[error("no candidates: {reason}")]
    NoCandidates {
        /// Why nothing was retrieved.
        reason: String,
    },

    /// A search worker panicked or was aborted.
    #[error("search task failed: {0}")]
    TaskFailed(String),
}

/// Day-planning errors.
#[derive(Error, Debug)]
pub enum PlanError {
    /// A record source failed schema validation; no partial plan.
    #[error("invalid {source_name}: {reason}")]
    InvalidSource {
        /// Which source failed.
        source_name: String,
        /// What was wrong.
        reason: String,
    },

    /// The target date string could not be resolved.
    #[error("unresolvable date: {input}")]
    UnresolvableDate {
        /// The raw date expression.
        input: String,
    },

    /// Work hours are inverted (end before start).
    #[error("work hours end {end} precedes start {start}")]
    InvertedWorkHours {
        /// Configured start.
        start: String,
        /// Configured end.
        end: String,
    },

    /// A deadline passed while planning. Fatal: no partial plan.
    #[error("planning timed out after {seconds}s")]
    Timeout {
        /// Deadline that elapsed, in seconds.
        seconds: u64,
    },
}

/// Brainstorm pipeline errors.
#[derive(Error, Debug)]
pub enum BrainstormError {
    /// The request could not be parsed into an action and selector.
    #[error("unparseable brainstorm request: {input}")]
    Unparseable {
        /// The raw request text.
        input: String,
    },

    /// The referenced task does not exist.
    #[error("task not found: {selector}")]
    TaskNotFound {
        /// Identifier or title used in the lookup.
        selector: String,
    },

    /// Another build for this task is in flight with a different action.
    #[error("task {task_id} busy with action {in_flight}")]
    BusyOnTask {
        /// Task with the running build.
        task_id: String,
        /// Action of the running build.
        in_flight: String,
    },

    /// Both retrieval and generation failed; nothing to persist.
    #[error("brainstorm failed: {reason}")]
    Failed {
        /// Why the build produced nothing.
        reason: String,
    },

    /// Persisting the artifacts failed; neither file is observable.
    #[error("persistence failed: {reason}")]
    Persist {
        /// Why the write failed.
        reason: String,
    },
}

/// Agent routing and session errors.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Unknown tool requested by an agent.
    #[error("unknown tool: {name}")]
    UnknownTool {
        /// Tool name not present in the dispatch table.
        name: String,
    },

    /// Tool arguments failed schema validation.
    #[error("invalid tool arguments for {tool}: {reason}")]
    InvalidArguments {
        /// Tool whose arguments were rejected.
        tool: String,
        /// What was wrong.
        reason: String,
    },

    /// The session's inbound channel closed mid-query.
    #[error("session closed")]
    SessionClosed,

    /// The query was cancelled by the client.
    #[error("query cancelled")]
    Cancelled,
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Store(StoreError::Unavailable {
            reason: err.to_string(),
        })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for GraphError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<regex::Error> for ChunkingError {
    fn from(err: regex::Error) -> Self {
        Self::Regex(err.to_string())
    }
}

impl Error {
    /// Returns the error kind label used in error fragments.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::Graph(_) => "graph",
            Self::Provider(_) => "provider",
            Self::Chunking(_) => "chunking",
            Self::Retrieve(_) => "retrieve",
            Self::Plan(_) => "plan",
            Self::Brainstorm(_) => "brainstorm",
            Self::Agent(_) => "agent",
            Self::Input { .. } => "input",
            Self::Config { .. } => "config",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether the error is a not-found condition surfaced with an id.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store(
                StoreError::TaskNotFound { .. } | StoreError::DocumentNotFound { .. }
            ) | Self::Graph(GraphError::EntityNotFound { .. })
                | Self::Brainstorm(BrainstormError::TaskNotFound { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Internal {
            message: "invariant broken".to_string(),
        };
        assert_eq!(err.to_string(), "internal error: invariant broken");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::TaskNotFound {
            selector: "T42".to_string(),
        };
        assert_eq!(err.to_string(), "task not found: T42");

        let err = StoreError::DuplicateTask {
            id: "T1".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate task id: T1");

        let err = StoreError::PartialUpsert {
            failed: 2,
            total: 10,
            failing_ids: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("2 of 10"));
    }

    #[test]
    fn test_graph_error_display() {
        let err = GraphError::MissingIndex {
            index: "entity_name_embedding_index".to_string(),
        };
        assert!(err.to_string().contains("entity_name_embedding_index"));

        let err = GraphError::DepthExceeded {
            requested: 5,
            max: 3,
        };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Unavailable {
            reason: "connection refused".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("connection refused"));

        let err = ProviderError::DimensionMismatch {
            got: 384,
            expected: 1536,
        };
        assert!(err.to_string().contains("1536"));
    }

    #[test]
    fn test_chunking_error_display() {
        let err = ChunkingError::OverlapTooLarge {
            overlap: 200,
            size: 100,
        };
        assert_eq!(
            err.to_string(),
            "overlap 200 must be less than chunk size 100"
        );
    }

    #[test]
    fn test_brainstorm_error_display() {
        let err = BrainstormError::BusyOnTask {
            task_id: "T1".to_string(),
            in_flight: "improve".to_string(),
        };
        assert_eq!(err.to_string(), "task T1 busy with action improve");
    }

    #[test]
    fn test_error_from_store() {
        let err: Error = StoreError::UnknownCollection {
            name: "bogus".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(err.kind(), "store");
    }

    #[test]
    fn test_error_from_rusqlite() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Store(StoreError::Database(_))));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Store(StoreError::Unavailable { .. })));
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(Error::Retrieve(RetrieveError::Cancelled).kind(), "retrieve");
        assert_eq!(
            Error::Plan(PlanError::UnresolvableDate {
                input: "someday".to_string(),
            })
            .kind(),
            "plan"
        );
        assert_eq!(
            Error::Input {
                message: "bad".to_string(),
            }
            .kind(),
            "input"
        );
    }

    #[test]
    fn test_is_not_found() {
        let err = Error::Store(StoreError::TaskNotFound {
            selector: "T9".to_string(),
        });
        assert!(err.is_not_found());

        let err = Error::Store(StoreError::Database("boom".to_string()));
        assert!(!err.is_not_found());

        let err = Error::Brainstorm(BrainstormError::TaskNotFound {
            selector: "spec".to_string(),
        });
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_serde_json_error_to_store_error() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("nope").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::UnknownTool {
            name: "frobnicate".to_string(),
        };
        assert_eq!(err.to_string(), "unknown tool: frobnicate");

        let err = AgentError::InvalidArguments {
            tool: "search".to_string(),
            reason: "missing query".to_string(),
        };
        assert!(err.to_string().contains("search"));
    }
}
