//! Runtime configuration with environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment
//! variables → defaults, once at startup. The resulting [`Settings`] value
//! is immutable and threaded through the call stack inside
//! [`crate::Services`]; no component reads the environment after startup.

use std::time::Duration;

use chrono::NaiveTime;

use crate::error::Error;
use crate::rerank::RerankWeights;

/// Default LLM model identifier.
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
/// Default embedding model identifier.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Default vector store location (embedded database path).
const DEFAULT_VECTOR_STORE_URL: &str = "ensemble.db";
/// Default graph store location (embedded database path).
const DEFAULT_GRAPH_URI: &str = "ensemble-graph.db";
/// Default start of the working day.
const DEFAULT_WORK_HOURS_START: &str = "09:00";
/// Default end of the working day.
const DEFAULT_WORK_HOURS_END: &str = "17:00";
/// Default query cache capacity (entries).
const DEFAULT_CACHE_SIZE: usize = 200;
/// Default query cache TTL in seconds.
const DEFAULT_CACHE_TTL_SECONDS: u64 = 600;
/// Default RRF k parameter.
const DEFAULT_RRF_K: u32 = 60;
/// Default maximum brainstorm query variants.
const DEFAULT_MAX_BRAINSTORM_QUERIES: usize = 5;
/// Default retrieval fan-out concurrency.
const DEFAULT_MAX_RETRIEVAL_CONCURRENCY: usize = 8;

/// Immutable runtime settings.
///
/// Loaded once at startup; every field has a working default so the system
/// runs with an empty environment (embedded stores, deterministic
/// fallbacks).
#[derive(Debug, Clone)]
pub struct Settings {
    /// LLM model identifier passed to the provider.
    pub llm_model: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Vector store location: path of the embedded database.
    pub vector_store_url: String,
    /// Optional credential for a remote vector back-end.
    pub vector_store_key: Option<String>,
    /// Graph store location: path of the embedded database.
    pub graph_uri: String,
    /// Optional graph credential (user).
    pub graph_user: Option<String>,
    /// Optional graph credential (password).
    pub graph_password: Option<String>,
    /// Start of the working day, local time.
    pub work_hours_start: NaiveTime,
    /// End of the working day, local time.
    pub work_hours_end: NaiveTime,
    /// Query cache capacity in entries.
    pub cache_size: usize,
    /// Query cache entry time-to-live.
    pub cache_ttl: Duration,
    /// RRF k parameter for rank fusion.
    pub rrf_k: u32,
    /// Reranker weight vector.
    pub rerank_weights: RerankWeights,
    /// Maximum query variants generated for a brainstorm retrieval.
    pub max_brainstorm_queries: usize,
    /// Maximum concurrent retrieval workers.
    pub max_retrieval_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            vector_store_url: DEFAULT_VECTOR_STORE_URL.to_string(),
            vector_store_key: None,
            graph_uri: DEFAULT_GRAPH_URI.to_string(),
            graph_user: None,
            graph_password: None,
            work_hours_start: default_time(DEFAULT_WORK_HOURS_START),
            work_hours_end: default_time(DEFAULT_WORK_HOURS_END),
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            rrf_k: DEFAULT_RRF_K,
            rerank_weights: RerankWeights::default(),
            max_brainstorm_queries: DEFAULT_MAX_BRAINSTORM_QUERIES,
            max_retrieval_concurrency: DEFAULT_MAX_RETRIEVAL_CONCURRENCY,
        }
    }
}

/// Parses a compile-time-known `HH:MM` literal.
fn default_time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap_or_default()
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults.
    ///
    /// Recognized variables: `LLM_MODEL`, `EMBEDDING_MODEL`,
    /// `VECTOR_STORE_URL`, `VECTOR_STORE_KEY`, `GRAPH_URI`, `GRAPH_USER`,
    /// `GRAPH_PASSWORD`, `WORK_HOURS_START`, `WORK_HOURS_END`,
    /// `CACHE_SIZE`, `CACHE_TTL_SECONDS`, `RRF_K`, `RERANK_WEIGHTS`,
    /// `MAX_BRAINSTORM_QUERIES`, `MAX_RETRIEVAL_CONCURRENCY`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable is present but
    /// unparseable, or when the resolved settings fail validation.
    pub fn from_env() -> crate::Result<Self> {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("LLM_MODEL") {
            settings.llm_model = v;
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            settings.embedding_model = v;
        }
        if let Ok(v) = std::env::var("VECTOR_STORE_URL") {
            settings.vector_store_url = v;
        }
        if let Ok(v) = std::env::var("VECTOR_STORE_KEY") {
            settings.vector_store_key = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPH_URI") {
            settings.graph_uri = v;
        }
        if let Ok(v) = std::env::var("GRAPH_USER") {
            settings.graph_user = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPH_PASSWORD") {
            settings.graph_password = Some(v);
        }
        if let Ok(v) = std::env::var("WORK_HOURS_START") {
            settings.work_hours_start = parse_time("WORK_HOURS_START", &v)?;
        }
        if let Ok(v) = std::env::var("WORK_HOURS_END") {
            settings.work_hours_end = parse_time("WORK_HOURS_END", &v)?;
        }
        if let Ok(v) = std::env::var("CACHE_SIZE") {
            settings.cache_size = parse_num("CACHE_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("CACHE_TTL_SECONDS") {
            settings.cache_ttl = Duration::from_secs(parse_num("CACHE_TTL_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("RRF_K") {
            settings.rrf_k = parse_num("RRF_K", &v)?;
        }
        if let Ok(v) = std::env::var("RERANK_WEIGHTS") {
            settings.rerank_weights = RerankWeights::parse(&v).map_err(|reason| Error::Config {
                message: format!("RERANK_WEIGHTS: {reason}"),
            })?;
        }
        if let Ok(v) = std::env::var("MAX_BRAINSTORM_QUERIES") {
            settings.max_brainstorm_queries = parse_num("MAX_BRAINSTORM_QUERIES", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_RETRIEVAL_CONCURRENCY") {
            settings.max_retrieval_concurrency = parse_num("MAX_RETRIEVAL_CONCURRENCY", &v)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validates invariants across fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on zero capacities or concurrency.
    /// Equal work-hours bounds are permitted: they yield an empty plan,
    /// not an error.
    pub fn validate(&self) -> crate::Result<()> {
        if self.cache_size == 0 {
            return Err(Error::Config {
                message: "CACHE_SIZE must be > 0".to_string(),
            });
        }
        if self.max_retrieval_concurrency == 0 {
            return Err(Error::Config {
                message: "MAX_RETRIEVAL_CONCURRENCY must be > 0".to_string(),
            });
        }
        if self.max_brainstorm_queries == 0 || self.max_brainstorm_queries > 5 {
            return Err(Error::Config {
                message: "MAX_BRAINSTORM_QUERIES must be in 1..=5".to_string(),
            });
        }
        if self.work_hours_end < self.work_hours_start {
            return Err(Error::Config {
                message: format!(
                    "WORK_HOURS_END {} precedes WORK_HOURS_START {}",
                    self.work_hours_end, self.work_hours_start
                ),
            });
        }
        Ok(())
    }
}

/// Parses an `HH:MM` time value from the environment.
fn parse_time(key: &str, value: &str) -> crate::Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| Error::Config {
        message: format!("{key}: expected HH:MM, got {value:?} ({e})"),
    })
}

/// Parses a numeric value from the environment.
fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> crate::Result<T> {
    value.parse().map_err(|_| Error::Config {
        message: format!("{key}: invalid number {value:?}"),
    })
}
