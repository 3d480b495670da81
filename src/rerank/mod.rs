//! Multi-signal reranking.
//!
//! Recomputes candidate order from a weighted blend of the base retrieval
//! score, metadata-derived signals (recency, source quality, verification),
//! an optional cross-encoder score, and an optional LLM-as-judge score.
//! With the optional scorers absent the reranker is fully deterministic.

mod rrf;

pub use rrf::{DEFAULT_RRF_K, reciprocal_rank_fusion, weighted_rrf};

use chrono::{DateTime, Utc};

use crate::core::ChunkMeta;

/// Recency half-life in days for the metadata score.
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;
/// Bonus for human-verified rows.
const VERIFIED_BONUS: f64 = 0.1;
/// Source-quality prior when the source kind is unknown.
const UNKNOWN_SOURCE_QUALITY: f64 = 0.5;

/// Weights for the four scoring signals. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    /// Weight of the normalized base retrieval score.
    pub base: f64,
    /// Weight of the metadata-derived score.
    pub meta: f64,
    /// Weight of the cross-encoder score.
    pub cross: f64,
    /// Weight of the LLM-as-judge score.
    pub llm: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            base: 0.5,
            meta: 0.2,
            cross: 0.3,
            llm: 0.0,
        }
    }
}

impl RerankWeights {
    /// Parses a `base,meta,cross,llm` weight string.
    ///
    /// # Errors
    ///
    /// Returns a description when the string has the wrong arity, a
    /// non-numeric component, or does not sum to 1.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected 4 comma-separated weights, got {}", parts.len()));
        }
        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("invalid weight {part:?}"))?;
        }
        let weights = Self {
            base: values[0],
            meta: values[1],
            cross: values[2],
            llm: values[3],
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Checks that the weights are non-negative and sum to 1.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let parts = [self.base, self.meta, self.cross, self.llm];
        if parts.iter().any(|w| *w < 0.0) {
            return Err("weights must be non-negative".to_string());
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("weights must sum to 1, got {sum}"));
        }
        Ok(())
    }
}

/// Optional second-stage relevance scorer (cross-encoder or LLM judge).
///
/// Implementations score a (query, passage) pair into [0, 1]. The
/// reranker skips the signal entirely when no scorer is installed.
pub trait RelevanceScorer: Send + Sync {
    /// Scores the passage's relevance to the query.
    fn score(&self, query: &str, passage: &str) -> f64;
}

/// A candidate entering the reranker.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    /// Chunk id.
    pub id: String,
    /// Score from the retrieval stage.
    pub base_score: f64,
    /// Tagged metadata of the chunk.
    pub meta: ChunkMeta,
    /// Raw chunk body.
    pub body: String,
}

/// A reranked candidate with its blended score.
#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    /// The input candidate.
    pub candidate: RerankCandidate,
    /// Final blended score.
    pub score: f64,
}

/// Multi-signal reranker.
///
/// Deterministic given its inputs when no optional scorers are
/// installed; LLM-assisted modes may vary across runs.
pub struct Reranker {
    weights: RerankWeights,
    cross: Option<Box<dyn RelevanceScorer>>,
    llm_judge: Option<Box<dyn RelevanceScorer>>,
}

impl Reranker {
    /// Creates a reranker with the given weights and no optional scorers.
    #[must_use]
    pub const fn new(weights: RerankWeights) -> Self {
        Self {
            weights,
            cross: None,
            llm_judge: None,
        }
    }

    /// Installs a cross-encoder scorer.
    #[must_use]
    pub fn with_cross_encoder(mut self, scorer: Box<dyn RelevanceScorer>) -> Self {
        self.cross = Some(scorer);
        self
    }

    /// Installs an LLM-as-judge scorer. Off by default.
    #[must_use]
    pub fn with_llm_judge(mut self, scorer: Box<dyn RelevanceScorer>) -> Self {
        self.llm_judge = Some(scorer);
        self
    }

    /// Reranks candidates by the blended score.
    ///
    /// Output is sorted by score descending; ties break by `indexed_at`
    /// (younger first), then lexicographic id.
    #[must_use]
    pub fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>, now: DateTime<Utc>) -> Vec<RerankedCandidate> {
        let mut scored: Vec<RerankedCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let base = clamp01(candidate.base_score);
                let meta = metadata_score(&candidate.meta, now);
                let cross = self
                    .cross
                    .as_ref()
                    .map_or(0.0, |s| clamp01(s.score(query, &candidate.body)));
                let llm = self
                    .llm_judge
                    .as_ref()
                    .map_or(0.0, |s| clamp01(s.score(query, &candidate.body)));

                let score = self.weights.base * base
                    + self.weights.meta * meta
                    + self.weights.cross * cross
                    + self.weights.llm * llm;

                RerankedCandidate { candidate, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.candidate
                        .meta
                        .indexed_at
                        .cmp(&a.candidate.meta.indexed_at)
                })
                .then_with(|| a.candidate.id.cmp(&b.candidate.id))
        });
        scored
    }
}

/// Metadata score: recency decay + source-quality prior + verification
/// bonus, with the sum clamped to [0, 1].
#[must_use]
pub fn metadata_score(meta: &ChunkMeta, now: DateTime<Utc>) -> f64 {
    let recency = meta.indexed_at.map_or(0.0, |indexed| {
        let age_days = (now - indexed).num_seconds() as f64 / 86_400.0;
        if age_days <= 0.0 {
            1.0
        } else {
            0.5f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
        }
    });

    let quality = meta
        .source_kind
        .map_or(UNKNOWN_SOURCE_QUALITY, |kind| kind.quality());

    let bonus = if meta.verified { VERIFIED_BONUS } else { 0.0 };

    clamp01(recency + quality + bonus)
}

/// Clamps a score to [0, 1].
#[must_use]
pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
