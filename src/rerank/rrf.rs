//! Reciprocal Rank Fusion (RRF).
//!
//! Combines multiple ranked lists into a single fused ranking.
//! Based on: Cormack, Clarke, Buettcher (2009) - "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods"

use std::collections::HashMap;

/// Default k parameter from the original paper.
pub const DEFAULT_RRF_K: u32 = 60;

/// Performs Reciprocal Rank Fusion on multiple ranked lists of ids.
///
/// The RRF score for each item is `score(d) = Σ 1 / (k + rank(d))` over
/// every list containing it (ranks 1-based). Returns `(id, score)` pairs
/// sorted by score descending, ties broken by id ascending so the fusion
/// is deterministic.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn reciprocal_rank_fusion(ranked_lists: &[&[String]], k: u32) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank, item) in list.iter().enumerate() {
            let rrf_score = 1.0 / f64::from(k + (rank as u32) + 1);
            *scores.entry(item.as_str()).or_insert(0.0) += rrf_score;
        }
    }

    sort_fused(scores)
}

/// Performs weighted RRF where each list carries a weight.
///
/// Used for vector/keyword hybrid fusion where the dense list gets more
/// influence than the lexical one.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn weighted_rrf(ranked_lists: &[(&[String], f64)], k: u32) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();

    for (list, weight) in ranked_lists {
        for (rank, item) in list.iter().enumerate() {
            let rrf_score = weight / f64::from(k + (rank as u32) + 1);
            *scores.entry(item.as_str()).or_insert(0.0) += rrf_score;
        }
    }

    sort_fused(scores)
}

/// Sorts fused scores descending with deterministic id tie-break.
fn sort_fused(scores: HashMap<&str, f64>) -> Vec<(String, f64)> {
    let mut results: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_rrf_single_list() {
        let list = ids(&["a", "b", "c"]);
        let results = reciprocal_rank_fusion(&[&list], DEFAULT_RRF_K);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 > results[1].1);
        assert!(results[1].1 > results[2].1);
    }

    #[test]
    fn test_rrf_score_formula() {
        let list = ids(&["only"]);
        let results = reciprocal_rank_fusion(&[&list], 60);
        let expected = 1.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_combined_score() {
        let list1 = ids(&["x"]);
        let list2 = ids(&["x"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], 60);
        let expected = 2.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_agreement_wins() {
        // An item ranked well in both lists beats items in only one
        let list1 = ids(&["shared", "solo1"]);
        let list2 = ids(&["shared", "solo2"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], 60);
        assert_eq!(results[0].0, "shared");
    }

    #[test]
    fn test_rrf_disjoint_ties_break_by_id() {
        let list1 = ids(&["b"]);
        let list2 = ids(&["a"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], 60);
        // Equal scores: lexicographic order decides
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "b");
        assert!((results[0].1 - results[1].1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_empty() {
        let list: Vec<String> = vec![];
        let results = reciprocal_rank_fusion(&[&list], 60);
        assert!(results.is_empty());
    }

    #[test]
    fn test_weighted_rrf_weight_dominates() {
        let list1 = ids(&["v", "k"]);
        let list2 = ids(&["k", "v"]);
        // Vector list weighted 0.7, keyword 0.3: "v" wins
        let results = weighted_rrf(&[(&list1, 0.7), (&list2, 0.3)], 60);
        assert_eq!(results[0].0, "v");
    }

    #[test]
    fn test_k_parameter_flattens_ranks() {
        let list = ids(&["a", "b"]);
        let low = reciprocal_rank_fusion(&[&list], 1);
        let high = reciprocal_rank_fusion(&[&list], 100);
        let diff_low = low[0].1 - low[1].1;
        let diff_high = high[0].1 - high[1].1;
        assert!(diff_low > diff_high);
    }
}
