//! Near-duplicate suppression for retrieval candidates.
//!
//! Uses a sequence-matcher ratio over word tokens: twice the matched
//! token count divided by the total token count, with matches found by
//! recursive longest-common-block search. Candidates scoring at or above
//! the threshold against an already-kept candidate are dropped.

/// Similarity threshold above which two bodies count as duplicates.
pub const DEDUP_THRESHOLD: f64 = 0.7;

/// Sequence-matcher similarity ratio between two texts, in [0, 1].
///
/// Computed over word tokens: `2 * M / T` where `M` is the total size of
/// matching blocks and `T` the combined token count. Identical texts
/// score 1.0; disjoint texts 0.0.
#[must_use]
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: Vec<&str> = a.split_whitespace().collect();
    let tokens_b: Vec<&str> = b.split_whitespace().collect();

    let total = tokens_a.len() + tokens_b.len();
    if total == 0 {
        return 1.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let matched = matching_blocks(&tokens_a, &tokens_b);
    #[allow(clippy::cast_precision_loss)]
    {
        2.0 * matched as f64 / total as f64
    }
}

/// Total size of matching blocks: longest common block, then recurse on
/// the pieces to its left and right.
fn matching_blocks(a: &[&str], b: &[&str]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (a_start, b_start, length) = longest_common_block(a, b);
    if length == 0 {
        return 0;
    }

    length
        + matching_blocks(&a[..a_start], &b[..b_start])
        + matching_blocks(&a[a_start + length..], &b[b_start + length..])
}

/// Longest common contiguous block between two token slices.
///
/// Returns `(a_start, b_start, length)`; the earliest block wins ties so
/// the result is deterministic.
fn longest_common_block(a: &[&str], b: &[&str]) -> (usize, usize, usize) {
    let mut best = (0usize, 0usize, 0usize);
    // lengths[j] = length of the common suffix ending at (i, j)
    let mut lengths = vec![0usize; b.len() + 1];

    for (i, token_a) in a.iter().enumerate() {
        // Walk j backwards so lengths[j - 1] still holds row i - 1
        for j in (0..b.len()).rev() {
            if *token_a == b[j] {
                let run = lengths[j] + 1;
                lengths[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            } else {
                lengths[j + 1] = 0;
            }
        }
        lengths[0] = 0;
    }

    best
}

/// Keeps the higher-scoring representative of each near-duplicate group.
///
/// `items` must be sorted by score descending; the first (highest) item
/// of each group survives. Returns the kept indices in input order.
pub fn dedup_indices<T, F: Fn(&T) -> &str>(items: &[T], body_of: F) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let body = body_of(item);
        let duplicate = kept
            .iter()
            .any(|&j| similarity_ratio(body, body_of(&items[j])) >= DEDUP_THRESHOLD);
        if !duplicate {
            kept.push(i);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts() {
        assert!((similarity_ratio("the same text", "the same text") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disjoint_texts() {
        assert!(similarity_ratio("alpha beta gamma", "delta epsilon zeta").abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_overlap() {
        let ratio = similarity_ratio(
            "the quick brown fox jumps over the lazy dog",
            "the quick brown fox sleeps all day long now",
        );
        assert!(ratio > 0.3);
        assert!(ratio < 0.7);
    }

    #[test]
    fn test_near_duplicate_above_threshold() {
        let a = "contextual chunking splits documents into overlapping windows for retrieval";
        let b = "contextual chunking splits documents into overlapping windows for search";
        assert!(similarity_ratio(a, b) >= DEDUP_THRESHOLD);
    }

    #[test]
    fn test_empty_inputs() {
        assert!((similarity_ratio("", "") - 1.0).abs() < f64::EPSILON);
        assert!(similarity_ratio("text", "").abs() < f64::EPSILON);
    }

    #[test]
    fn test_symmetry() {
        let a = "one two three four five";
        let b = "three four five six seven";
        assert!((similarity_ratio(a, b) - similarity_ratio(b, a)).abs() < 1e-12);
    }

    #[test]
    fn test_reordered_blocks_counted_once() {
        // "a b" and "c d" both match but only as separate blocks
        let ratio = similarity_ratio("a b c d", "c d a b");
        // LCS picks one 2-block; recursion finds nothing on the sides
        assert!((ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dedup_keeps_higher_scoring() {
        struct Item {
            body: &'static str,
        }
        let items = [
            Item { body: "the release plan for atlas covers rollout and monitoring" },
            Item { body: "the release plan for atlas covers rollout and alerting" },
            Item { body: "completely unrelated pasta recipe with garlic and olive oil" },
        ];
        let kept = dedup_indices(&items, |item| item.body);
        assert_eq!(kept, vec![0, 2]);
    }

    #[test]
    fn test_dedup_all_unique() {
        struct Item {
            body: &'static str,
        }
        let items = [
            Item { body: "first distinct body" },
            Item { body: "second wholly different content" },
        ];
        let kept = dedup_indices(&items, |item| item.body);
        assert_eq!(kept.len(), 2);
    }
}
