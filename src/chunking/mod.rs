//! Contextual chunking.
//!
//! Splits a document body into overlapping windows sized by its
//! collection, preferring boundaries at paragraph, then sentence, then
//! word level, and never cutting inside a word. Each chunk gets a context
//! header: a deterministic template by default, or a cached LLM-written
//! header via [`apply_llm_headers`].

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::{Chunk, Collection, Document, DocumentInfo};
use crate::error::ChunkingError;
use crate::llm::{LlmProvider, oneshot_request};

/// Splits a document body into contextual chunks.
///
/// Windows are `collection.chunk_size` characters with
/// `collection.chunk_overlap` characters of overlap, measured in
/// characters rather than tokens. A body shorter than the window yields
/// exactly one chunk with `ordinal = 0, total = 1`. Every chunk carries
/// the deterministic template header; `has_context` stays false until an
/// LLM header replaces it.
///
/// # Errors
///
/// Returns [`ChunkingError`] when the collection's chunking parameters
/// are invalid.
pub fn chunk(
    body: &str,
    collection: &Collection,
    info: &DocumentInfo<'_>,
) -> Result<Vec<Chunk>, ChunkingError> {
    validate(collection)?;

    let windows = split_windows(body, collection.chunk_size, collection.chunk_overlap);
    let total = windows.len();

    let chunks = windows
        .into_iter()
        .enumerate()
        .map(|(ordinal, (start, end))| {
            let mut chunk = Chunk::new(info, ordinal, total, body[start..end].to_string());
            chunk.set_header(template_header(info, ordinal, total), false);
            chunk
        })
        .collect();

    Ok(chunks)
}

/// Chunks a batch of documents in parallel.
///
/// CPU-bound work (boundary search, hashing) is spread across the rayon
/// pool; output order matches input order.
///
/// # Errors
///
/// Returns the first [`ChunkingError`] encountered.
pub fn chunk_documents(
    documents: &[Document],
    collection: &Collection,
) -> Result<Vec<Vec<Chunk>>, ChunkingError> {
    documents
        .par_iter()
        .map(|doc| chunk(&doc.body, collection, &doc.info()))
        .collect()
}

/// Validates a collection's chunking parameters.
fn validate(collection: &Collection) -> Result<(), ChunkingError> {
    if collection.chunk_size == 0 {
        return Err(ChunkingError::InvalidConfig {
            reason: "chunk_size must be > 0".to_string(),
        });
    }
    if collection.chunk_overlap >= collection.chunk_size {
        return Err(ChunkingError::OverlapTooLarge {
            overlap: collection.chunk_overlap,
            size: collection.chunk_size,
        });
    }
    Ok(())
}

/// Splits `body` into byte-range windows of roughly `size` characters
/// with `overlap` characters of overlap.
///
/// Boundary preference near each window end: paragraph break, sentence
/// end, word boundary. A window never ends inside a word; an oversized
/// single word extends the window to the word's end instead.
fn split_windows(body: &str, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    if body.is_empty() {
        return vec![(0, 0)];
    }

    // Char-index table: byte offset of each char plus the end sentinel.
    let char_starts: Vec<usize> = body
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(body.len()))
        .collect();
    let n_chars = char_starts.len() - 1;

    if n_chars <= size {
        return vec![(0, body.len())];
    }

    let mut windows = Vec::new();
    let mut start_char = 0usize;

    loop {
        let ideal_end = (start_char + size).min(n_chars);
        let end_char = if ideal_end == n_chars {
            n_chars
        } else {
            find_break(body, &char_starts, start_char, ideal_end, size)
        };

        windows.push((char_starts[start_char], char_starts[end_char]));

        if end_char >= n_chars {
            break;
        }

        let mut next = end_char.saturating_sub(overlap).max(start_char + 1);
        next = snap_to_word_start(body, &char_starts, next, end_char);
        start_char = next;
    }

    windows
}

/// Finds the best break at or before `ideal_end`, never below
/// `start + size / 2` so pathological texts cannot stall the scan.
fn find_break(
    body: &str,
    char_starts: &[usize],
    start: usize,
    ideal_end: usize,
    size: usize,
) -> usize {
    let floor = start + (size / 2).max(1);
    let slice = &body[char_starts[floor]..char_starts[ideal_end]];

    // Paragraph break: cut after the blank line
    if let Some(pos) = slice.rfind("\n\n") {
        let byte = char_starts[floor] + pos + 2;
        return char_index_of(char_starts, byte);
    }

    // Sentence end: cut after terminator + space or newline
    for pat in [". ", "! ", "? ", ".\n", "!\n", "?\n", "\n"] {
        if let Some(pos) = slice.rfind(pat) {
            let byte = char_starts[floor] + pos + pat.len();
            return char_index_of(char_starts, byte);
        }
    }

    // Word boundary: cut at the last whitespace
    if let Some(pos) = slice.rfind(char::is_whitespace) {
        let byte = char_starts[floor] + pos + 1;
        return char_index_of(char_starts, byte);
    }

    // One word spans the whole tail: extend to its end rather than cut it
    let after = &body[char_starts[ideal_end]..];
    after.find(char::is_whitespace).map_or(char_starts.len() - 1, |pos| {
        char_index_of(char_starts, char_starts[ideal_end] + pos)
    })
}

/// Moves `candidate` forward to the start of a word so an overlapped
/// window never begins mid-word. Bounded by `limit` to guarantee
/// progress.
fn snap_to_word_start(
    body: &str,
    char_starts: &[usize],
    candidate: usize,
    limit: usize,
) -> usize {
    let byte = char_starts[candidate];
    if byte == 0 {
        return candidate;
    }
    let prev_is_boundary = body[..byte]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_whitespace() || c.is_ascii_punctuation());
    if prev_is_boundary {
        return candidate;
    }

    // Walk to the next word start within the overlap region
    let tail = &body[byte..];
    for (offset, word) in tail.split_word_bound_indices() {
        let idx = char_index_of(char_starts, byte + offset);
        if idx >= limit {
            break;
        }
        if idx > candidate && word.chars().next().is_some_and(char::is_alphanumeric) {
            return idx;
        }
    }
    candidate
}

/// Maps a byte offset back to its char index (offsets always come from
/// the table, so the lookup cannot miss).
fn char_index_of(char_starts: &[usize], byte: usize) -> usize {
    char_starts.binary_search(&byte).unwrap_or_else(|i| i - 1)
}

/// Deterministic template header for a chunk.
fn template_header(info: &DocumentInfo<'_>, ordinal: usize, total: usize) -> String {
    format!(
        "This chunk is from *{}* (part {} of {}). Source: {}.",
        info.title,
        ordinal + 1,
        total,
        info.uri
    )
}

/// Cache of LLM-written headers keyed by `hash(document_id, ordinal)`.
///
/// Headers are stable per document version, so repeated ingestion of the
/// same document reuses them without a provider round-trip.
#[derive(Default)]
pub struct HeaderCache {
    entries: Mutex<HashMap<u64, String>>,
}

impl HeaderCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(document_id: &str, ordinal: usize) -> u64 {
        let mut hasher = DefaultHasher::new();
        document_id.hash(&mut hasher);
        ordinal.hash(&mut hasher);
        hasher.finish()
    }

    fn get(&self, document_id: &str, ordinal: usize) -> Option<String> {
        self.entries
            .lock()
            .ok()?
            .get(&Self::key(document_id, ordinal))
            .cloned()
    }

    fn put(&self, document_id: &str, ordinal: usize, header: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(Self::key(document_id, ordinal), header);
        }
    }

    /// Number of cached headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// System prompt for the header-writing call.
const HEADER_PROMPT: &str = "Write 1-3 short sentences situating the given chunk within its \
                             source document. State what the document is and what this part \
                             covers. Respond with the sentences only.";

/// Replaces template headers with LLM-written ones, consulting `cache`
/// first. Suspension point per uncached chunk. Provider failure keeps the
/// template header for that chunk and logs a warning; `has_context`
/// becomes true only for chunks that received a model header.
pub async fn apply_llm_headers(
    chunks: &mut [Chunk],
    provider: &dyn LlmProvider,
    model: &str,
    cache: &HeaderCache,
) {
    for chunk in chunks.iter_mut() {
        if let Some(header) = cache.get(&chunk.document_id, chunk.ordinal) {
            chunk.set_header(header, true);
            continue;
        }

        let user = format!(
            "Document: {}\nPart {} of {}.\n\nChunk:\n{}",
            chunk.document_id,
            chunk.ordinal + 1,
            chunk.total,
            chunk.body
        );
        match provider
            .chat(&oneshot_request(model, HEADER_PROMPT, &user, false))
            .await
        {
            Ok(response) => {
                let header = response.content.trim().to_string();
                cache.put(&chunk.document_id, chunk.ordinal, header.clone());
                chunk.set_header(header, true);
            }
            Err(e) => {
                warn!(chunk = %chunk.id, error = %e, "header generation failed, keeping template");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceKind;
    use crate::llm::ScriptedProvider;
    use proptest::prelude::*;

    fn info() -> DocumentInfo<'static> {
        DocumentInfo {
            id: "doc-1",
            source_kind: SourceKind::Knowledge,
            uri: "notes/design.md",
            title: "Design Notes",
            owner_id: None,
        }
    }

    fn coll(size: usize, overlap: usize) -> Collection {
        Collection::new("knowledge", size, overlap)
    }

    #[test]
    fn test_short_body_single_chunk() {
        let chunks = chunk("short body", &coll(1000, 100), &info()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].total, 1);
        assert_eq!(chunks[0].body, "short body");
    }

    #[test]
    fn test_exact_size_single_chunk() {
        // chunk_size == len(body) yields exactly one chunk
        let body = "a".repeat(100);
        let chunks = chunk(&body, &coll(100, 10), &info()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total, 1);
    }

    #[test]
    fn test_ordinals_and_totals() {
        let body = "word ".repeat(400);
        let chunks = chunk(&body, &coll(500, 50), &info()).unwrap();
        assert!(chunks.len() > 1);
        let total = chunks.len();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
            assert_eq!(c.total, total);
            assert!(c.ordinal_valid());
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let mut body = "x".repeat(380);
        body.push_str("\n\n");
        body.push_str(&"y".repeat(380));
        let chunks = chunk(&body, &coll(500, 50), &info()).unwrap();
        // First window should end right after the paragraph break
        assert!(chunks[0].body.ends_with("\n\n"));
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let mut body = String::new();
        while body.len() < 900 {
            body.push_str("This is a sentence about systems. ");
        }
        let chunks = chunk(&body, &coll(500, 50), &info()).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks[0].body.trim_end().ends_with('.'));
    }

    #[test]
    fn test_never_cuts_mid_word() {
        let body = "alpha beta gamma delta epsilon zeta ".repeat(40);
        let chunks = chunk(&body, &coll(300, 30), &info()).unwrap();
        for c in &chunks {
            let trimmed = c.body.trim_end();
            assert!(
                trimmed.is_empty()
                    || ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"]
                        .iter()
                        .any(|w| trimmed.ends_with(w)),
                "window ends mid-word: ...{:?}",
                &trimmed[trimmed.len().saturating_sub(12)..]
            );
        }
    }

    #[test]
    fn test_template_header_deterministic() {
        let chunks = chunk("hello world", &coll(1000, 100), &info()).unwrap();
        assert_eq!(
            chunks[0].context_header,
            "This chunk is from *Design Notes* (part 1 of 1). Source: notes/design.md."
        );
        assert!(!chunks[0].has_context);
    }

    #[test]
    fn test_embeddable_includes_header() {
        let chunks = chunk("hello world", &coll(1000, 100), &info()).unwrap();
        let text = chunks[0].embeddable_text();
        assert!(text.starts_with("This chunk is from"));
        assert!(text.ends_with("hello world"));
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        let err = chunk("body", &coll(100, 100), &info()).unwrap_err();
        assert!(matches!(err, ChunkingError::OverlapTooLarge { .. }));

        let err = chunk("body", &coll(0, 0), &info()).unwrap_err();
        assert!(matches!(err, ChunkingError::InvalidConfig { .. }));
    }

    #[test]
    fn test_unicode_body_windows_on_char_boundaries() {
        let body = "héllo wörld übung ".repeat(60);
        let chunks = chunk(&body, &coll(200, 20), &info()).unwrap();
        // Reconstructing each window must not panic on char boundaries
        for c in &chunks {
            assert!(!c.body.is_empty());
        }
    }

    #[test]
    fn test_chunk_documents_batch_order() {
        let docs: Vec<Document> = (0..4)
            .map(|i| {
                Document::new(
                    &format!("doc-{i}"),
                    SourceKind::Knowledge,
                    "f.md",
                    "T",
                    &format!("body {i} "),
                )
            })
            .collect();
        let batches = chunk_documents(&docs, &coll(100, 10)).unwrap();
        assert_eq!(batches.len(), 4);
        for (i, batch) in batches.iter().enumerate() {
            assert!(batch[0].document_id.ends_with(&i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_llm_headers_cached() {
        let mut chunks = chunk("hello world", &coll(1000, 100), &info()).unwrap();
        let cache = HeaderCache::new();
        let provider = ScriptedProvider::new(["A header about the design notes."]);

        apply_llm_headers(&mut chunks, &provider, "m", &cache).await;
        assert!(chunks[0].has_context);
        assert_eq!(cache.len(), 1);

        // Second pass hits the cache; the exhausted script would fail otherwise
        let mut again = chunk("hello world", &coll(1000, 100), &info()).unwrap();
        apply_llm_headers(&mut again, &provider, "m", &cache).await;
        assert!(again[0].has_context);
        assert_eq!(
            again[0].context_header,
            "A header about the design notes."
        );
    }

    #[tokio::test]
    async fn test_llm_header_failure_keeps_template() {
        let mut chunks = chunk("hello world", &coll(1000, 100), &info()).unwrap();
        let provider = ScriptedProvider::unavailable();
        let cache = HeaderCache::new();

        apply_llm_headers(&mut chunks, &provider, "m", &cache).await;
        assert!(!chunks[0].has_context);
        assert!(chunks[0].context_header.starts_with("This chunk is from"));
    }

    proptest! {
        #[test]
        fn prop_windows_cover_body(
            body in "[a-z ]{0,2000}",
            size in 20usize..400,
        ) {
            let overlap = size / 10;
            let windows = split_windows(&body, size, overlap);
            // Windows are in order, non-empty for non-empty bodies, and
            // the last window reaches the end of the body.
            prop_assert!(!windows.is_empty());
            prop_assert_eq!(windows.last().map(|w| w.1), Some(body.len()));
            let mut prev_start = 0usize;
            for (start, end) in &windows {
                prop_assert!(start <= end);
                prop_assert!(*start >= prev_start || *start == 0);
                prev_start = *start;
                // Byte offsets always fall on char boundaries
                prop_assert!(body.is_char_boundary(*start));
                prop_assert!(body.is_char_boundary(*end));
            }
        }

        #[test]
        fn prop_single_chunk_when_short(body in "[a-z ]{0,99}") {
            let windows = split_windows(&body, 100, 10);
            prop_assert_eq!(windows.len(), 1);
        }
    }
}
