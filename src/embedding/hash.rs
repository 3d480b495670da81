//! Hash-based fallback embedder.
//!
//! Deterministic pseudo-embeddings built from FNV-1a token hashes: each
//! token is remixed through an avalanche function and scattered into a
//! handful of dimensions with signed fractional weights, and adjacent
//! token pairs add a weaker phrase signal. Vectors are normalized to
//! unit length. Similarity reflects lexical overlap, not semantics; the
//! real provider sits behind the same trait.

use async_trait::async_trait;

use super::Embedder;
use crate::error::ProviderError;

/// Dimensions each token contributes to.
const SCATTER: usize = 4;
/// Relative strength of the token-pair phrase signal.
const PAIR_WEIGHT: f32 = 0.25;

/// Hash-based fallback embedder.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates a new hash embedder with the specified dimensions.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Accumulates one hashed feature: `SCATTER` remix rounds, each
    /// picking a dimension and a signed weight from disjoint hash bits.
    #[allow(clippy::cast_possible_truncation)]
    fn scatter(&self, embedding: &mut [f32], seed: u64, strength: f32) {
        let mut state = seed;
        for _ in 0..SCATTER {
            state = remix(state);
            let idx = (state % self.dimensions as u64) as usize;
            embedding[idx] += signed_unit(state) * strength;
        }
    }

    /// Generates a pseudo-embedding from text.
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        // Token features (primary signal)
        for token in &tokens {
            self.scatter(&mut embedding, fnv1a(token.as_bytes()), 1.0);
        }

        // Adjacent-pair features (phrase signal)
        for pair in tokens.windows(2) {
            let mut seed = fnv1a(pair[0].as_bytes());
            seed = remix(seed ^ fnv1a(pair[1].as_bytes()));
            self.scatter(&mut embedding, seed, PAIR_WEIGHT);
        }

        // Normalize to unit length
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }

        embedding
    }
}

/// 64-bit FNV-1a over raw bytes.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Avalanche remix (the 64-bit finalizer mix); successive applications
/// yield the scatter sequence for one feature.
fn remix(mut state: u64) -> u64 {
    state ^= state >> 33;
    state = state.wrapping_mul(0xff51_afd7_ed55_8ccd);
    state ^= state >> 33;
    state = state.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    state ^= state >> 33;
    state
}

/// Maps the high hash bits to a weight in [-1, 1].
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn signed_unit(state: u64) -> f32 {
    let bits = (state >> 32) as u32;
    (f64::from(bits) / f64::from(u32::MAX)).mul_add(2.0, -1.0) as f32
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.generate(t)).collect())
    }
}
