//! Embedding provider capability.
//!
//! [`EmbeddingProvider`] is a pure `text → fixed-dim vector` function,
//! swappable at retriever construction. The default
//! [`HashEmbeddingProvider`] is fully deterministic: tokens are hashed with
//! SHA-256 and projected into a fixed-dimension vector, which is then
//! L2-normalized. No network, no model weights, replay-identical output.

use sha2::{Digest, Sha256};

use vigil_core::errors::Result;

use crate::vector::l2_normalize;

/// Default embedding dimension when none is configured.
pub const DEFAULT_DIMENSION: usize = 256;

/// A pure text-embedding capability.
///
/// Implementations must be deterministic for the retrieval replay contract
/// to hold; a provider that performs I/O may fail, in which case the
/// retriever falls back to [`HashEmbeddingProvider`].
pub trait EmbeddingProvider: Send + Sync {
    /// The fixed output dimension of this provider.
    fn dimension(&self) -> usize;

    /// Embed a text into a vector of exactly [`dimension`](Self::dimension)
    /// floats.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic hash-based pseudo-embedding.
///
/// Each lowercase alphanumeric token is hashed; the hash selects a bucket
/// and a sign, and the resulting sparse counts are L2-normalized. Texts
/// sharing tokens therefore land near each other, which is all the shard
/// ranking needs from the fallback.
#[derive(Clone, Debug)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider with the given output dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_be_bytes(digest[..8].try_into().unwrap_or([0; 8]));
            #[allow(clippy::cast_possible_truncation)]
            let idx = (bucket % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }

        l2_normalize(&mut v);
        Ok(v)
    }
}

/// Lowercase alphanumeric tokens of length >= 2.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_lowercase)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{cosine_similarity, l2_norm};

    #[test]
    fn embed_has_configured_dimension() {
        let provider = HashEmbeddingProvider::new(64);
        let v = provider.embed("some text").unwrap();
        assert_eq!(v.len(), 64);
        assert_eq!(provider.dimension(), 64);
    }

    #[test]
    fn embed_is_deterministic() {
        let provider = HashEmbeddingProvider::default();
        let a = provider.embed("never force push to main").unwrap();
        let b = provider.embed("never force push to main").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn embed_is_normalized() {
        let provider = HashEmbeddingProvider::default();
        let v = provider.embed("validate all user input").unwrap();
        assert!((l2_norm(&v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let provider = HashEmbeddingProvider::default();
        let v = provider.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn shared_tokens_increase_similarity() {
        let provider = HashEmbeddingProvider::default();
        let auth = provider.embed("use jwt tokens for authentication").unwrap();
        let similar = provider.embed("authentication requires jwt tokens").unwrap();
        let unrelated = provider.embed("cache invalidation strategy for redis").unwrap();
        assert!(
            cosine_similarity(&auth, &similar) > cosine_similarity(&auth, &unrelated),
            "texts sharing tokens should score higher"
        );
    }

    #[test]
    fn tokenize_lowercases_and_drops_short_tokens() {
        let tokens: Vec<_> = tokenize("Fix THE auth-bug x").collect();
        assert_eq!(tokens, vec!["fix", "the", "auth", "bug"]);
    }

    #[test]
    fn case_does_not_change_embedding() {
        let provider = HashEmbeddingProvider::default();
        let a = provider.embed("Validate Input").unwrap();
        let b = provider.embed("validate input").unwrap();
        assert_eq!(a, b);
    }
}
