//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait every backend implements, the offline
//! [`HashEmbedder`], and the pure helpers used by the vector index and its
//! on-disk encoding.
//!
//! Network and model-backed embedders (Ollama, fastembed) live in the
//! `localkb` app crate.

use anyhow::Result;
use async_trait::async_trait;

/// A deterministic text → vector mapping.
///
/// Implementations must return exactly one vector of length [`dims`](Embedder::dims)
/// per input, in input order, and the same vector for the same text on
/// every call.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Feature-hashing bag-of-words embedder.
///
/// Lower-cases the text, splits it on non-alphanumeric characters, hashes
/// each token with FNV-1a into one of `dims` signed buckets, and
/// L2-normalizes the result. Needs no model and no network, so it is the
/// backend used in tests and fully offline setups.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIMS: usize = 256;

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Scale a vector to unit length in place. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= magnitude;
        }
    }
}

/// Squared Euclidean distance. Callers must check lengths first.
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use localkb_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes; a trailing partial value is ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_l2_distance() {
        assert_eq!(l2_distance_squared(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(l2_distance_squared(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_normalize_zero_vector_is_noop() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn test_hash_embedder_deterministic_and_unit_length() {
        let e = HashEmbedder::new(64);
        let a = e.embed_one("The quick brown fox");
        let b = e.embed_one("the QUICK brown fox!");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_shared_terms_are_closer() {
        let e = HashEmbedder::default();
        let query = e.embed_one("fox");
        let fox = e.embed_one("The quick brown fox jumps over the lazy dog.");
        let other = e.embed_one("Kubernetes deployment notes for the cluster.");
        assert!(l2_distance_squared(&query, &fox) < l2_distance_squared(&query, &other));
    }

    #[test]
    fn test_hash_embedder_empty_text() {
        let e = HashEmbedder::new(8);
        assert_eq!(e.embed_one("   "), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn test_embed_preserves_order() {
        let e = HashEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let vectors = e.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(&e.embed_one(text), vector);
        }
        let q = embed_query(&e, "beta").await.unwrap();
        assert_eq!(q, vectors[1]);
    }
}
