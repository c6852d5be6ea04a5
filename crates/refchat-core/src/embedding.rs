//! Embedder trait, vector utilities and a dependency-free hashing embedder.
//!
//! Concrete neural backends (fastembed, Ollama) live in the `refchat`
//! application crate and implement [`Embedder`].

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::keyword::tokenize;

/// A text-to-vector model with a fixed output dimension.
///
/// Implementations are loaded once at startup and shared by every request
/// handler. `embed_batch` must return exactly one vector per input, in
/// input order, and must be behaviourally identical to calling [`embed`]
/// on each element.
///
/// [`embed`]: Embedder::embed
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(Error::internal(format!(
                "embedding backend returned {} vectors for 1 input",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }

    /// Release the model. Later calls fail with `DependencyUnavailable`.
    fn shutdown(&self) {}
}

/// Reject `vector` unless it has exactly `expected` components.
pub fn check_dims(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Reject `vector` if any component is NaN or infinite.
pub fn check_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(i) => Err(Error::validation(format!(
            "embedding component {} is not a finite number ({})",
            i, vector[i]
        ))),
        None => Ok(()),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` when either vector has zero norm, when a component is not
/// finite, and for empty vectors or vectors of different lengths. Callers
/// that need those cases to be an error check with [`check_dims`] and
/// [`check_finite`] first.
///
/// Accumulates in `f64` so components near `f32::MAX` do not overflow.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() || denom < f64::from(f32::EPSILON) {
        return 0.0;
    }

    let sim = dot / denom;
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm >= f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Feature-hashing bag-of-words embedder.
///
/// Each token is hashed with 64-bit FNV-1a; the hash picks a bucket and a
/// sign. The result is L2-normalised, and text with no tokens embeds to the
/// zero vector. Deterministic across processes and platforms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::validation("hashing embedder dims must be > 0"));
        }
        Ok(Self { dims })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
            v[bucket] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn check_dims_rejects_mismatch() {
        assert!(check_dims(&[1.0, 2.0], 2).is_ok());
        assert_eq!(
            check_dims(&[1.0], 2),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn check_finite_rejects_nan_and_infinity() {
        assert!(check_finite(&[0.5, -1.0, 0.0]).is_ok());
        assert!(matches!(
            check_finite(&[0.5, f32::INFINITY]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(check_finite(&[f32::NAN]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_cosine_never_returns_nan() {
        let huge = vec![f32::MAX, f32::MAX];
        assert!((cosine_similarity(&huge, &huge) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 0.5]), 0.0);
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 0.5]), 0.0);
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalised() {
        let e = HashingEmbedder::new(64).unwrap();
        let a = e.embed_one("the quick brown fox");
        let b = e.embed_one("the quick brown fox");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(16).unwrap();
        assert!(e.embed_one("").iter().all(|x| *x == 0.0));
        assert!(e.embed_one("?!").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn hashing_embedder_rejects_zero_dims() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[test]
    fn hashing_embedder_ranks_shared_vocabulary_higher() {
        let e = HashingEmbedder::new(256).unwrap();
        let q = e.embed_one("rust cargo crates");
        let near = e.embed_one("cargo builds rust crates quickly");
        let far = e.embed_one("python notebooks and pandas");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn batch_matches_single() {
        let e = HashingEmbedder::new(32).unwrap();
        let texts = vec!["alpha beta".to_string(), "".to_string(), "gamma".to_string()];
        let batch = e.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        for (t, v) in texts.iter().zip(batch.iter()) {
            assert_eq!(&e.embed(t).await.unwrap(), v);
        }
    }
}
