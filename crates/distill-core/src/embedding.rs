//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helper functions for vector serialization and similarity.
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `distill`
//! app crate.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ValidationError;

/// An embedding backend.
///
/// [`dims`](Embedder::dims) is the single source of truth for vector length:
/// it is what the vector store is initialized with, and every vector a
/// provider returns must have exactly that many components. Providers may
/// rate-limit internally (e.g. a fixed delay between sub-batches).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts. The result has one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        check_batch(1, self.dims(), &vectors)?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Validate the shape of an embedder response.
///
/// Fails if the number of vectors differs from the number of inputs or any
/// vector's length differs from `dims`. Vectors are never padded or
/// truncated to fit.
pub fn check_batch(
    expected: usize,
    dims: usize,
    vectors: &[Vec<f32>],
) -> Result<(), ValidationError> {
    if vectors.len() != expected {
        return Err(ValidationError::BatchLength {
            expected,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(ValidationError::VectorLength {
            expected: dims,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use distill_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob).unwrap(), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]. A blob whose length is not a multiple of 4
/// is rejected rather than silently truncated.
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>, ValidationError> {
    if blob.len() % 4 != 0 {
        return Err(ValidationError::BlobLength(blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths. Accumulates in `f64`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_rejects_ragged_length() {
        assert_eq!(
            blob_to_vec(&[0u8, 1, 2]).unwrap_err(),
            ValidationError::BlobLength(3)
        );
    }

    #[test]
    fn test_blob_is_little_endian() {
        let blob = vec_to_blob(&[1.0]);
        assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_check_batch() {
        let good = vec![vec![0.0; 3], vec![1.0; 3]];
        assert!(check_batch(2, 3, &good).is_ok());
        assert_eq!(
            check_batch(3, 3, &good).unwrap_err(),
            ValidationError::BatchLength {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(
            check_batch(2, 4, &good).unwrap_err(),
            ValidationError::VectorLength {
                expected: 4,
                actual: 3
            }
        );
    }
}
