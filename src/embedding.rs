//! Text embedders.
//!
//! An [`Embedder`] maps text to a fixed-length vector. Implementations never
//! see the index; the store checks that their output dimension matches the
//! dimension already committed.

use crate::error::{Error, Result};

/// A single embedding vector.
pub type Vector = Vec<f32>;

/// Default dimension for [`HashEmbedder`].
pub const DEFAULT_HASH_DIMENSION: usize = 384;

pub trait Embedder: Send + Sync {
    /// Short identifier shown in status output.
    fn name(&self) -> &str;

    /// Embed several texts. The output holds one vector per input, in
    /// input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Embed one text. Must agree with [`Embedder::embed_batch`].
    fn embed(&self, text: &str) -> Result<Vector> {
        let vectors = self.embed_batch(&[text.to_string()])?;
        let count = vectors.len();
        match vectors.into_iter().next() {
            Some(vector) if count == 1 => Ok(vector),
            _ => Err(Error::EmbeddingUnavailable(format!(
                "{} returned {count} vectors for a single input",
                self.name()
            ))),
        }
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Deterministic bag-of-words embedder based on feature hashing.
///
/// Each lowercase alphanumeric token is hashed with BLAKE3 into one of
/// `dimension` buckets with a hash-derived sign, and the resulting counts are
/// L2-normalized. No model download is needed, so it works offline and gives
/// stable vectors across runs and platforms.
///
/// # Examples
///
/// ```
/// use ragnova::embedding::{Embedder, HashEmbedder};
///
/// let embedder = HashEmbedder::new(64).unwrap();
/// let a = embedder.embed("The cat sat").unwrap();
/// let b = embedder.embed("the CAT sat").unwrap();
/// assert_eq!(a.len(), 64);
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASH_DIMENSION,
        }
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidConfiguration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vector {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let mut head = [0u8; 8];
            head.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dimension as u64)
                as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
