use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Horizontal centroid — the signal the track debouncer accumulates.
    pub fn centroid_x(&self) -> f32 {
        self.x + self.width / 2.0
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("malformed embedding JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("embedding is empty")]
    Empty,
}

/// Face embedding vector (typically 512-dimensional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Parse an embedding stored as a JSON float array string.
    ///
    /// The roster store serializes embeddings this way; one malformed row
    /// must never poison the rest of a refresh, so callers skip on error.
    pub fn from_json(raw: &str) -> Result<Self, EmbeddingError> {
        let values: Vec<f32> = serde_json::from_str(raw)?;
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(Self { values })
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero-norm
    /// vectors compare as 0.0 rather than dividing by zero.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// An enrolled individual eligible for recognition.
///
/// Immutable snapshot row; the roster cache replaces the whole set on
/// refresh rather than patching entries in place.
#[derive(Debug, Clone)]
pub struct KnownIdentity {
    pub identity_id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// One face found in a frame by the external detector.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// External face detect+embed capability.
///
/// Given an encoded frame, returns zero or more detected faces with their
/// embeddings. Model internals (architecture, CPU/GPU placement) are the
/// implementor's business; the pipeline only consumes the results.
pub trait FaceAnalyzer {
    fn analyze(
        &self,
        jpeg: &[u8],
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<DetectedFace>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_x() {
        let bbox = BoundingBox {
            x: 100.0,
            y: 50.0,
            width: 40.0,
            height: 60.0,
        };
        assert_eq!(bbox.centroid_x(), 120.0);
    }

    #[test]
    fn test_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_embedding_from_json() {
        let e = Embedding::from_json("[0.5, -0.25, 1.0]").unwrap();
        assert_eq!(e.values, vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_embedding_from_json_malformed() {
        assert!(matches!(
            Embedding::from_json("not json"),
            Err(EmbeddingError::Malformed(_))
        ));
        assert!(matches!(
            Embedding::from_json("[]"),
            Err(EmbeddingError::Empty)
        ));
    }
}
