//! Best-of cosine matching of detected faces against the roster.

use crate::types::{DetectedFace, KnownIdentity};

/// Outcome of matching one detected face against the roster.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub face: DetectedFace,
    /// Best-matching identity, if its similarity exceeded the threshold.
    pub identity: Option<KnownIdentity>,
    /// Similarity of the best candidate, threshold or not. 0.0 on an
    /// empty roster.
    pub similarity: f32,
}

/// Match each detected face against every roster identity.
///
/// Per face the identity with the maximum cosine similarity wins, and a
/// match is emitted only when that maximum strictly exceeds `threshold`.
/// Ties resolve to the first identity in roster order — arbitrary, not
/// semantically meaningful. O(faces × roster), fine at classroom scale.
pub fn match_faces(
    faces: Vec<DetectedFace>,
    roster: &[KnownIdentity],
    threshold: f32,
) -> Vec<MatchResult> {
    faces
        .into_iter()
        .map(|face| {
            let mut best_sim = f32::NEG_INFINITY;
            let mut best: Option<&KnownIdentity> = None;

            for identity in roster {
                let sim = face.embedding.similarity(&identity.embedding);
                if sim > best_sim {
                    best_sim = sim;
                    best = Some(identity);
                }
            }

            let similarity = if best_sim == f32::NEG_INFINITY {
                0.0
            } else {
                best_sim
            };

            MatchResult {
                face,
                identity: best.filter(|_| similarity > threshold).cloned(),
                similarity,
            }
        })
        .collect()
}
