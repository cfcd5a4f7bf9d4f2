//! Cosine similarity and top-k ranking over embeddings.

use ordered_float::OrderedFloat;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// A candidate that matched a query, with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatch {
    /// Identifier of the matched candidate.
    pub id: String,

    /// Cosine similarity against the query, in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Compute the cosine similarity between two embeddings.
///
/// Returns 0.0 when either vector has zero magnitude; errors when the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Normalize an embedding to unit length in place.
pub fn normalize(embedding: &mut Embedding) {
    let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Rank candidates against a query by cosine similarity, descending.
///
/// Candidates below `min_score` are dropped; at most `k` results are
/// returned. Candidates whose dimension does not match the query are an
/// error rather than silently skipped.
pub fn rank_top_k(
    query: &Embedding,
    candidates: &[(String, Embedding)],
    k: usize,
    min_score: f32,
) -> Result<Vec<RankedMatch>> {
    let mut scored: Vec<(OrderedFloat<f32>, &str)> = Vec::with_capacity(candidates.len());
    for (id, embedding) in candidates {
        let score = cosine_similarity(query, embedding)?;
        if score >= min_score {
            scored.push((OrderedFloat(score), id.as_str()));
        }
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0));

    Ok(scored
        .into_iter()
        .take(k)
        .map(|(score, id)| RankedMatch {
            id: id.to_string(),
            score: score.0,
        })
        .collect())
}
