use std::cmp::Ordering;

use crate::core::errors::RagError;

pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, RagError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(RagError::invalid("vectors must not be empty"));
    }
    if query.len() != candidate.len() {
        return Err(RagError::invalid(format!(
            "vector length mismatch: {} != {}",
            query.len(),
            candidate.len()
        )));
    }

    let dot: f32 = query.iter().zip(candidate.iter()).map(|(x, y)| x * y).sum();
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok((dot / denom).clamp(-1.0, 1.0))
}

pub fn rank_descending_by_cosine(
    query: &[f32],
    candidates: &[Vec<f32>],
) -> Result<Vec<(usize, f32)>, RagError> {
    let mut scores = Vec::with_capacity(candidates.len());
    for (idx, candidate) in candidates.iter().enumerate() {
        let score = cosine_similarity(query, candidate)?;
        scores.push((idx, score));
    }

    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    Ok(scores)
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}
