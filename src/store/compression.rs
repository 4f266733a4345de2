//! Per-vector lossy compression.
//!
//! Three algorithms, selected by configuration:
//! - quantization: snap each component onto `2^(8-level)` buckets spanning
//!   the vector's own min/max range
//! - dimensionality reduction: keep the highest-magnitude dimensions, zero
//!   the rest
//! - hybrid: reduction at half level, then quantization at full level
//!
//! Each algorithm reports a quality score — the cosine similarity between
//! the original and the transformed vector. The transformed vector only
//! replaces the original when quality exceeds the configured floor;
//! otherwise the original is kept bit-for-bit.

use serde::{Deserialize, Serialize};

use crate::vector_math::cosine_similarity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    Quantization,
    DimensionalityReduction,
    Hybrid,
}

/// Outcome of a compression attempt.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub vector: Vec<f32>,
    /// Cosine similarity between original and transformed vector, in [0, 1].
    pub quality: f32,
    pub algorithm: CompressionAlgorithm,
    /// Whether the transformed vector was accepted.
    pub applied: bool,
}

/// Compress a vector, keeping the original when quality falls at or below
/// the floor.
pub fn compress(
    vector: &[f32],
    algorithm: CompressionAlgorithm,
    level: u8,
    quality_floor: f32,
) -> CompressionOutcome {
    let level = level.clamp(1, 9);
    let transformed = match algorithm {
        CompressionAlgorithm::Quantization => quantize(vector, level),
        CompressionAlgorithm::DimensionalityReduction => reduce_dimensions(vector, level),
        CompressionAlgorithm::Hybrid => {
            let half = (level / 2).max(1);
            quantize(&reduce_dimensions(vector, half), level)
        }
    };

    let quality = cosine_similarity(vector, &transformed)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let applied = quality > quality_floor;

    CompressionOutcome {
        vector: if applied {
            transformed
        } else {
            vector.to_vec()
        },
        quality,
        algorithm,
        applied,
    }
}

/// Snap each component to the midpoint of its bucket. Level 1 keeps 128
/// buckets; level 8 and above collapse to a single bucket.
fn quantize(vector: &[f32], level: u8) -> Vec<f32> {
    if vector.is_empty() {
        return Vec::new();
    }

    let buckets: u32 = if level >= 8 { 1 } else { 1 << (8 - level) };
    let min = vector.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = vector.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        return vector.to_vec();
    }

    let step = range / buckets as f32;
    vector
        .iter()
        .map(|v| {
            let idx = (((v - min) / step).floor() as u32).min(buckets - 1);
            min + (idx as f32 + 0.5) * step
        })
        .collect()
}

/// Keep the `n * (1 - level/10)` highest-magnitude dimensions, zero the rest.
fn reduce_dimensions(vector: &[f32], level: u8) -> Vec<f32> {
    let n = vector.len();
    if n == 0 {
        return Vec::new();
    }

    let keep = ((n as f32) * (1.0 - level as f32 / 10.0)).round().max(1.0) as usize;

    let mut by_magnitude: Vec<usize> = (0..n).collect();
    by_magnitude.sort_by(|&a, &b| {
        vector[b]
            .abs()
            .partial_cmp(&vector[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = vec![0.0; n];
    for &idx in by_magnitude.iter().take(keep) {
        out[idx] = vector[idx];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vector(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i * 37 % 100) as f32 - 50.0) / 50.0).collect()
    }

    #[test]
    fn quality_is_bounded() {
        let vector = sample_vector(64);
        for level in 1..=9u8 {
            let outcome = compress(&vector, CompressionAlgorithm::Quantization, level, 0.8);
            assert!(outcome.quality >= 0.0 && outcome.quality <= 1.0);
        }
    }

    #[test]
    fn low_quality_keeps_original_bit_for_bit() {
        let vector = sample_vector(64);
        // Level 9 quantization collapses everything to one bucket.
        let outcome = compress(&vector, CompressionAlgorithm::Quantization, 9, 0.8);
        if !outcome.applied {
            assert_eq!(outcome.vector, vector);
        }
    }

    #[test]
    fn light_quantization_preserves_direction() {
        let vector = sample_vector(128);
        let outcome = compress(&vector, CompressionAlgorithm::Quantization, 1, 0.8);
        assert!(outcome.applied, "quality was {}", outcome.quality);
        assert!(outcome.quality > 0.95);
    }

    #[test]
    fn reduction_zeroes_low_magnitude_dimensions() {
        let vector = vec![5.0, 0.1, -4.0, 0.2, 3.0, 0.05, -2.0, 0.15, 1.0, 0.01];
        let reduced = reduce_dimensions(&vector, 5);
        // level 5 keeps half the dimensions
        let non_zero = reduced.iter().filter(|v| **v != 0.0).count();
        assert_eq!(non_zero, 5);
        assert_eq!(reduced[0], 5.0);
        assert_eq!(reduced[5], 0.0);
    }

    #[test]
    fn hybrid_runs_both_stages() {
        let vector = sample_vector(64);
        let outcome = compress(&vector, CompressionAlgorithm::Hybrid, 2, 0.0);
        assert!(outcome.applied);
        assert_eq!(outcome.vector.len(), vector.len());
    }

    #[test]
    fn constant_vector_quantizes_to_itself() {
        let vector = vec![0.5; 16];
        let quantized = quantize(&vector, 4);
        assert_eq!(quantized, vector);
    }
}
