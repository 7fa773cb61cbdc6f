#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Cosine similarity between two embeddings, clamped to `[0, 1]`.
///
/// Returns exactly `0.0` when either vector has zero norm, so an empty answer
/// never looks similar to anything. Vectors of different lengths are compared
/// over their common prefix.
pub fn cosine_similarity(v1: &[f32], v2: &[f32]) -> f64 {
    let (mut dot, mut norm1, mut norm2) = (0.0f64, 0.0f64, 0.0f64);
    for (&a, &b) in v1.iter().zip(v2) {
        let (a, b) = (f64::from(a), f64::from(b));
        dot += a * b;
        norm1 += a * a;
        norm2 += b * b;
    }

    if norm1 == 0.0 || norm2 == 0.0 {
        return 0.0;
    }

    // sqrt of the product keeps `similarity(v, v)` at exactly 1.0
    let similarity = dot / (norm1 * norm2).sqrt();
    if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_are_exactly_one() {
        let v = [0.3f32, -1.25, 7.0, 0.001];
        assert_eq!(cosine_similarity(&v, &v), 1.0);

        let w: Vec<f32> = (0..384).map(|i| ((i * 37) % 11) as f32 / 3.0 + 0.1).collect();
        assert_eq!(cosine_similarity(&w, &w), 1.0);
    }

    #[test]
    fn zero_vector_is_never_similar() {
        let zero = [0.0f32; 4];
        let v = [1.0f32, 2.0, 3.0, 4.0];
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn symmetric() {
        let a = [0.5f32, 0.1, 0.9, 0.2];
        let b = [0.4f32, 0.3, 0.7, 0.05];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn orthogonal_and_opposite_vectors_floor_at_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]), 0.0);
    }

    #[test]
    fn scale_does_not_matter() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [2.0f32, 4.0, 6.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-12);
    }
}
