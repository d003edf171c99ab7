//! Normalization and distance primitives.
//!
//! All distances in the engine are cosine distances between L2-normalized
//! vectors. Callers normalize first; nothing here normalizes implicitly.

use thiserror::Error;

/// Added to the norm so an all-zero vector normalizes to zero instead of NaN.
pub const NORM_EPSILON: f32 = 1e-10;

/// Tolerance used when checking that a stored vector is unit-norm.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("embedding is empty")]
    Empty,
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding has non-finite value at index {0}")]
    NonFinite(usize),
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Return `v / (||v|| + ε)`.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v) + NORM_EPSILON;
    v.iter().map(|x| x / norm).collect()
}

/// Cosine distance `1 - dot(a, b)` for unit vectors, clamped to `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - dot(a, b)).clamp(0.0, 2.0)
}

/// Element-wise mean. Returns `None` for an empty slice.
///
/// Vectors are assumed to share one dimension (see [`validate`]).
pub fn mean<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let first = vectors.first()?.as_ref();
    let mut sum = vec![0.0f64; first.len()];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.as_ref()) {
            *acc += f64::from(*x);
        }
    }
    let n = vectors.len() as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}

pub fn is_unit(v: &[f32]) -> bool {
    (l2_norm(v) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Check an ingested vector: non-empty, finite, and of the expected dimension if one is pinned.
pub fn validate(values: &[f32], expected_dim: Option<usize>) -> Result<(), VectorError> {
    if values.is_empty() {
        return Err(VectorError::Empty);
    }
    if let Some(expected) = expected_dim {
        if values.len() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }
    }
    if let Some(idx) = values.iter().position(|x| !x.is_finite()) {
        return Err(VectorError::NonFinite(idx));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f32], b: &[f32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < tol, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(&[3.0, 4.0]);
        assert_close(&v, &[0.6, 0.8], 1e-6);
        assert!(is_unit(&v));
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize(&[0.3, -2.5, 7.0, 0.01]);
        let twice = normalize(&once);
        assert_close(&once, &twice, 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let v = normalize(&[0.0, 0.0, 0.0]);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_cosine_distance_identical() {
        let a = normalize(&[0.2, 0.9, -0.4]);
        assert!(cosine_distance(&a, &a).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal_and_opposite() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean() {
        let m = mean(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]]).unwrap();
        assert_close(&m, &[1.0, 1.0], 1e-6);
        assert!(mean::<Vec<f32>>(&[]).is_none());
    }

    #[test]
    fn test_validate() {
        assert_eq!(validate(&[], None), Err(VectorError::Empty));
        assert_eq!(
            validate(&[1.0, 2.0], Some(3)),
            Err(VectorError::DimensionMismatch { expected: 3, actual: 2 })
        );
        assert_eq!(validate(&[1.0, f32::NAN], None), Err(VectorError::NonFinite(1)));
        assert!(validate(&[1.0, 2.0, 3.0], Some(3)).is_ok());
    }
}
