use ndarray::{Array2, ArrayView2, Axis};
use snafu::{ResultExt, ensure};

use crate::error::{LengthMismatchSnafu, ShapeSnafu, SsdError};

/// Normalizes raw class logits into probabilities, one softmax per prior.
///
/// `scores` is prior-major: `class_count` consecutive values per prior.
pub fn softmax_per_prior(scores: &mut [f32], class_count: usize) -> Result<(), SsdError> {
    if class_count == 0 {
        ensure!(
            scores.is_empty(),
            LengthMismatchSnafu {
                stage: "softmax",
                expected: 0_usize,
                actual: scores.len(),
            }
        );
        return Ok(());
    }

    ensure!(
        scores.len() % class_count == 0,
        LengthMismatchSnafu {
            stage: "softmax",
            expected: scores.len().div_ceil(class_count) * class_count,
            actual: scores.len(),
        }
    );

    for logits in scores.chunks_exact_mut(class_count) {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0;
        for value in logits.iter_mut() {
            *value = (*value - max).exp();
            sum += *value;
        }
        for value in logits.iter_mut() {
            *value /= sum;
        }
    }

    Ok(())
}

/// Reorders prior-major scores `[n_priors, class_count]` into the class-major
/// layout `[class_count, n_priors]` consumed by the suppressor.
pub fn transpose_confidences(
    scores: &[f32],
    n_priors: usize,
    class_count: usize,
) -> Result<Vec<f32>, SsdError> {
    ensure!(
        scores.len() == n_priors * class_count,
        LengthMismatchSnafu {
            stage: "transpose",
            expected: n_priors * class_count,
            actual: scores.len(),
        }
    );

    let prior_major = ArrayView2::from_shape((n_priors, class_count), scores)
        .context(ShapeSnafu { stage: "transpose" })?;

    let mut class_major = Array2::<f32>::zeros((class_count, n_priors));
    for (class, mut row) in class_major.axis_iter_mut(Axis(0)).enumerate() {
        row.assign(&prior_major.column(class));
    }

    Ok(class_major.into_raw_vec_and_offset().0)
}

/// Finds the single highest score of a prior-major buffer, background
/// included, as `(prior, class, score)`.
pub fn strongest_prior(scores: &[f32], class_count: usize) -> Option<(usize, usize, f32)> {
    if class_count == 0 {
        return None;
    }

    scores
        .chunks_exact(class_count)
        .enumerate()
        .flat_map(|(prior, row)| {
            row.iter()
                .enumerate()
                .map(move |(class, &score)| (prior, class, score))
        })
        .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut scores = vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0];
        softmax_per_prior(&mut scores, 3).unwrap();

        for row in scores.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert!(row[0] < row[1] && row[1] < row[2]);
        }
        // Shifting logits does not change probabilities
        for (a, b) in scores[..3].iter().zip(&scores[3..]) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_large_logits_stay_finite() {
        let mut scores = vec![1000.0, 1000.0, -1000.0];
        softmax_per_prior(&mut scores, 3).unwrap();

        assert!(scores.iter().all(|v| v.is_finite()));
        assert!((scores[0] - 0.5).abs() < 1e-6);
        assert!(scores[2] < 1e-6);
    }

    #[test]
    fn test_softmax_rejects_partial_prior() {
        let mut scores = vec![0.0; 5];
        let err = softmax_per_prior(&mut scores, 3).unwrap_err();
        assert!(matches!(
            err,
            SsdError::LengthMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));

        assert!(softmax_per_prior(&mut [], 0).is_ok());
        assert!(softmax_per_prior(&mut [1.0], 0).is_err());
    }

    #[test]
    fn test_transpose_to_class_major() {
        // Two priors, three classes
        let prior_major = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let class_major = transpose_confidences(&prior_major, 2, 3).unwrap();

        assert_eq!(class_major, vec![0.1, 0.4, 0.2, 0.5, 0.3, 0.6]);
    }

    #[test]
    fn test_transpose_shape_mismatch() {
        let err = transpose_confidences(&[0.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, SsdError::LengthMismatch { expected: 6, .. }));
    }

    #[test]
    fn test_strongest_prior() {
        let scores = [0.1, 0.2, 0.7, 0.05, 0.9, 0.05];
        assert_eq!(strongest_prior(&scores, 3), Some((1, 1, 0.9)));
        assert_eq!(strongest_prior(&[], 3), None);
        assert_eq!(strongest_prior(&scores, 0), None);
    }
}
