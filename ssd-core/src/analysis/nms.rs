use std::collections::VecDeque;

use derive_builder::Builder;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::{
    analysis::bbox::Bbox,
    consts::{BACKGROUND_CLASS, N_COORDS, NMS_IOU_THRESHOLD, PROBA_THRESHOLD},
    detection::element::DecodedBox,
    error::{InvalidShapeSnafu, LengthMismatchSnafu, ShapeSnafu, SsdError},
};

/// Thresholds of the per-class suppressor.
#[derive(Clone, Copy, Debug, PartialEq, Builder)]
#[builder(default)]
pub struct NmsConfig {
    /// A prior becomes a candidate of a class when its score is strictly
    /// greater than this value.
    pub confidence_threshold: f32,
    /// A candidate survives a kept detection when their corner-form IoU is
    /// less than or equal to this value.
    pub iou_threshold: f32,
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: PROBA_THRESHOLD,
            iou_threshold: NMS_IOU_THRESHOLD,
        }
    }
}

/// Runs greedy non-maximum suppression independently for every foreground
/// class.
///
/// * `confidences` - class-major scores, `class_count` rows of one score per prior
/// * `locations` - decoded corner-form boxes, four values per prior
///
/// Class `0` is background and never produces a detection. Returned class ids
/// are shifted down by one, so they index the foreground classes. Detections
/// come grouped by class in ascending order, most confident first within a
/// class. Overlapping boxes of different classes do not suppress each other.
pub fn suppress(
    confidences: &[f32],
    locations: &[f32],
    class_count: usize,
    config: &NmsConfig,
) -> Result<Vec<DecodedBox>, SsdError> {
    ensure!(
        locations.len() % N_COORDS == 0,
        InvalidShapeSnafu {
            stage: "suppress",
            message: format!(
                "{} location values do not form whole boxes",
                locations.len()
            ),
        }
    );

    let n_priors = locations.len() / N_COORDS;
    ensure!(
        confidences.len() == class_count * n_priors,
        LengthMismatchSnafu {
            stage: "suppress",
            expected: class_count * n_priors,
            actual: confidences.len(),
        }
    );

    let scores = ArrayView2::from_shape((class_count, n_priors), confidences)
        .context(ShapeSnafu { stage: "suppress" })?;

    let per_class: Vec<Vec<DecodedBox>> = (BACKGROUND_CLASS + 1..class_count)
        .into_par_iter()
        .map(|class| suppress_class(class, scores.row(class), locations, config))
        .collect();

    let detections: Vec<DecodedBox> = per_class.into_iter().flatten().collect();
    debug!(
        "Kept {} detections over {} foreground classes",
        detections.len(),
        class_count.saturating_sub(1)
    );

    Ok(detections)
}

fn suppress_class(
    class: usize,
    scores: ArrayView1<f32>,
    locations: &[f32],
    config: &NmsConfig,
) -> Vec<DecodedBox> {
    let mut candidates: Vec<DecodedBox> = scores
        .iter()
        .enumerate()
        .filter(|(_, confidence)| **confidence > config.confidence_threshold)
        .map(|(prior, &confidence)| {
            let loc = &locations[prior * N_COORDS..(prior + 1) * N_COORDS];
            DecodedBox {
                class_id: class - 1,
                confidence,
                bbox: Bbox::from_corners(loc[0], loc[1], loc[2], loc[3]),
            }
        })
        .collect();

    // Stable, so equal scores keep prior order
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut remaining = VecDeque::from(candidates);
    let mut kept = Vec::new();

    while let Some(best) = remaining.pop_front() {
        remaining.retain(|candidate| {
            best.bbox.iou_corner_form(&candidate.bbox) <= config.iou_threshold
        });
        kept.push(best);
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Class-major scores for `class_count` classes where only `class`
    /// carries the given per-prior scores.
    fn scores_for(class_count: usize, class: usize, per_prior: &[f32]) -> Vec<f32> {
        let mut scores = vec![0.0; class_count * per_prior.len()];
        scores[class * per_prior.len()..(class + 1) * per_prior.len()].copy_from_slice(per_prior);
        scores
    }

    fn config(confidence_threshold: f32, iou_threshold: f32) -> NmsConfig {
        NmsConfigBuilder::default()
            .confidence_threshold(confidence_threshold)
            .iou_threshold(iou_threshold)
            .build()
            .unwrap()
    }

    /// Deterministic scatter of boxes and scores for property checks.
    fn scattered(n_priors: usize, class_count: usize) -> (Vec<f32>, Vec<f32>) {
        let mut state = 0x2545_f491_u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 10_000) as f32 / 10_000.0
        };

        let mut locations = Vec::with_capacity(n_priors * N_COORDS);
        for _ in 0..n_priors {
            let x0 = next() * 0.7;
            let y0 = next() * 0.7;
            locations.extend_from_slice(&[x0, y0, x0 + 0.1 + next() * 0.2, y0 + 0.1 + next() * 0.2]);
        }
        let confidences = (0..class_count * n_priors).map(|_| next()).collect();

        (confidences, locations)
    }

    #[test]
    fn test_default_config() {
        let config = NmsConfigBuilder::default().build().unwrap();
        assert_eq!(config, NmsConfig::default());
        assert_eq!(config.confidence_threshold, 0.3);
        assert_eq!(config.iou_threshold, 0.45);
    }

    #[test]
    fn test_overlapping_pair_above_threshold_keeps_best() {
        // IoU of the nested pair is 0.6
        let locations = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.6];
        let confidences = scores_for(2, 1, &[0.9, 0.8]);

        let detections = suppress(&confidences, &locations, 2, &NmsConfig::default()).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].bbox, Bbox::from_corners(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_overlapping_pair_below_threshold_keeps_both() {
        // IoU of the nested pair is 0.3
        let locations = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.3];
        let confidences = scores_for(2, 1, &[0.8, 0.9]);

        let detections = suppress(&confidences, &locations, 2, &NmsConfig::default()).unwrap();

        assert_eq!(detections.len(), 2);
        // Most confident first, regardless of prior order
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[1].confidence, 0.8);
    }

    #[test]
    fn test_confidence_threshold_is_strict() {
        let locations = [0.0, 0.0, 0.1, 0.1, 0.5, 0.5, 0.6, 0.6];
        let confidences = scores_for(2, 1, &[0.3, 0.31]);

        let detections = suppress(&confidences, &locations, 2, &NmsConfig::default()).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.31);
    }

    #[test]
    fn test_suppressed_box_does_not_suppress_others() {
        // IoU(A, B) = 0.6, IoU(B, C) = 0.6, IoU(A, C) = 1/3.
        // B is removed by A, so it must not remove C.
        let locations = [
            0.0, 0.0, 0.4, 1.0, // A
            0.1, 0.0, 0.5, 1.0, // B
            0.2, 0.0, 0.6, 1.0, // C
        ];
        let confidences = scores_for(2, 1, &[0.9, 0.8, 0.7]);

        let detections = suppress(&confidences, &locations, 2, &NmsConfig::default()).unwrap();

        let kept: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(kept, vec![0.9, 0.7]);
    }

    #[test]
    fn test_background_is_never_returned() {
        let (confidences, locations) = scattered(50, 4);

        let detections = suppress(&confidences, &locations, 4, &config(0.0, 1.0)).unwrap();

        // Every non-background class keeps every positive-score prior
        assert!(!detections.is_empty());
        assert!(detections.iter().all(|d| d.class_id <= 2));

        let background_only = scores_for(3, 0, &[1.0; 4]);
        let detections =
            suppress(&background_only, &locations[..16], 3, &NmsConfig::default()).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_classes_do_not_suppress_each_other() {
        let locations = [0.2, 0.2, 0.6, 0.6];
        // Three classes, same prior scored high for both foreground classes
        let confidences = [0.0, 0.9, 0.8];

        let detections = suppress(&confidences, &locations, 3, &NmsConfig::default()).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[1].class_id, 1);
        assert_eq!(detections[0].bbox, detections[1].bbox);
    }

    #[test]
    fn test_empty_inputs() {
        let detections = suppress(&[], &[], 21, &NmsConfig::default()).unwrap();
        assert!(detections.is_empty());

        let locations = [0.0, 0.0, 1.0, 1.0];
        let detections = suppress(&[0.1], &locations, 1, &NmsConfig::default()).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_shape_mismatch_fails_fast() {
        let locations = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0];

        let err = suppress(&[0.5; 5], &locations, 3, &NmsConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SsdError::LengthMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));

        let err = suppress(&[0.5; 3], &locations[..7], 3, &NmsConfig::default()).unwrap_err();
        assert!(matches!(err, SsdError::InvalidShape { .. }));
    }

    #[test]
    fn test_raising_confidence_threshold_never_adds_detections() {
        let (confidences, locations) = scattered(200, 3);

        let mut previous = usize::MAX;
        for step in 0..10 {
            let threshold = step as f32 * 0.1;
            let detections = suppress(&confidences, &locations, 3, &config(threshold, 0.45)).unwrap();
            assert!(detections.len() <= previous);
            previous = detections.len();
        }
    }

    #[test]
    fn test_raising_iou_threshold_keeps_more_of_a_cluster() {
        // Nested boxes: IoU(A, B) = 0.6, IoU(A, C) = 0.3, IoU(B, C) = 0.5
        let locations = [
            0.0, 0.0, 1.0, 1.0, // A
            0.0, 0.0, 1.0, 0.6, // B
            0.0, 0.0, 1.0, 0.3, // C
        ];
        let confidences = scores_for(2, 1, &[0.9, 0.8, 0.7]);

        let counts: Vec<usize> = [0.2, 0.45, 0.7]
            .iter()
            .map(|&iou| {
                suppress(&confidences, &locations, 2, &config(0.3, iou))
                    .unwrap()
                    .len()
            })
            .collect();

        assert_eq!(counts, vec![1, 2, 3]);
    }

    #[test]
    fn test_unit_iou_threshold_keeps_every_candidate() {
        let (confidences, locations) = scattered(200, 3);

        let detections = suppress(&confidences, &locations, 3, &config(0.5, 1.0)).unwrap();

        let candidates = confidences[200..].iter().filter(|c| **c > 0.5).count();
        assert_eq!(detections.len(), candidates);
    }

    #[test]
    fn test_output_grouped_by_class_and_sorted() {
        let (confidences, locations) = scattered(100, 5);

        let detections = suppress(&confidences, &locations, 5, &NmsConfig::default()).unwrap();

        for pair in detections.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.class_id <= b.class_id);
            if a.class_id == b.class_id {
                assert!(a.confidence >= b.confidence);
            }
        }
    }
}
