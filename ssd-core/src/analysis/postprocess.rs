use tracing::debug;

use crate::{
    analysis::{
        decode::{Variance, decode_locations_with_variance},
        nms::{NmsConfig, suppress},
        prior::PriorTable,
        softmax::{softmax_per_prior, strongest_prior, transpose_confidences},
    },
    detection::element::{DecodedBox, PixelBox, rescale},
    error::SsdError,
};

/// Turns the raw outputs of one SSD forward pass into detections.
///
/// Holds a borrowed prior table so a single table can serve any number of
/// frames and postprocessors.
#[derive(Clone, Copy, Debug)]
pub struct SsdPostprocessor<'a> {
    priors: &'a PriorTable,
    pub nms: NmsConfig,
    pub variance: Variance,
    /// Apply a per-prior softmax before thresholding, for models that emit
    /// logits instead of probabilities.
    pub softmax_scores: bool,
}

impl<'a> SsdPostprocessor<'a> {
    pub fn new(priors: &'a PriorTable) -> Self {
        Self {
            priors,
            nms: NmsConfig::default(),
            variance: Variance::default(),
            softmax_scores: false,
        }
    }

    pub fn with_nms(mut self, nms: NmsConfig) -> Self {
        self.nms = nms;
        self
    }

    pub fn with_variance(mut self, variance: Variance) -> Self {
        self.variance = variance;
        self
    }

    pub fn with_softmax(mut self, softmax_scores: bool) -> Self {
        self.softmax_scores = softmax_scores;
        self
    }

    pub fn priors(&self) -> &'a PriorTable {
        self.priors
    }

    /// Decodes and suppresses one frame, keeping coordinates normalized.
    ///
    /// * `scores` - prior-major scores, `class_count` values per prior
    /// * `locations` - raw location offsets, four values per prior
    pub fn detect(
        &self,
        scores: &[f32],
        locations: &[f32],
        class_count: usize,
    ) -> Result<Vec<DecodedBox>, SsdError> {
        let n_priors = self.priors.len();

        let mut scores = scores.to_vec();
        if self.softmax_scores {
            softmax_per_prior(&mut scores, class_count)?;
        }

        if let Some((prior, class, score)) = strongest_prior(&scores, class_count) {
            debug!(
                "Strongest score {:.3} at prior {} for class {}",
                score, prior, class
            );
        }

        let confidences = transpose_confidences(&scores, n_priors, class_count)?;

        let mut boxes = locations.to_vec();
        decode_locations_with_variance(&mut boxes, self.priors, self.variance)?;

        suppress(&confidences, &boxes, class_count, &self.nms)
    }

    /// Runs [`Self::detect`] and maps the result onto the original image.
    pub fn run(
        &self,
        scores: &[f32],
        locations: &[f32],
        class_count: usize,
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<PixelBox>, SsdError> {
        let detections = self.detect(scores, locations, class_count)?;
        debug!(
            "Rescaling {} detections to {}x{}",
            detections.len(),
            image_width,
            image_height
        );

        Ok(rescale(&detections, image_width, image_height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::prior::SsdSpec;

    /// Two priors covering the left and right halves of a 2x1 grid.
    fn two_priors() -> PriorTable {
        PriorTable::from(vec![0.25, 0.5, 0.5, 1.0, 0.75, 0.5, 0.5, 1.0])
    }

    #[test]
    fn test_end_to_end_frame() {
        let priors = two_priors();
        let postprocessor = SsdPostprocessor::new(&priors);

        // Prior-major: [background, class A, class B] per prior
        let scores = [0.1, 0.8, 0.1, 0.2, 0.1, 0.7];
        let locations = [0.0; 8];

        let detections = postprocessor.run(&scores, &locations, 3, 200, 100).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].confidence, 0.8);
        assert!((detections[0].x - 0.0).abs() < 1e-4);
        assert!((detections[0].width - 100.0).abs() < 1e-4);
        assert!((detections[0].height - 100.0).abs() < 1e-4);

        assert_eq!(detections[1].class_id, 1);
        assert!((detections[1].x - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_softmax_changes_thresholding() {
        let priors = two_priors();
        // Logits: nothing clears the threshold until they are activated
        let scores = [0.0, 0.3, 0.0, 0.0, 0.0, 0.0];
        let locations = [0.0; 8];

        let raw = SsdPostprocessor::new(&priors)
            .detect(&scores, &locations, 3)
            .unwrap();
        assert!(raw.is_empty());

        let activated = SsdPostprocessor::new(&priors)
            .with_softmax(true)
            .detect(&scores, &locations, 3)
            .unwrap();
        // Uniform thirds on the second prior, 0.40 for class A on the first
        assert_eq!(activated.len(), 3);
        assert!(activated.iter().all(|d| d.confidence > 0.3));
    }

    #[test]
    fn test_mismatched_outputs_are_rejected() {
        let priors = two_priors();
        let postprocessor = SsdPostprocessor::new(&priors);

        assert!(matches!(
            postprocessor.detect(&[0.5; 5], &[0.0; 8], 3),
            Err(SsdError::LengthMismatch { .. })
        ));
        assert!(matches!(
            postprocessor.detect(&[0.5; 6], &[0.0; 12], 3),
            Err(SsdError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_inputs_are_not_modified() {
        let priors = PriorTable::generate(&[SsdSpec::new(2, 50.0, 30.0, 60.0, 2.0, 3.0)], 100.0);
        let n_priors = priors.len();
        let scores = vec![0.5; n_priors * 2];
        let locations = vec![0.1; n_priors * 4];

        let detections = SsdPostprocessor::new(&priors)
            .with_softmax(true)
            .detect(&scores, &locations, 2)
            .unwrap();

        assert!(detections.is_empty() || detections.iter().all(|d| d.class_id == 0));
        assert!(scores.iter().all(|s| *s == 0.5));
        assert!(locations.iter().all(|l| *l == 0.1));
    }
}
