use std::path::{Path, PathBuf};

use ndarray::{ArrayBase, Dim, OwnedRepr};

use crate::{
    analysis::{decode::Variance, nms::NmsConfig},
    consts::{
        BATCH_SIZE, BOXES_OUTPUT_NAME, INPUT_CHANNELS, INPUT_NAME, NMS_IOU_THRESHOLD, PIXEL_MEAN,
        PIXEL_STD, PROBA_THRESHOLD, REQUIRED_HEIGHT, REQUIRED_WIDTH, SCORES_OUTPUT_NAME,
    },
    inference::model::Model,
};

/// A MobileNet-SSD graph exported to ONNX, read from disk when the session
/// is created.
pub struct MobileNetSsd {
    path: PathBuf,
    config: MobileNetSsdConfig,
}

pub type MobileNetSsdInput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 4]>>;

/// Both heads of the detector, `[batch, n_priors, class_count]` scores and
/// `[batch, n_priors, 4]` location offsets.
pub struct MobileNetSsdOutput {
    pub scores: ArrayBase<OwnedRepr<f32>, Dim<[usize; 3]>>,
    pub boxes: ArrayBase<OwnedRepr<f32>, Dim<[usize; 3]>>,
}

#[derive(Clone, Debug)]
pub struct MobileNetSsdConfig {
    pub required_width: u32,
    pub required_height: u32,
    pub batch_size: usize,
    pub input_channels: usize,
    pub pixel_mean: f32,
    pub pixel_std: f32,
    pub proba_threshold: f32,
    pub iou_threshold: f32,
    pub variance: Variance,
    pub softmax_scores: bool,
    /// Tensor names to use instead of the ones read from the graph.
    pub input_name: Option<String>,
    pub scores_name: Option<String>,
    pub boxes_name: Option<String>,
}

impl Default for MobileNetSsdConfig {
    fn default() -> Self {
        Self {
            required_width: REQUIRED_WIDTH,
            required_height: REQUIRED_HEIGHT,
            batch_size: BATCH_SIZE,
            input_channels: INPUT_CHANNELS,
            pixel_mean: PIXEL_MEAN,
            pixel_std: PIXEL_STD,
            proba_threshold: PROBA_THRESHOLD,
            iou_threshold: NMS_IOU_THRESHOLD,
            variance: Variance::default(),
            softmax_scores: false,
            input_name: None,
            scores_name: None,
            boxes_name: None,
        }
    }
}

impl MobileNetSsdConfig {
    pub fn nms(&self) -> NmsConfig {
        NmsConfig {
            confidence_threshold: self.proba_threshold,
            iou_threshold: self.iou_threshold,
        }
    }
}

impl MobileNetSsd {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_config(path, MobileNetSsdConfig::default())
    }

    pub fn with_config<P: AsRef<Path>>(path: P, config: MobileNetSsdConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
        }
    }
}

impl Model for MobileNetSsd {
    type Input = MobileNetSsdInput;

    type Output = MobileNetSsdOutput;
    type Config = MobileNetSsdConfig;

    const INPUT_NAME: &'static str = INPUT_NAME;

    const OUTPUT_NAMES: &'static [&'static str] = &[SCORES_OUTPUT_NAME, BOXES_OUTPUT_NAME];

    const MODEL_NAME: &'static str = "mobilenet-ssd-512";

    fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
