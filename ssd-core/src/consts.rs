use crate::analysis::prior::SsdSpec;

/// The number of values describing one box or prior in a flat buffer.
///
/// Priors are stored as `[center_x, center_y, width, height]`, decoded
/// locations as `[x0, y0, x1, y1]`. Both use the same stride.
pub const N_COORDS: usize = 4;

/// The number of priors emitted for every cell of every feature map.
///
/// Small square, large square, and a wide and a tall variant for each of
/// the two aspect ratios.
pub const PRIORS_PER_CELL: usize = 6;

/// Side length of the square image the MobileNet-SSD model consumes.
pub const IMAGE_SIZE: f32 = 512.0;

/// Required input width for the MobileNet-SSD model.
pub const REQUIRED_WIDTH: u32 = 512;

/// Required input height for the MobileNet-SSD model.
pub const REQUIRED_HEIGHT: u32 = 512;

/// Number of color channels in the input image.
pub const INPUT_CHANNELS: usize = 3;

/// Batch size for model inference.
///
/// Currently set to 1 for single image processing.
pub const BATCH_SIZE: usize = 1;

/// Pixel value subtracted before scaling during preprocessing.
pub const PIXEL_MEAN: f32 = 127.0;

/// Divisor applied after the mean has been removed.
///
/// Together with [`PIXEL_MEAN`] this maps `[0, 255]` to roughly `[-1, 1]`.
pub const PIXEL_STD: f32 = 128.0;

/// Variance applied to the predicted center offsets when decoding locations.
pub const CENTER_VARIANCE: f32 = 0.1;

/// Variance applied to the predicted log-size offsets when decoding locations.
pub const SIZE_VARIANCE: f32 = 0.2;

/// Minimum confidence for a prior to become a candidate of a class.
///
/// A prior is kept only when its score is strictly greater than this value.
pub const PROBA_THRESHOLD: f32 = 0.3;

/// IoU threshold for Non-Maximum Suppression (NMS).
///
/// Candidates whose corner-form IoU with an already kept detection of the
/// same class is greater than this value are suppressed.
pub const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Added to the denominator of the corner-form IoU so that two degenerate
/// boxes never divide by zero.
pub const IOU_EPSILON: f32 = 1e-5;

/// Index of the background class in the confidence tensor.
pub const BACKGROUND_CLASS: usize = 0;

/// The six-level anchor pyramid of the 512×512 MobileNet-SSD model.
///
/// Feature sizes `{32, 16, 8, 4, 2, 1}` yield 8190 priors in total.
pub const MOBILENET_SSD_SPECS: [SsdSpec; 6] = [
    SsdSpec::new(32, 16.0, 60.0, 105.0, 2.0, 3.0),
    SsdSpec::new(16, 32.0, 105.0, 150.0, 2.0, 3.0),
    SsdSpec::new(8, 64.0, 150.0, 195.0, 2.0, 3.0),
    SsdSpec::new(4, 100.0, 195.0, 240.0, 2.0, 3.0),
    SsdSpec::new(2, 150.0, 240.0, 285.0, 2.0, 3.0),
    SsdSpec::new(1, 300.0, 285.0, 330.0, 2.0, 3.0),
];

/// Conventional name of the input tensor. Sessions prefer it when the graph
/// has a tensor by this name and otherwise take the first graph input.
pub const INPUT_NAME: &str = "input";

/// Conventional name of the per-prior class score output, falling back to
/// the first graph output.
pub const SCORES_OUTPUT_NAME: &str = "scores";

/// Conventional name of the per-prior location offset output, falling back
/// to the second graph output.
pub const BOXES_OUTPUT_NAME: &str = "boxes";
