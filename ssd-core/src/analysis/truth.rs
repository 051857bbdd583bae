//! Ground-truth boxes and the center/size IoU used to evaluate detections
//! against labeled data.
//!
//! Geometry here is always center/size: `center` is the box midpoint and
//! `size` its width and height. None of this is on the live inference path.

use std::path::{Path, PathBuf};

use glam::Vec2;
use serde::Serialize;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    detection::element::PixelBox,
    error::{IoReadSnafu, ParseLabelSnafu, SsdError},
};

/// A labeled (or detected) box in center/size form with matching state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GroundTruthBox {
    pub class_id: usize,
    pub confidence: f32,
    pub center: Vec2,
    pub size: Vec2,
    /// Index of the truth box this box was matched to. `None` when unmatched.
    pub unique_truth_index: Option<usize>,
    /// Whether the match is a true positive.
    pub truth_flag: bool,
    /// Best IoU seen against any truth box of the frame.
    pub max_iou: f32,
}

impl GroundTruthBox {
    pub fn new(class_id: usize, confidence: f32, center: Vec2, size: Vec2) -> Self {
        Self {
            class_id,
            confidence,
            center,
            size,
            unique_truth_index: None,
            truth_flag: false,
            max_iou: 0.0,
        }
    }

    /// Converts a pixel-space detection into a normalized center/size box.
    ///
    /// Label files store coordinates relative to the image size, so the
    /// detection is divided by the same dimensions it was rescaled with.
    pub fn from_pixel_box(detection: &PixelBox, image_width: u32, image_height: u32) -> Self {
        let image_size = Vec2::new(image_width as f32, image_height as f32);
        let size = Vec2::new(detection.width, detection.height);
        let center = Vec2::new(detection.x, detection.y) + size / 2.0;

        Self::new(
            detection.class_id,
            detection.confidence,
            center / image_size,
            size / image_size,
        )
    }

    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    /// Resets the matching state, leaving class, confidence and geometry as
    /// they are.
    pub fn clear_truth(self) -> Self {
        Self {
            unique_truth_index: None,
            truth_flag: false,
            max_iou: 0.0,
            ..self
        }
    }
}

/// Overlap length of two centered 1-D intervals.
///
/// Negative when the intervals are disjoint, in which case the magnitude is
/// the size of the gap between them.
pub fn overlap(center1: f32, size1: f32, center2: f32, size2: f32) -> f32 {
    let left = (center1 - size1 / 2.0).max(center2 - size2 / 2.0);
    let right = (center1 + size1 / 2.0).min(center2 + size2 / 2.0);

    right - left
}

pub fn intersection(a: &GroundTruthBox, b: &GroundTruthBox) -> f32 {
    let w = overlap(a.center.x, a.size.x, b.center.x, b.size.x);
    let h = overlap(a.center.y, a.size.y, b.center.y, b.size.y);
    if w < 0.0 || h < 0.0 {
        return 0.0;
    }

    w * h
}

pub fn union(a: &GroundTruthBox, b: &GroundTruthBox) -> f32 {
    a.area() + b.area() - intersection(a, b)
}

/// Intersection over Union of two center/size boxes.
///
/// Returns exactly `0.0` when either the intersection or the union is zero.
/// Decoded detections are in corner form and must use
/// [`Bbox::iou_corner_form`](crate::analysis::bbox::Bbox::iou_corner_form).
///
/// # Example
/// ```
/// use glam::Vec2;
/// use ssd_core::analysis::truth::{GroundTruthBox, iou_center_size_form};
/// let a = GroundTruthBox::new(0, 1.0, Vec2::new(2.0, 2.0), Vec2::new(4.0, 4.0));
/// let b = GroundTruthBox::new(0, 1.0, Vec2::new(4.0, 4.0), Vec2::new(4.0, 4.0));
/// assert!((iou_center_size_form(&a, &b) - 4.0 / 28.0).abs() < 1e-6);
/// ```
pub fn iou_center_size_form(a: &GroundTruthBox, b: &GroundTruthBox) -> f32 {
    let i = intersection(a, b);
    let u = union(a, b);
    if i == 0.0 || u == 0.0 {
        return 0.0;
    }

    // f32 overlap of a box with itself can round above its own area
    (i / u).min(1.0)
}

/// Ground truth and detections of one frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameDetectionInfo {
    pub label_path: PathBuf,
    pub image_path: PathBuf,
    pub ground_truth_boxes: Vec<GroundTruthBox>,
    pub detected_boxes: Vec<GroundTruthBox>,
}

impl FrameDetectionInfo {
    /// Loads the label file and pairs it with detections of its image.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        label_path: P,
        image_path: Q,
        detected_boxes: Vec<GroundTruthBox>,
    ) -> Result<Self, SsdError> {
        let ground_truth_boxes = read_ground_truth(label_path.as_ref())?;

        Ok(Self {
            label_path: label_path.as_ref().to_path_buf(),
            image_path: image_path.as_ref().to_path_buf(),
            ground_truth_boxes,
            detected_boxes,
        })
    }

    /// Greedily matches detections to ground truth.
    ///
    /// Detections are visited in descending confidence. Each records the best
    /// IoU over all truths of its class; it becomes a true positive when that
    /// IoU reaches `iou_threshold` and the truth has not been claimed by a
    /// more confident detection. Matching state is cleared first, so the
    /// method can be re-run with a different threshold.
    ///
    /// Returns the number of true positives.
    pub fn match_detections(&mut self, iou_threshold: f32) -> usize {
        for detected in self.detected_boxes.iter_mut() {
            *detected = detected.clear_truth();
        }

        let mut order: Vec<usize> = (0..self.detected_boxes.len()).collect();
        order.sort_by(|&a, &b| {
            self.detected_boxes[b]
                .confidence
                .partial_cmp(&self.detected_boxes[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut claimed = vec![false; self.ground_truth_boxes.len()];
        let mut true_positives = 0;

        for index in order {
            let detected = &mut self.detected_boxes[index];

            let best = self
                .ground_truth_boxes
                .iter()
                .enumerate()
                .filter(|(_, truth)| truth.class_id == detected.class_id)
                .map(|(truth_index, truth)| (truth_index, iou_center_size_form(detected, truth)))
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let Some((truth_index, iou)) = best else {
                continue;
            };

            detected.max_iou = iou;
            detected.unique_truth_index = Some(truth_index);
            if iou >= iou_threshold && !claimed[truth_index] {
                claimed[truth_index] = true;
                detected.truth_flag = true;
                true_positives += 1;
            }
        }

        debug!(
            "Matched {} of {} detections against {} truths",
            true_positives,
            self.detected_boxes.len(),
            self.ground_truth_boxes.len()
        );

        true_positives
    }
}

/// Reads a label file with one `class center_x center_y width height` line
/// per object, coordinates normalized to the image size.
///
/// Blank lines are skipped. Ground truth carries a confidence of `1.0`.
pub fn read_ground_truth<P: AsRef<Path>>(path: P) -> Result<Vec<GroundTruthBox>, SsdError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).context(IoReadSnafu {
        path: path.to_string_lossy(),
    })?;

    parse_ground_truth(&content, &path.to_string_lossy())
}

fn parse_ground_truth(content: &str, path: &str) -> Result<Vec<GroundTruthBox>, SsdError> {
    let mut boxes = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }

        if fields.len() != 5 {
            return ParseLabelSnafu {
                path,
                line: line_no + 1,
                message: format!("expected 5 fields, found {}", fields.len()),
            }
            .fail();
        }

        let class_id = fields[0].parse::<usize>().map_err(|e| SsdError::ParseLabel {
            path: path.to_string(),
            line: line_no + 1,
            message: format!("class `{}`: {}", fields[0], e),
        })?;

        let mut values = [0.0f32; 4];
        for (value, field) in values.iter_mut().zip(&fields[1..]) {
            *value = field.parse::<f32>().map_err(|e| SsdError::ParseLabel {
                path: path.to_string(),
                line: line_no + 1,
                message: format!("coordinate `{}`: {}", field, e),
            })?;
        }

        boxes.push(GroundTruthBox::new(
            class_id,
            1.0,
            Vec2::new(values[0], values[1]),
            Vec2::new(values[2], values[3]),
        ));
    }

    Ok(boxes)
}
