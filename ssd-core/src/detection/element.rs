use glam::Vec2;
use serde::Serialize;

use crate::analysis::bbox::Bbox;

/// A confirmed detection in normalized corner form.
///
/// `bbox` is `(x0, y0, x1, y1)` relative to the model input, so it can not be
/// drawn or compared against the original image until it has been turned
/// into a [`PixelBox`] with [`DecodedBox::rescale`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DecodedBox {
    /// Foreground class id; the background class has already been removed.
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: Bbox,
}

/// A detection in pixel coordinates of the original image.
///
/// `(x, y)` is the top-left corner. The box is not clamped to the image and
/// may extend past its edges.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PixelBox {
    pub class_id: usize,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DecodedBox {
    /// Maps the normalized corners onto an image of the given size and
    /// re-expresses the box as top-left corner plus size.
    ///
    /// # Example
    /// ```
    /// use ssd_core::analysis::bbox::Bbox;
    /// use ssd_core::detection::element::DecodedBox;
    /// let decoded = DecodedBox {
    ///     class_id: 0,
    ///     confidence: 0.9,
    ///     bbox: Bbox::from_corners(0.1, 0.2, 0.5, 0.6),
    /// };
    /// let pixel = decoded.rescale(100, 200);
    /// assert!((pixel.x - 10.0).abs() < 1e-4);
    /// assert!((pixel.height - 80.0).abs() < 1e-4);
    /// ```
    pub fn rescale(&self, image_width: u32, image_height: u32) -> PixelBox {
        let scaled = self
            .bbox
            .scale(Vec2::new(image_width as f32, image_height as f32));

        PixelBox {
            class_id: self.class_id,
            confidence: self.confidence,
            x: scaled.min.x,
            y: scaled.min.y,
            width: scaled.max.x - scaled.min.x,
            height: scaled.max.y - scaled.min.y,
        }
    }
}

/// Rescales every detection of a frame, preserving order.
pub fn rescale(detections: &[DecodedBox], image_width: u32, image_height: u32) -> Vec<PixelBox> {
    detections
        .iter()
        .map(|detection| detection.rescale(image_width, image_height))
        .collect()
}
