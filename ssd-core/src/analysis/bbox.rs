use glam::Vec2;
use serde::Serialize;

use crate::consts::IOU_EPSILON;

/// A 2D axis-aligned bounding box in corner form.
///
/// `min` holds `(x0, y0)` and `max` holds `(x1, y1)`. Decoded SSD locations
/// use this form with all values normalized to `[0, 1]` relative to the
/// model input.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bbox {
    /// The minimum corner `(x0, y0)`.
    pub min: Vec2,
    /// The maximum corner `(x1, y1)`.
    pub max: Vec2,
}

impl Bbox {
    /// Creates a new bounding box from minimum and maximum points.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use ssd_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 5.0));
    /// assert_eq!(bbox.area(), 50.0);
    /// ```
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Creates a bounding box from the four values of a corner-form buffer
    /// slot, `[x0, y0, x1, y1]`.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            min: Vec2::new(x0, y0),
            max: Vec2::new(x1, y1),
        }
    }

    /// Creates a new bounding box from a center point and size vector.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use ssd_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::from_center_size(Vec2::new(100.0, 200.0), Vec2::new(50.0, 80.0));
    /// assert_eq!(bbox.min, Vec2::new(75.0, 160.0));
    /// assert_eq!(bbox.max, Vec2::new(125.0, 240.0));
    /// ```
    pub fn from_center_size(center: Vec2, size: Vec2) -> Self {
        let half_size = size / 2.0;
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Width and height of the box, each clamped to be non-negative.
    ///
    /// A box whose `max` corner lies before its `min` corner on some axis has
    /// zero extent on that axis.
    pub fn size(&self) -> Vec2 {
        (self.max - self.min).max(Vec2::ZERO)
    }

    /// Calculates the area of the bounding box.
    ///
    /// Inverted boxes have an area of zero rather than a negative one.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use ssd_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::new(Vec2::ZERO, Vec2::new(4.0, 3.0));
    /// assert_eq!(bbox.area(), 12.0);
    ///
    /// let inverted = Bbox::new(Vec2::new(4.0, 3.0), Vec2::ZERO);
    /// assert_eq!(inverted.area(), 0.0);
    /// ```
    pub fn area(&self) -> f32 {
        let size = self.size();

        size.x * size.y
    }

    /// Calculates the center point of the bounding box.
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) / 2.0
    }

    /// Calculates the area of intersection between this bounding box and another.
    ///
    /// The overlap rectangle spans from the maximum of the two minimum corners
    /// to the minimum of the two maximum corners. Negative extents are clamped
    /// to zero, so disjoint or edge-touching boxes intersect in `0.0`.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use ssd_core::analysis::bbox::Bbox;
    /// let bbox1 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
    /// let bbox2 = Bbox::new(Vec2::new(2.0, 2.0), Vec2::new(6.0, 6.0));
    /// assert_eq!(bbox1.intersection(&bbox2), 4.0);
    /// ```
    pub fn intersection(&self, other: &Self) -> f32 {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        let overlap = (max - min).max(Vec2::ZERO);

        overlap.x * overlap.y
    }

    /// Intersection over Union of two corner-form boxes.
    ///
    /// Both boxes are read as two opposite corners `(x0, y0, x1, y1)`. The
    /// denominator carries [`IOU_EPSILON`] so that degenerate boxes yield `0.0`
    /// instead of dividing by zero. As a consequence the IoU of a box with
    /// itself is slightly below `1.0`.
    ///
    /// This is the formula used by the suppressor. Ground-truth boxes in
    /// center/size form use
    /// [`iou_center_size_form`](crate::analysis::truth::iou_center_size_form)
    /// instead; the two are not interchangeable.
    ///
    /// # Formula
    /// IoU = Intersection / (Area1 + Area2 - Intersection + ε)
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use ssd_core::analysis::bbox::Bbox;
    /// let bbox1 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
    /// let bbox2 = Bbox::new(Vec2::new(2.0, 2.0), Vec2::new(6.0, 6.0));
    /// assert!((bbox1.iou_corner_form(&bbox2) - 4.0 / 28.0).abs() < 1e-5);
    /// ```
    pub fn iou_corner_form(&self, other: &Self) -> f32 {
        let intersection_area = self.intersection(other);

        intersection_area / (self.area() + other.area() - intersection_area + IOU_EPSILON)
    }

    /// Scales both corners by a per-axis factor.
    ///
    /// Used to move normalized coordinates into pixel space.
    pub fn scale(&self, factor: Vec2) -> Self {
        Self {
            min: self.min * factor,
            max: self.max * factor,
        }
    }

    /// The four corner values in `[x0, y0, x1, y1]` order.
    pub fn to_array(&self) -> [f32; 4] {
        [self.min.x, self.min.y, self.max.x, self.max.y]
    }
}
