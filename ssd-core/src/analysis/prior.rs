//! Anchor ("prior") generation for the multi-scale SSD grid.

use std::sync::OnceLock;

use glam::Vec2;
use tracing::debug;

use crate::consts::{IMAGE_SIZE, MOBILENET_SSD_SPECS, N_COORDS, PRIORS_PER_CELL};

/// One level of the anchor pyramid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SsdSpec {
    /// Side length of the square feature map, in cells.
    pub feature_size: usize,
    /// Stride of one cell in input pixels.
    pub shrinkage: f32,
    pub box_width: f32,
    pub box_height: f32,
    /// Aspect-ratio numerators; each yields a wide and a tall prior.
    pub ratio1: f32,
    pub ratio2: f32,
}

impl SsdSpec {
    pub const fn new(
        feature_size: usize,
        shrinkage: f32,
        box_width: f32,
        box_height: f32,
        ratio1: f32,
        ratio2: f32,
    ) -> Self {
        Self {
            feature_size,
            shrinkage,
            box_width,
            box_height,
            ratio1,
            ratio2,
        }
    }

    pub const fn prior_count(&self) -> usize {
        self.feature_size * self.feature_size * PRIORS_PER_CELL
    }
}

/// A single prior in center/size form, normalized to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prior {
    pub center: Vec2,
    pub size: Vec2,
}

/// The immutable table of priors, stored flat as
/// `[center_x, center_y, width, height]` per prior.
///
/// Built once and passed by reference to everything that decodes locations.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorTable {
    data: Box<[f32]>,
}

static MOBILENET_SSD_PRIORS: OnceLock<PriorTable> = OnceLock::new();

impl PriorTable {
    /// Generates the priors of every level, in the given order.
    ///
    /// Within a level cells are visited row-major and each cell emits, in
    /// order: the small square, the large square, then a wide and a tall
    /// variant of the small square for `ratio1` and for `ratio2`. Every
    /// coordinate is clamped to `[0, 1]` afterwards.
    pub fn generate(specs: &[SsdSpec], image_size: f32) -> Self {
        let n_priors: usize = specs.iter().map(SsdSpec::prior_count).sum();
        let mut data = Vec::with_capacity(n_priors * N_COORDS);

        for spec in specs {
            let scale = image_size / spec.shrinkage;
            let min_dim = spec.box_width.min(spec.box_height);
            let max_dim = spec.box_width.max(spec.box_height);

            let small = min_dim / image_size;
            let large = (max_dim * min_dim).sqrt() / image_size;
            let ratio1 = spec.ratio1.sqrt();
            let ratio2 = spec.ratio2.sqrt();

            let shapes = [
                (small, small),
                (large, large),
                (small * ratio1, small / ratio1),
                (small / ratio1, small * ratio1),
                (small * ratio2, small / ratio2),
                (small / ratio2, small * ratio2),
            ];

            for j in 0..spec.feature_size {
                for k in 0..spec.feature_size {
                    let x_center = (k as f32 + 0.5) / scale;
                    let y_center = (j as f32 + 0.5) / scale;

                    for (w, h) in shapes {
                        data.extend_from_slice(&[x_center, y_center, w, h]);
                    }
                }
            }
        }

        for value in data.iter_mut() {
            *value = value.clamp(0.0, 1.0);
        }

        debug!("Generated {} priors from {} specs", n_priors, specs.len());

        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// The priors of the 512×512 MobileNet-SSD model, built on first use and
    /// shared for the rest of the process.
    pub fn mobilenet_ssd() -> &'static PriorTable {
        MOBILENET_SSD_PRIORS.get_or_init(|| Self::generate(&MOBILENET_SSD_SPECS, IMAGE_SIZE))
    }

    /// Number of priors in the table.
    pub fn len(&self) -> usize {
        self.data.len() / N_COORDS
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Prior> {
        let chunk = self.data.get(index * N_COORDS..(index + 1) * N_COORDS)?;

        Some(Prior {
            center: Vec2::new(chunk[0], chunk[1]),
            size: Vec2::new(chunk[2], chunk[3]),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Prior> + '_ {
        self.data.chunks_exact(N_COORDS).map(|chunk| Prior {
            center: Vec2::new(chunk[0], chunk[1]),
            size: Vec2::new(chunk[2], chunk[3]),
        })
    }

    /// The flat buffer, `4 * len()` values long.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl From<Vec<f32>> for PriorTable {
    /// Wraps an existing flat buffer. Trailing values that do not form a
    /// whole prior are kept, and make decoding fail with a length mismatch.
    fn from(data: Vec<f32>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }
}
