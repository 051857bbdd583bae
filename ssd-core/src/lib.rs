pub mod analysis;
pub mod consts;
pub mod detection;
pub mod error;
pub mod inference;

// Re-export commonly used types
pub use analysis::{
    bbox::Bbox,
    decode::{Variance, decode_locations, decode_locations_with_variance},
    labels::ClassNames,
    nms::{NmsConfig, NmsConfigBuilder, suppress},
    postprocess::SsdPostprocessor,
    prior::{PriorTable, SsdSpec},
    truth::{FrameDetectionInfo, GroundTruthBox, iou_center_size_form},
};
pub use detection::element::{DecodedBox, PixelBox, rescale};
pub use error::SsdError;
pub use inference::mobilenet::{model::MobileNetSsd, session::SsdSession};
