pub mod bbox;
pub mod decode;
pub mod labels;
pub mod nms;
pub mod postprocess;
pub mod prior;
pub mod softmax;
pub mod truth;
