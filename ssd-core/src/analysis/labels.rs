use std::{fs, path::Path};

use snafu::ResultExt;

use crate::error::{IoReadSnafu, SsdError};

/// COCO-2017 foreground classes, in the order the detector numbers them.
pub const COCO_2017: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorbike",
    "aeroplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "sofa",
    "pottedplant",
    "bed",
    "diningtable",
    "toilet",
    "tvmonitor",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Human readable names of the foreground classes, indexed by the class id
/// carried by detections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    pub fn coco() -> Self {
        Self {
            names: COCO_2017.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// Reads a class file with one name per line. Blank lines are kept so
    /// the line number stays the class id.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SsdError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context(IoReadSnafu {
            path: path.to_string_lossy(),
        })?;

        Ok(Self::parse(&content))
    }

    fn parse(content: &str) -> Self {
        Self {
            names: content
                .lines()
                .map(|line| line.trim_end_matches('\r').to_string())
                .collect(),
        }
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    /// The class name, or `class {id}` for ids past the end of the table
    /// and for blank lines in a class file.
    pub fn display(&self, class_id: usize) -> String {
        self.name(class_id)
            .filter(|name| !name.trim().is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("class {}", class_id))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ClassNames {
    fn default() -> Self {
        Self::coco()
    }
}
