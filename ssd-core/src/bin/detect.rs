use std::error::Error;
use std::path::{Path, PathBuf};

use clap::Parser;
use image::GenericImageView;
use serde::Serialize;
use snafu::ResultExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ssd_core::analysis::labels::ClassNames;
use ssd_core::analysis::prior::PriorTable;
use ssd_core::analysis::truth::{FrameDetectionInfo, GroundTruthBox};
use ssd_core::consts::*;
use ssd_core::detection::element::PixelBox;
use ssd_core::error::ImageReadSnafu;
use ssd_core::inference::mobilenet::model::{MobileNetSsd, MobileNetSsdConfig};
use ssd_core::inference::mobilenet::session::SsdSession;
use ssd_core::inference::model::session_builder;

#[derive(Parser)]
#[command(name = "ssd-detect")]
#[command(about = "Run a MobileNet-SSD ONNX model over images and print detections as JSON")]
struct Args {
    #[arg(help = "Path to the ONNX model")]
    model: PathBuf,

    #[arg(help = "Image file, or directory scanned for .jpg files")]
    input: PathBuf,

    #[arg(short, long, help = "Process at most this many images")]
    limit: Option<usize>,

    #[arg(short, long, default_value_t = PROBA_THRESHOLD, help = "Minimum class score")]
    confidence: f32,

    #[arg(long, default_value_t = NMS_IOU_THRESHOLD, help = "Suppression IoU threshold")]
    iou: f32,

    #[arg(long, help = "Class names file, one per line (defaults to COCO-2017)")]
    classes: Option<PathBuf>,

    #[arg(long, help = "Apply softmax to raw class scores")]
    softmax: bool,

    #[arg(
        long,
        help = "Directory of label files named after each image, to score detections against"
    )]
    labels: Option<PathBuf>,

    #[arg(long, default_value_t = 0.5, help = "IoU a detection needs to match a label")]
    match_iou: f32,

    #[arg(long, help = "Input tensor name (read from the graph by default)")]
    input_name: Option<String>,

    #[arg(long, help = "Class score output name (read from the graph by default)")]
    scores_name: Option<String>,

    #[arg(long, help = "Location output name (read from the graph by default)")]
    boxes_name: Option<String>,
}

#[derive(Serialize)]
struct Detection {
    class_name: String,
    #[serde(flatten)]
    pixel: PixelBox,
}

#[derive(Serialize)]
struct FrameReport<'a> {
    image: &'a Path,
    width: u32,
    height: u32,
    detections: Vec<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    true_positives: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ground_truth: Option<usize>,
}

fn collect_images(input: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg"))
        })
        .collect();
    images.sort();

    if let Some(limit) = limit {
        images.truncate(limit);
    }

    Ok(images)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let class_names = match &args.classes {
        Some(path) => ClassNames::from_file(path)?,
        None => ClassNames::coco(),
    };

    let config = MobileNetSsdConfig {
        proba_threshold: args.confidence,
        iou_threshold: args.iou,
        softmax_scores: args.softmax,
        input_name: args.input_name.clone(),
        scores_name: args.scores_name.clone(),
        boxes_name: args.boxes_name.clone(),
        ..Default::default()
    };
    let model = MobileNetSsd::with_config(&args.model, config);
    let mut session = SsdSession::new(session_builder()?, model, PriorTable::mobilenet_ssd())?;

    let images = collect_images(&args.input, args.limit)?;
    if images.is_empty() {
        warn!("No .jpg images found in {}", args.input.display());
    }

    for image_path in &images {
        let image = image::open(image_path).context(ImageReadSnafu {
            path: image_path.to_string_lossy(),
        })?;
        let (width, height) = image.dimensions();

        let start_time = std::time::Instant::now();
        let pixels = session.detect(&image)?;
        info!(
            "{}: {} detections in {}ms",
            image_path.display(),
            pixels.len(),
            start_time.elapsed().as_millis()
        );

        let (true_positives, ground_truth) = match &args.labels {
            Some(labels_dir) => {
                let label_path = labels_dir
                    .join(image_path.file_stem().unwrap_or_default())
                    .with_extension("txt");
                let detected = pixels
                    .iter()
                    .map(|pixel| GroundTruthBox::from_pixel_box(pixel, width, height))
                    .collect();

                let mut frame = FrameDetectionInfo::load(&label_path, image_path, detected)?;
                let matched = frame.match_detections(args.match_iou);
                (Some(matched), Some(frame.ground_truth_boxes.len()))
            }
            None => (None, None),
        };

        let report = FrameReport {
            image: image_path,
            width,
            height,
            detections: pixels
                .iter()
                .map(|pixel| Detection {
                    class_name: class_names.display(pixel.class_id),
                    pixel: *pixel,
                })
                .collect(),
            true_positives,
            ground_truth,
        };

        println!("{}", serde_json::to_string(&report)?);
    }

    info!("Processed {} images", images.len());
    Ok(())
}
