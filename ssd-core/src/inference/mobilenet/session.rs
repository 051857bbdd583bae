use image::{DynamicImage, GenericImageView, imageops::FilterType};
use ndarray::prelude::*;
use ort::{
    session::{Session, builder::SessionBuilder},
    value::TensorRef,
};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, info};

use crate::{
    analysis::{postprocess::SsdPostprocessor, prior::PriorTable},
    consts::{BOXES_OUTPUT_NAME, INPUT_NAME, N_COORDS, SCORES_OUTPUT_NAME},
    detection::element::PixelBox,
    error::*,
    inference::{
        mobilenet::model::{MobileNetSsd, MobileNetSsdConfig, MobileNetSsdOutput},
        model::{Model, OnnxSession},
    },
};

pub struct SsdSession<'a, M: Model> {
    session: Session,
    model: M,
    priors: &'a PriorTable,
    names: TensorNames,
}

/// Graph tensors the session feeds and reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorNames {
    pub input: String,
    pub scores: String,
    pub boxes: String,
}

/// Size of the frame before it was resized for the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl<'a> SsdSession<'a, MobileNetSsd> {
    pub fn new(
        session: SessionBuilder,
        model: MobileNetSsd,
        priors: &'a PriorTable,
    ) -> Result<Self, SsdError> {
        let session = session
            .commit_from_file(model.path())
            .context(OrtInitSnafu { stage: "commit" })?;

        let inputs: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
        let outputs: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        let names = resolve_tensor_names(&inputs, &outputs, model.config())?;

        info!(
            "Loaded {} from {} with {} priors, tensors {} -> ({}, {})",
            MobileNetSsd::MODEL_NAME,
            model.path().display(),
            priors.len(),
            names.input,
            names.scores,
            names.boxes
        );

        Ok(Self {
            session,
            model,
            priors,
            names,
        })
    }

    pub fn tensor_names(&self) -> &TensorNames {
        &self.names
    }

    /// Detects objects in one frame, in pixel coordinates of `image`.
    pub fn detect(&mut self, image: &DynamicImage) -> Result<Vec<PixelBox>, SsdError> {
        let (width, height) = image.dimensions();
        self.run(image, ImageSize { width, height })
    }
}

/// Picks the input and both head tensors out of the names a graph declares.
///
/// A name set in the config must exist in the graph. Otherwise the
/// conventional name is used when the graph has it, and the tensor at the
/// head's position (input 0, scores 0, boxes 1) when it does not.
pub fn resolve_tensor_names(
    inputs: &[&str],
    outputs: &[&str],
    config: &MobileNetSsdConfig,
) -> Result<TensorNames, SsdError> {
    ensure!(
        !inputs.is_empty(),
        InvalidShapeSnafu {
            stage: "names",
            message: "graph has no inputs",
        }
    );
    ensure!(
        outputs.len() >= 2,
        InvalidShapeSnafu {
            stage: "names",
            message: format!("expected two outputs, graph has {}", outputs.len()),
        }
    );

    let input = select_tensor(inputs, config.input_name.as_deref(), INPUT_NAME, 0).context(
        NotFoundInputSnafu {
            input_name: config.input_name.as_deref().unwrap_or_default(),
        },
    )?;
    let scores = select_tensor(outputs, config.scores_name.as_deref(), SCORES_OUTPUT_NAME, 0)
        .context(NotFoundOutputSnafu {
            output_name: config.scores_name.as_deref().unwrap_or_default(),
        })?;
    let boxes = select_tensor(outputs, config.boxes_name.as_deref(), BOXES_OUTPUT_NAME, 1)
        .context(NotFoundOutputSnafu {
            output_name: config.boxes_name.as_deref().unwrap_or_default(),
        })?;

    Ok(TensorNames {
        input,
        scores,
        boxes,
    })
}

fn select_tensor(
    names: &[&str],
    configured: Option<&str>,
    conventional: &str,
    position: usize,
) -> Option<String> {
    match configured {
        Some(name) => names.iter().find(|&&n| n == name),
        None => names
            .iter()
            .find(|&&n| n == conventional)
            .or_else(|| names.get(position)),
    }
    .map(|name| name.to_string())
}

/// Resizes to the model resolution and normalizes into an NCHW tensor.
pub fn preprocess_image(image: &DynamicImage, config: &MobileNetSsdConfig) -> Array4<f32> {
    let resized_img = image
        .resize_exact(
            config.required_width,
            config.required_height,
            FilterType::Triangle,
        )
        .to_rgb8();

    let mut input_tensor = Array4::zeros([
        config.batch_size,
        config.input_channels,
        config.required_height as usize,
        config.required_width as usize,
    ]);

    for (x, y, pixel) in resized_img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        for (channel, value) in pixel.0.iter().enumerate() {
            input_tensor[[0, channel, y, x]] = (*value as f32 - config.pixel_mean) / config.pixel_std;
        }
    }

    input_tensor
}

/// Drops the batch axis of both heads and flattens them, returning
/// `(scores, locations, class_count)`.
pub fn flatten_outputs(
    output: &MobileNetSsdOutput,
) -> Result<(Vec<f32>, Vec<f32>, usize), SsdError> {
    let (batch, n_priors, class_count) = output.scores.dim();
    let (box_batch, box_priors, coords) = output.boxes.dim();

    ensure!(
        batch > 0 && box_batch > 0,
        InvalidShapeSnafu {
            stage: "output",
            message: "empty batch",
        }
    );
    ensure!(
        coords == N_COORDS,
        InvalidShapeSnafu {
            stage: "output",
            message: format!("expected {} coordinates per box, got {}", N_COORDS, coords),
        }
    );
    ensure!(
        box_priors == n_priors,
        LengthMismatchSnafu {
            stage: "output",
            expected: n_priors,
            actual: box_priors,
        }
    );

    let scores = output.scores.index_axis(Axis(0), 0).iter().copied().collect();
    let locations = output.boxes.index_axis(Axis(0), 0).iter().copied().collect();

    Ok((scores, locations, class_count))
}

impl OnnxSession<MobileNetSsd> for SsdSession<'_, MobileNetSsd> {
    type Output = Vec<PixelBox>;
    type Extra = ImageSize;

    fn preprocess(
        &self,
        image: &DynamicImage,
    ) -> Result<<MobileNetSsd as Model>::Input, SsdError> {
        Ok(preprocess_image(image, self.model.config()))
    }

    fn postprocess(
        &self,
        output: <MobileNetSsd as Model>::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output, SsdError> {
        let config = self.model.config();
        let (scores, locations, class_count) = flatten_outputs(&output)?;

        let detections = SsdPostprocessor::new(self.priors)
            .with_nms(config.nms())
            .with_variance(config.variance)
            .with_softmax(config.softmax_scores)
            .run(&scores, &locations, class_count, extra.width, extra.height)?;

        debug!(
            "Found {} detections in {}x{} frame",
            detections.len(),
            extra.width,
            extra.height
        );

        Ok(detections)
    }

    fn run(&mut self, image: &DynamicImage, extra: Self::Extra) -> Result<Self::Output, SsdError> {
        let input = self.preprocess(image)?;

        let names = self.names.clone();
        let output = self.infer(
            input,
            &names.input,
            &[names.scores.as_str(), names.boxes.as_str()],
        )?;

        self.postprocess(output, extra)
    }

    fn infer(
        &mut self,
        input: <MobileNetSsd as Model>::Input,
        input_name: &str,
        output_names: &[&str],
    ) -> Result<<MobileNetSsd as Model>::Output, SsdError> {
        let &[scores_name, boxes_name] = output_names else {
            return InvalidShapeSnafu {
                stage: "infer",
                message: format!("expected two output names, got {}", output_names.len()),
            }
            .fail();
        };

        let output = self
            .session
            .run(ort::inputs![
                input_name => TensorRef::from_array_view(&input).context(TensorSnafu{stage: "input"})?
            ])
            .context(InferenceSnafu {})?;

        let scores = output
            .get(scores_name)
            .context(NotFoundOutputSnafu {
                output_name: scores_name,
            })?
            .try_extract_array::<f32>()
            .context(TensorSnafu { stage: "extract" })?
            .into_dimensionality::<Ix3>()
            .context(ShapeSnafu { stage: "scores" })?
            .to_owned();

        let boxes = output
            .get(boxes_name)
            .context(NotFoundOutputSnafu {
                output_name: boxes_name,
            })?
            .try_extract_array::<f32>()
            .context(TensorSnafu { stage: "extract" })?
            .into_dimensionality::<Ix3>()
            .context(ShapeSnafu { stage: "boxes" })?
            .to_owned();

        Ok(MobileNetSsdOutput { scores, boxes })
    }
}
