use std::path::Path;

use image::DynamicImage;
use ort::{
    execution_providers::CPUExecutionProvider,
    session::{
        Session,
        builder::{GraphOptimizationLevel, SessionBuilder},
    },
};
use snafu::ResultExt;

use crate::error::{OrtInitSnafu, SsdError};

pub trait Model {
    type Input;
    type Output;
    type Config;

    const INPUT_NAME: &'static str;
    const OUTPUT_NAMES: &'static [&'static str];
    const MODEL_NAME: &'static str;

    /// Location of the ONNX graph on disk.
    fn path(&self) -> &Path;
    fn config(&self) -> &Self::Config;
}

pub trait OnnxSession<M: Model> {
    type Output;
    type Extra;

    fn preprocess(&self, image: &DynamicImage) -> Result<M::Input, SsdError>;

    fn postprocess(&self, output: M::Output, extra: Self::Extra)
    -> Result<Self::Output, SsdError>;

    fn infer(
        &mut self,
        input: M::Input,
        input_name: &str,
        output_names: &[&str],
    ) -> Result<M::Output, SsdError>;

    fn run(&mut self, image: &DynamicImage, extra: Self::Extra) -> Result<Self::Output, SsdError> {
        let input = self.preprocess(image)?;

        let output = self.infer(input, M::INPUT_NAME, M::OUTPUT_NAMES)?;

        self.postprocess(output, extra)
    }
}

/// common session builder
pub fn session_builder() -> Result<SessionBuilder, SsdError> {
    let session_builder = Session::builder()
        .context(OrtInitSnafu { stage: "builder" })?
        .with_execution_providers(vec![
            #[cfg(all(feature = "coreml", target_os = "macos"))]
            {
                use ort::execution_providers::CoreMLExecutionProvider;
                use ort::execution_providers::coreml::*;
                CoreMLExecutionProvider::default()
                    .with_model_format(CoreMLModelFormat::MLProgram)
                    .build()
            },
            #[cfg(feature = "cuda")]
            {
                use ort::execution_providers::CUDAExecutionProvider;
                CUDAExecutionProvider::default().build()
            },
            CPUExecutionProvider::default().build(),
        ])
        .context(OrtInitSnafu { stage: "provider" })?
        .with_optimization_level(GraphOptimizationLevel::Level1)
        .context(OrtInitSnafu {
            stage: "optimization",
        })?
        .with_intra_threads(4)
        .context(OrtInitSnafu {
            stage: "intra-threads",
        })?;

    Ok(session_builder)
}
