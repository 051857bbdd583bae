use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SsdError {
    #[snafu(display(
        "Length mismatch at stage `{}`: expected {} values, got {}",
        stage,
        expected,
        actual
    ))]
    LengthMismatch {
        stage: String,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("Invalid shape at stage `{}`: {}", stage, message))]
    InvalidShape { stage: String, message: String },
    #[snafu(display("Ort Session init stage `{}` error: {}", stage, source))]
    OrtInit {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Build Tensor for `{}` error: {}", stage, source))]
    Tensor {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Onnx Inference error: {}", source))]
    Inference { source: ort::error::Error },
    #[snafu(display("Onnx Output can not found {}", output_name))]
    NotFoundOutput { output_name: String },
    #[snafu(display("Onnx Input can not found {}", input_name))]
    NotFoundInput { input_name: String },
    #[snafu(display("Ndarray Shape error at stage `{}`: {}", stage, source))]
    Shape {
        source: ndarray::ShapeError,
        stage: String,
    },
    #[snafu(display("Image Read `{}` error: {}", path, source))]
    ImageRead {
        source: image::ImageError,
        path: String,
    },
    #[snafu(display("Read `{}` error: {}", path, source))]
    IoRead {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Parse label `{}` line {} error: {}", path, line, message))]
    ParseLabel {
        path: String,
        line: usize,
        message: String,
    },
}
