mod analyze;
#[cfg(feature = "onnx")]
mod onnx;
mod palette;
mod preprocess;
mod tensor;
pub mod types;

pub use analyze::{analyze_mask, Centroid, Extent, MaskAnalysis};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxBackend, OnnxSegmenter};
pub use palette::{ClassInfo, ClassPalette};
pub use preprocess::{postprocess, Preprocessor};
pub use tensor::{Tensor, TensorLedger};
pub use types::{
    ClassId, InferenceBackend, MaskData, SegmentationMask, SegmentationModel, BACKGROUND,
};

/// Create the default inference backend (ONNX Runtime)
#[cfg(feature = "onnx")]
pub fn create_default_backend() -> Box<dyn InferenceBackend> {
    Box::new(OnnxBackend::default())
}
