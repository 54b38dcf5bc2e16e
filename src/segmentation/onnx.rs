use super::types::{InferenceBackend, SegmentationModel};
use crate::config::ModelConfig;
use anyhow::{anyhow, Context, Result};
use ndarray::{ArrayD, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

fn ort_error(err: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("{err}")
}

/// ONNX Runtime backend. `model_url` is a local path, optionally `file://`-prefixed.
pub struct OnnxBackend {
    intra_threads: usize,
}

impl OnnxBackend {
    pub fn new(intra_threads: usize) -> Self {
        Self { intra_threads }
    }
}

impl Default for OnnxBackend {
    fn default() -> Self {
        Self::new(4)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self) -> Result<()> {
        ort::init()
            .with_name("camola")
            .commit()
            .map_err(ort_error)
            .context("Failed to create the ONNX Runtime environment")?;
        tracing::info!("ONNX Runtime environment ready");
        Ok(())
    }

    fn load(
        &mut self,
        model_url: &str,
        config: &ModelConfig,
    ) -> Result<Box<dyn SegmentationModel>> {
        let path = Path::new(model_url.strip_prefix("file://").unwrap_or(model_url));

        tracing::info!("Loading segmentation model from {}", path.display());

        let session = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .with_intra_threads(self.intra_threads)
            .map_err(ort_error)?
            .commit_from_file(path)
            .map_err(ort_error)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        Ok(Box::new(OnnxSegmenter {
            session,
            input_name: config.input_name.clone(),
        }))
    }
}

/// A single-input, single-output segmentation graph.
pub struct OnnxSegmenter {
    session: Session,
    input_name: String,
}

impl SegmentationModel for OnnxSegmenter {
    fn execute(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let _span = tracing::debug_span!("onnx_execute").entered();

        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let value = Tensor::from_array((shape, data)).map_err(ort_error)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => value])
            .map_err(ort_error)
            .context("Failed to run inference")?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(ort_error)
            .context("Model output is not an f32 tensor")?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .context("Output shape does not match its data")
    }
}
