use super::tensor::{Tensor, TensorLedger};
use super::types::{ClassId, SegmentationMask};
use crate::config::{InputFormat, ModelConfig, Normalization};
use crate::error::InferenceError;
use image::{imageops, RgbaImage};
use ndarray::{Array4, ArrayD, Axis, IxDyn};
use std::borrow::Cow;

/// Preprocessor for converting RGBA frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    format: InputFormat,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            target_width: config.input_width(),
            target_height: config.input_height(),
            format: config.input_format,
            normalization: config.normalization,
        }
    }

    /// Preprocess a frame into a normalized batch-of-one tensor
    ///
    /// Steps:
    /// 1. Resize to the model input size
    /// 2. Normalize each RGB channel (alpha is dropped)
    /// 3. Arrange as NCHW or NHWC
    pub fn preprocess(&self, image: &RgbaImage, ledger: &TensorLedger) -> Tensor {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            Cow::Owned(imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            ))
        } else {
            Cow::Borrowed(image)
        };

        let (width, height) = (self.target_width as usize, self.target_height as usize);
        let mut tensor = match self.format {
            InputFormat::Nchw => Array4::<f32>::zeros((1, 3, height, width)),
            InputFormat::Nhwc => Array4::<f32>::zeros((1, height, width, 3)),
        };

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = self.normalize(pixel[c]);
                match self.format {
                    InputFormat::Nchw => tensor[[0, c, y, x]] = value,
                    InputFormat::Nhwc => tensor[[0, y, x, c]] = value,
                }
            }
        }

        ledger.track(tensor.into_dyn())
    }

    /// Zero-filled input of the configured shape, used to warm the model up.
    pub fn zeros(&self, ledger: &TensorLedger) -> Tensor {
        let (width, height) = (self.target_width as usize, self.target_height as usize);
        let shape = match self.format {
            InputFormat::Nchw => [1, 3, height, width],
            InputFormat::Nhwc => [1, height, width, 3],
        };
        ledger.track(ArrayD::zeros(IxDyn(&shape)))
    }

    fn normalize(&self, value: u8) -> f32 {
        match self.normalization {
            Normalization::SignedUnit => value as f32 / 127.5 - 1.0,
            Normalization::UnitRange => value as f32 / 255.0,
        }
    }
}

/// Turn raw model output into a flat label mask.
///
/// Rank-4 outputs carry per-class scores and are reduced by argmax over the
/// class axis (axis 1 for NCHW, 3 for NHWC). Rank-3 outputs are already labels,
/// or foreground probabilities when the model is configured as binary.
pub fn postprocess(
    output: &Tensor,
    config: &ModelConfig,
    ledger: &TensorLedger,
) -> Result<SegmentationMask, InferenceError> {
    let _span = tracing::debug_span!("postprocess").entered();

    let shape = output.shape().to_vec();
    if shape.first() != Some(&1) {
        return Err(InferenceError::InvalidOutput(format!(
            "expected batch of one, got shape {shape:?}"
        )));
    }

    let labels: Tensor = match shape.len() {
        4 => {
            let class_axis = match config.input_format {
                InputFormat::Nchw => 1,
                InputFormat::Nhwc => 3,
            };
            if shape[class_axis] == 0 {
                return Err(InferenceError::InvalidOutput(format!(
                    "no class scores in shape {shape:?}"
                )));
            }
            ledger.track(output.map_axis(Axis(class_axis), |scores| {
                let mut best = 0usize;
                let mut best_score = f32::NEG_INFINITY;
                for (i, &score) in scores.iter().enumerate() {
                    if score > best_score {
                        best = i;
                        best_score = score;
                    }
                }
                best as f32
            }))
        }
        3 => {
            let binary = config.binary;
            ledger.track(output.mapv(|v| {
                if binary {
                    if v > 0.5 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    v.round()
                }
            }))
        }
        rank => {
            return Err(InferenceError::InvalidOutput(format!(
                "unsupported output rank {rank} (shape {shape:?})"
            )))
        }
    };

    let (height, width) = (labels.shape()[1], labels.shape()[2]);
    if width == 0 || height == 0 {
        return Err(InferenceError::InvalidOutput(format!(
            "empty label map {:?}",
            labels.shape()
        )));
    }

    let data: Vec<ClassId> = labels
        .iter()
        .map(|&v| v.clamp(0.0, ClassId::MAX as f32) as ClassId)
        .collect();

    Ok(SegmentationMask::flat(width as u32, height as u32, data))
}
