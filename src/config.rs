//! Runtime configuration for the overlay pipeline.
//!
//! The binary maps its command line onto [`PipelineConfig`]; library users
//! build it directly. Defaults carry the constants the pipeline was tuned with.

use crate::composite::CompositeOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Axis order the model expects for its input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputFormat {
    /// `[1, 3, H, W]`
    #[default]
    #[serde(rename = "NCHW")]
    Nchw,
    /// `[1, H, W, 3]`
    #[serde(rename = "NHWC")]
    Nhwc,
}

/// How 8-bit channel values are mapped into model input range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `x / 127.5 - 1`, range [-1, 1]
    #[default]
    SignedUnit,
    /// `x / 255`, range [0, 1]
    UnitRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Model input size as `[height, width]`.
    pub input_shape: [u32; 2],
    pub input_format: InputFormat,
    pub normalization: Normalization,
    /// Name of the graph input the frame tensor is bound to.
    pub input_name: String,
    /// Threshold rank-3 float outputs at 0.5 into background/foreground.
    pub binary: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_shape: [256, 256],
            input_format: InputFormat::Nchw,
            normalization: Normalization::SignedUnit,
            input_name: "x".to_string(),
            binary: false,
        }
    }
}

impl ModelConfig {
    pub fn input_width(&self) -> u32 {
        self.input_shape[1]
    }

    pub fn input_height(&self) -> u32 {
        self.input_shape[0]
    }
}

/// Anchor smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmootherConfig {
    /// Fraction of the remaining distance left after one second; the per-update
    /// factor is `1 - decay_base^dt`.
    pub decay_base: f32,
    /// Position delta (scene units) above which the anchor snaps instead of sliding.
    pub snap_threshold: f32,
    pub min_scale: f32,
    pub max_scale: f32,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            decay_base: 0.001,
            snap_threshold: 0.3,
            min_scale: 0.3,
            max_scale: 1.0,
        }
    }
}

/// Bounds on every wait across the inference boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceTimeouts {
    pub backend_ready: Duration,
    pub poll_interval: Duration,
    pub model_load: Duration,
    pub frame: Duration,
}

impl Default for InferenceTimeouts {
    fn default() -> Self {
        Self {
            backend_ready: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            model_load: Duration::from_secs(30),
            frame: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Tick period; one tick per display refresh.
    pub refresh_interval: Duration,
    /// Extra pause after a failed inference before the next attempt.
    pub failure_backoff: Option<Duration>,
    /// Consecutive failures after which the pipeline reports itself degraded.
    pub failure_threshold: Option<u32>,
    /// Log averaged stage timings every this many rendered frames.
    pub stats_every: u64,
    /// Stop after this many rendered frames.
    pub max_frames: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_micros(16_667),
            failure_backoff: Some(Duration::from_millis(1000)),
            failure_threshold: Some(30),
            stats_every: 30,
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub smoother: SmootherConfig,
    pub timeouts: InferenceTimeouts,
    pub frame_loop: LoopConfig,
    pub composite: CompositeOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.input_width(), 256);
        assert_eq!(config.input_height(), 256);
        assert_eq!(config.input_format, InputFormat::Nchw);
    }

    #[test]
    fn test_input_shape_is_height_then_width() {
        let config = ModelConfig {
            input_shape: [144, 256],
            ..ModelConfig::default()
        };
        assert_eq!(config.input_width(), 256);
        assert_eq!(config.input_height(), 144);
    }
}
