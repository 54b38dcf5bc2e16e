//! Live segmentation overlay: camera frames in, a segmented composite with a
//! tracked object anchor out.

pub mod anchor;
pub mod capture;
pub mod composite;
pub mod config;
pub mod error;
pub mod inference;
pub mod output;
pub mod pipeline;
pub mod placement;
pub mod segmentation;

pub use anchor::{Anchor, AnchorSmoother};
pub use composite::{composite, CompositeMode, CompositeOptions, CutoutBackground};
pub use config::{
    InferenceTimeouts, InputFormat, LoopConfig, ModelConfig, Normalization, PipelineConfig,
    SmootherConfig,
};
pub use error::{InferenceError, LoadError, PipelineError};
pub use inference::{ChannelState, InferenceChannel, Ticket};
pub use pipeline::{FrameLoop, LoopHandle, PipelineState, TickOutcome};
pub use placement::{MarkerPlacement, ScenePlacement};
pub use segmentation::{analyze_mask, MaskAnalysis, MaskData, SegmentationMask};
