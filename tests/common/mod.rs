//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use camola::capture::{CaptureSource, Frame, ReadyState};
use camola::config::{InferenceTimeouts, ModelConfig};
use camola::output::OutputSink;
use camola::placement::ScenePlacement;
use camola::segmentation::{InferenceBackend, SegmentationModel};
use image::{Rgba, RgbaImage};
use ndarray::{ArrayD, IxDyn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MASK_SIZE: usize = 4;

/// What the scripted model does on its next execution.
#[derive(Debug, Clone)]
pub enum Step {
    /// Class 1 in the top-left 2x2 cells of a 4x4 label map.
    Subject,
    /// All background.
    Empty,
    /// Output of an unsupported rank.
    Malformed,
    /// Runtime error.
    Fail,
    /// `Subject`, after sleeping.
    Slow(Duration),
}

/// Observations shared between a test and the model on the worker thread.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    pub steps: Arc<Mutex<VecDeque<Step>>>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub executions: Arc<AtomicUsize>,
    pub loads: Arc<AtomicUsize>,
}

impl Probe {
    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.steps.lock().unwrap().extend(steps);
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

pub fn subject_labels() -> ArrayD<f32> {
    let mut labels = ArrayD::zeros(IxDyn(&[1, MASK_SIZE, MASK_SIZE]));
    for y in 0..2 {
        for x in 0..2 {
            labels[[0, y, x]] = 1.0;
        }
    }
    labels
}

struct ScriptedModel {
    probe: Probe,
}

impl SegmentationModel for ScriptedModel {
    fn execute(&mut self, _input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let now = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(now, Ordering::SeqCst);
        self.probe.executions.fetch_add(1, Ordering::SeqCst);

        let step = self.probe.steps.lock().unwrap().pop_front().unwrap_or(Step::Subject);
        let result = match step {
            Step::Subject => Ok(subject_labels()),
            Step::Empty => Ok(ArrayD::zeros(IxDyn(&[1, MASK_SIZE, MASK_SIZE]))),
            Step::Malformed => Ok(ArrayD::zeros(IxDyn(&[1, 2]))),
            Step::Fail => Err(anyhow!("scripted failure")),
            Step::Slow(delay) => {
                std::thread::sleep(delay);
                Ok(subject_labels())
            }
        };

        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    pub probe: Probe,
    pub init_delay: Option<Duration>,
    pub init_fails: bool,
}

impl ScriptedBackend {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            ..Self::default()
        }
    }
}

impl InferenceBackend for ScriptedBackend {
    fn initialize(&mut self) -> Result<()> {
        if let Some(delay) = self.init_delay {
            std::thread::sleep(delay);
        }
        if self.init_fails {
            bail!("no accelerator");
        }
        Ok(())
    }

    fn load(
        &mut self,
        model_url: &str,
        _config: &ModelConfig,
    ) -> Result<Box<dyn SegmentationModel>> {
        if model_url.starts_with("missing") {
            bail!("model not found: {model_url}");
        }
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel {
            probe: self.probe.clone(),
        }))
    }
}

pub fn model_config() -> ModelConfig {
    ModelConfig {
        input_shape: [MASK_SIZE as u32, MASK_SIZE as u32],
        ..ModelConfig::default()
    }
}

pub fn fast_timeouts() -> InferenceTimeouts {
    InferenceTimeouts {
        backend_ready: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
        model_load: Duration::from_secs(5),
        frame: Duration::from_secs(5),
    }
}

/// 8x8 source: red in the top-left quadrant, blue elsewhere.
pub fn source_image() -> RgbaImage {
    RgbaImage::from_fn(8, 8, |x, y| {
        if x < 4 && y < 4 {
            Rgba([200, 10, 10, 255])
        } else {
            Rgba([10, 10, 200, 255])
        }
    })
}

pub struct StillSource {
    pub granted: bool,
    open: bool,
    stops: Arc<AtomicUsize>,
}

impl StillSource {
    pub fn new(granted: bool) -> Self {
        Self {
            granted,
            open: false,
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stops(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stops)
    }
}

impl CaptureSource for StillSource {
    fn setup(&mut self) -> Result<bool> {
        self.open = self.granted;
        Ok(self.granted)
    }

    fn ready_state(&self) -> ReadyState {
        if self.open {
            ReadyState::CurrentData
        } else {
            ReadyState::Nothing
        }
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        Ok(Frame::new(source_image()))
    }

    fn resolution(&self) -> (u32, u32) {
        (8, 8)
    }

    fn stop(&mut self) {
        self.open = false;
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub frames: Arc<Mutex<Vec<RgbaImage>>>,
    pub broken: bool,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn frame(&self, index: usize) -> RgbaImage {
        self.frames.lock().unwrap()[index].clone()
    }
}

impl OutputSink for RecordingSink {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        if self.broken {
            bail!("surface lost");
        }
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (8, 8)
    }
}

#[derive(Debug, Default)]
pub struct RecordingPlacement {
    pub updates: Vec<(f32, f32, f32)>,
    pub resets: usize,
    pub interaction: bool,
    pub size: Option<(u32, u32)>,
}

impl ScenePlacement for RecordingPlacement {
    fn update_model_position(&mut self, x: f32, y: f32, scale: f32) {
        self.updates.push((x, y, scale));
    }

    fn reset_model_transform(&mut self) {
        self.resets += 1;
    }

    fn enable_interaction(&mut self) {
        self.interaction = true;
    }

    fn disable_interaction(&mut self) {
        self.interaction = false;
    }

    fn update_size(&mut self, width: u32, height: u32) {
        self.size = Some((width, height));
    }
}
