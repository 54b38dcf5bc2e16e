//! The real-time frame loop.
//!
//! One tick per display refresh: capture, segment on the worker, analyse the
//! mask, move the anchor, composite and present. Transient inference failures
//! keep the loop alive and redraw the last good mask.

mod fps;

pub use fps::FpsCounter;

use crate::anchor::{Anchor, AnchorSmoother};
use crate::capture::{CaptureSource, Frame, SourceManager};
use crate::composite::{composite, CompositeOptions};
use crate::config::{LoopConfig, ModelConfig, PipelineConfig};
use crate::error::{InferenceError, PipelineError};
use crate::inference::InferenceChannel;
use crate::output::OutputSink;
use crate::placement::ScenePlacement;
use crate::segmentation::{analyze_mask, ClassPalette, SegmentationMask};
use image::RgbaImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    Run,
    Pause,
    Stop,
}

/// Remote control for a running [`FrameLoop`].
#[derive(Debug, Clone)]
pub struct LoopHandle {
    control: Arc<watch::Sender<LoopCommand>>,
}

impl LoopHandle {
    pub fn pause(&self) {
        self.control.send_replace(LoopCommand::Pause);
    }

    pub fn resume(&self) {
        self.control.send_if_modified(|command| {
            if *command == LoopCommand::Pause {
                *command = LoopCommand::Run;
                true
            } else {
                false
            }
        });
    }

    pub fn stop(&self) {
        self.control.send_replace(LoopCommand::Stop);
    }
}

/// What the loop knows about itself between ticks.
#[derive(Debug, Default)]
pub struct PipelineState {
    /// Mask of the most recent successful inference, redrawn while inference fails.
    pub last_good_mask: Option<SegmentationMask>,
    pub is_model_ready: bool,
    pub consecutive_failure_count: u32,
    pub running: bool,
    /// Failures reached the configured threshold; cleared by the next success.
    pub degraded: bool,
    pub frames_rendered: u64,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Guards failed; nothing was drawn.
    Skipped,
    /// Fresh mask; `detected` tells whether the anchor moved.
    Rendered { detected: bool },
    /// Inference failed; the last good mask (or plain video) was drawn.
    Recovered,
}

#[derive(Debug, Default)]
struct StageTimings {
    frames: u64,
    capture: Duration,
    segment: Duration,
    composite: Duration,
    output: Duration,
}

impl StageTimings {
    fn log(&self, fps: f32) {
        let frames = self.frames.max(1) as f64;
        let avg = |d: Duration| d.as_secs_f64() * 1000.0 / frames;
        let (capture_ms, segment_ms, composite_ms, output_ms) = (
            avg(self.capture),
            avg(self.segment),
            avg(self.composite),
            avg(self.output),
        );
        tracing::info!(
            "Frame {}: capture={:.1}ms, segment={:.1}ms, composite={:.1}ms, \
             output={:.1}ms, total={:.1}ms, fps={:.1}",
            self.frames,
            capture_ms,
            segment_ms,
            composite_ms,
            output_ms,
            capture_ms + segment_ms + composite_ms + output_ms,
            fps
        );
    }
}

enum LoopEvent {
    Tick(Instant),
    Control,
}

pub struct FrameLoop<C, O, P> {
    sources: SourceManager<C>,
    channel: InferenceChannel,
    output: O,
    placement: P,
    smoother: AnchorSmoother,
    palette: ClassPalette,
    options: CompositeOptions,
    config: LoopConfig,
    state: PipelineState,
    fps: FpsCounter,
    timings: StageTimings,
    control_tx: Arc<watch::Sender<LoopCommand>>,
    control: watch::Receiver<LoopCommand>,
}

impl<C, O, P> FrameLoop<C, O, P>
where
    C: CaptureSource,
    O: OutputSink,
    P: ScenePlacement,
{
    pub fn new(
        source: C,
        channel: InferenceChannel,
        output: O,
        placement: P,
        config: &PipelineConfig,
    ) -> Self {
        let (control_tx, control) = watch::channel(LoopCommand::Run);
        let smoother = AnchorSmoother::new(config.smoother, placement.base_scale());
        Self {
            sources: SourceManager::new(source),
            channel,
            output,
            placement,
            smoother,
            palette: ClassPalette::default(),
            options: config.composite.clone(),
            config: config.frame_loop,
            state: PipelineState::default(),
            fps: FpsCounter::new(),
            timings: StageTimings::default(),
            control_tx: Arc::new(control_tx),
            control,
        }
    }

    pub fn with_palette(mut self, palette: ClassPalette) -> Self {
        self.palette = palette;
        self
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            control: Arc::clone(&self.control_tx),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn placement(&self) -> &P {
        &self.placement
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn smoother(&self) -> &AnchorSmoother {
        &self.smoother
    }

    pub fn channel(&self) -> &InferenceChannel {
        &self.channel
    }

    pub fn fps(&self) -> f32 {
        self.fps.fps()
    }

    pub fn options_mut(&mut self) -> &mut CompositeOptions {
        &mut self.options
    }

    /// Let manual gestures take over placement, or hand it back.
    pub fn set_interaction_enabled(&mut self, enabled: bool) {
        self.smoother.set_interaction_enabled(enabled);
        if enabled {
            self.placement.enable_interaction();
        } else {
            self.placement.disable_interaction();
        }
    }

    /// A manual gesture moved the object; automatic placement stops until
    /// [`reset_placement`](Self::reset_placement).
    pub fn record_user_gesture(&mut self) {
        self.smoother.record_user_gesture();
    }

    pub fn reset_placement(&mut self) {
        self.smoother.reset();
        self.placement.reset_model_transform();
    }

    /// Acquire the source, size the surfaces and load the model.
    pub async fn prepare(
        &mut self,
        model_url: &str,
        model_config: &ModelConfig,
    ) -> Result<(), PipelineError> {
        if !self.sources.setup().map_err(PipelineError::Source)? {
            return Err(PipelineError::CameraUnavailable);
        }
        let (width, height) = self.sources.surface_size();
        self.placement.update_size(width, height);

        self.channel.load_model(model_url, model_config).await?;
        self.state.is_model_ready = true;
        Ok(())
    }

    /// Prepare, then run until stopped.
    pub async fn start(
        &mut self,
        model_url: &str,
        model_config: &ModelConfig,
    ) -> Result<(), PipelineError> {
        self.prepare(model_url, model_config).await?;
        self.run().await
    }

    /// Drive ticks until stopped, then dispose.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        let refresh = self.config.refresh_interval;
        let mut interval = tokio::time::interval(refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick: Option<Instant> = None;

        self.state.running = true;
        tracing::info!("Starting frame loop");

        let result = loop {
            let command = *self.control.borrow_and_update();
            match command {
                LoopCommand::Stop => break Ok(()),
                LoopCommand::Pause => {
                    if self.state.running {
                        tracing::info!("Frame loop paused");
                        self.state.running = false;
                    }
                    last_tick = None;
                    let _ = self.control.changed().await;
                    continue;
                }
                LoopCommand::Run => {
                    if !self.state.running {
                        tracing::info!("Frame loop resumed");
                        self.state.running = true;
                    }
                }
            }

            let event = tokio::select! {
                now = interval.tick() => LoopEvent::Tick(now.into_std()),
                _ = self.control.changed() => LoopEvent::Control,
            };
            let LoopEvent::Tick(now) = event else {
                continue;
            };

            let dt = last_tick.map_or(refresh, |prev| now.saturating_duration_since(prev));
            last_tick = Some(now);

            // A command landing mid-tick drops the tick; dispose discards its late answer
            let mut control = self.control.clone();
            let ticked = tokio::select! {
                result = self.tick(dt.as_secs_f32()) => Some(result),
                _ = control.changed() => None,
            };
            let Some(ticked) = ticked else {
                tracing::debug!("Tick interrupted by a control command");
                continue;
            };

            match ticked {
                Ok(TickOutcome::Recovered) => {
                    if let Some(backoff) = self.config.failure_backoff {
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = self.control.changed() => {}
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Frame loop stopped: {}", e);
                    break Err(e);
                }
            }

            if self
                .config
                .max_frames
                .is_some_and(|max| self.state.frames_rendered >= max)
            {
                tracing::info!("Rendered {} frames, stopping", self.state.frames_rendered);
                break Ok(());
            }
        };

        self.dispose();
        result
    }

    /// Run one frame through the pipeline. `dt` is seconds since the previous tick.
    pub async fn tick(&mut self, dt: f32) -> Result<TickOutcome, PipelineError> {
        self.state.is_model_ready = self.channel.is_model_ready();
        if !self.state.is_model_ready || !self.sources.has_data() {
            return Ok(TickOutcome::Skipped);
        }

        let capture_start = Instant::now();
        let frame = match self.sources.capture() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to capture frame: {:#}", e);
                return Ok(TickOutcome::Skipped);
            }
        };
        let capture_time = capture_start.elapsed();

        let segment_start = Instant::now();
        // The worker takes ownership of the pixels; compositing keeps a copy
        let result = self.channel.process_frame(frame.clone()).await;
        let segment_time = segment_start.elapsed();

        let composite_start = Instant::now();
        let (surface, outcome) = match result {
            Ok(mask) => {
                let (surface, detected) = self.render_fresh(&frame, &mask, dt);
                self.state.last_good_mask = Some(mask);
                (surface, TickOutcome::Rendered { detected })
            }
            Err(e) => {
                self.record_failure(&e);
                let last_good = self.state.last_good_mask.as_ref();
                let surface = composite(&frame, last_good, &self.palette, &self.options);
                (surface, TickOutcome::Recovered)
            }
        };
        let composite_time = composite_start.elapsed();

        let output_start = Instant::now();
        self.present(surface)?;
        let output_time = output_start.elapsed();

        self.state.frames_rendered += 1;
        let fps = self.fps.tick();

        self.timings.frames += 1;
        self.timings.capture += capture_time;
        self.timings.segment += segment_time;
        self.timings.composite += composite_time;
        self.timings.output += output_time;
        if self.config.stats_every > 0 && self.timings.frames % self.config.stats_every == 0 {
            self.timings.log(fps);
        }

        Ok(outcome)
    }

    fn render_fresh(
        &mut self,
        frame: &Frame,
        mask: &SegmentationMask,
        dt: f32,
    ) -> (RgbaImage, bool) {
        if self.state.consecutive_failure_count > 0 {
            tracing::debug!(
                "Inference recovered after {} failures",
                self.state.consecutive_failure_count
            );
        }
        self.state.consecutive_failure_count = 0;
        self.state.degraded = false;

        let analysis = analyze_mask(mask, self.options.target_class);
        let base_scale = self.placement.base_scale();
        let target = Anchor::from_analysis(&analysis, self.smoother.config(), base_scale);
        let Some(target) = target else {
            tracing::debug!("No subject detected");
            return (frame.image().clone(), false);
        };

        let anchor = self.smoother.update(target, dt);
        if !self.smoother.is_suppressed() {
            self.placement
                .update_model_position(anchor.x, anchor.y, anchor.scale);
        }

        (composite(frame, Some(mask), &self.palette, &self.options), true)
    }

    fn record_failure(&mut self, error: &InferenceError) {
        self.state.consecutive_failure_count += 1;
        let count = self.state.consecutive_failure_count;
        tracing::warn!("Inference failed ({} in a row): {}", count, error);

        if let Some(threshold) = self.config.failure_threshold {
            if count == threshold {
                self.state.degraded = true;
                tracing::error!(
                    "Segmentation has failed {} frames in a row; overlay is frozen, \
                     reload the model to retry",
                    count
                );
            }
        }
    }

    fn present(&mut self, mut surface: RgbaImage) -> Result<(), PipelineError> {
        self.placement.render_into(&mut surface);
        self.output
            .write_frame(&surface)
            .map_err(PipelineError::Surface)
    }

    /// Stop the loop's resources: the worker, the source and the held mask.
    pub fn dispose(&mut self) {
        self.state.running = false;
        self.state.is_model_ready = false;
        self.state.last_good_mask = None;
        self.channel.dispose();
        self.sources.stop();
        tracing::info!("Frame loop disposed after {} frames", self.state.frames_rendered);
    }
}
