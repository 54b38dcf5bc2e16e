use anyhow::{bail, Context, Result};
use camola::capture::{CaptureSource, TestPatternSource};
use camola::composite::{CompositeMode, CompositeOptions, CutoutBackground};
use camola::config::{
    InputFormat, LoopConfig, ModelConfig, Normalization, PipelineConfig, SmootherConfig,
};
use camola::inference::InferenceChannel;
use camola::output::{OutputSink, V4L2Output};
use camola::pipeline::FrameLoop;
use camola::placement::MarkerPlacement;
use camola::segmentation::{self, ClassPalette};
use clap::{Parser, ValueEnum};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Keep the subject, dim or drop the background
    Cutout,
    /// Tint every detected class with its palette color
    Overlay,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,

    /// Model input height
    #[arg(long, default_value_t = 256)]
    input_height: u32,

    /// Model input width
    #[arg(long, default_value_t = 256)]
    input_width: u32,

    /// Model input axis order
    #[arg(long, value_enum, default_value_t = Layout::Nchw)]
    layout: Layout,

    /// Scale input to [0, 1] instead of [-1, 1]
    #[arg(long)]
    unit_range: bool,

    /// Name of the model's image input
    #[arg(long, default_value = "x")]
    input_name: String,

    /// Model emits a single foreground probability per pixel
    #[arg(long)]
    binary: bool,

    #[arg(long, value_enum, default_value_t = Mode::Cutout)]
    mode: Mode,

    /// Class to keep and track (any foreground class if omitted)
    #[arg(long)]
    target_class: Option<u16>,

    /// Class-overlay opacity
    #[arg(long, default_value_t = 0.6)]
    alpha: f32,

    /// Drop the background entirely instead of dimming it
    #[arg(long)]
    transparent: bool,

    /// Smoothing decay base: fraction of the anchor offset left after one second
    #[arg(long, default_value_t = 0.001)]
    decay: f32,

    /// Pause after a failed inference, in milliseconds (0 disables)
    #[arg(long, default_value_t = 1000)]
    failure_backoff_ms: u64,

    /// Consecutive failures before the overlay is reported frozen (0 disables)
    #[arg(long, default_value_t = 30)]
    failure_threshold: u32,

    /// Use a synthetic moving test pattern instead of the webcam
    #[arg(long)]
    test_pattern: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

impl Args {
    fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    fn pipeline_config(&self) -> PipelineConfig {
        let model = ModelConfig {
            input_shape: [self.input_height, self.input_width],
            input_format: match self.layout {
                Layout::Nchw => InputFormat::Nchw,
                Layout::Nhwc => InputFormat::Nhwc,
            },
            normalization: if self.unit_range {
                Normalization::UnitRange
            } else {
                Normalization::SignedUnit
            },
            input_name: self.input_name.clone(),
            binary: self.binary,
        };

        let composite = CompositeOptions {
            mode: match self.mode {
                Mode::Cutout => CompositeMode::Cutout,
                Mode::Overlay => CompositeMode::ClassOverlay,
            },
            target_class: self.target_class,
            highlight_class: self.target_class,
            alpha: self.alpha,
            background: if self.transparent {
                CutoutBackground::Transparent
            } else {
                CutoutBackground::Dimmed
            },
            ..CompositeOptions::default()
        };

        PipelineConfig {
            model,
            smoother: SmootherConfig {
                decay_base: self.decay,
                ..SmootherConfig::default()
            },
            frame_loop: LoopConfig {
                refresh_interval: self.refresh_interval(),
                failure_backoff: (self.failure_backoff_ms > 0)
                    .then(|| Duration::from_millis(self.failure_backoff_ms)),
                failure_threshold: (self.failure_threshold > 0).then_some(self.failure_threshold),
                max_frames: self.frames,
                ..LoopConfig::default()
            },
            composite,
            ..PipelineConfig::default()
        }
    }
}

fn open_source(args: &Args) -> Result<Box<dyn CaptureSource>> {
    if args.test_pattern {
        return Ok(Box::new(TestPatternSource::new(args.capture_width, args.capture_height)));
    }
    open_webcam(args)
}

#[cfg(feature = "camera")]
fn open_webcam(args: &Args) -> Result<Box<dyn CaptureSource>> {
    Ok(Box::new(camola::capture::WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
    )))
}

#[cfg(not(feature = "camera"))]
fn open_webcam(_args: &Args) -> Result<Box<dyn CaptureSource>> {
    bail!("Built without camera support; use --test-pattern")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Camola starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    let source = open_source(&args)?;

    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let Some(model_path) = args.model.clone() else {
        tracing::info!("Running in passthrough mode (no segmentation)");
        return run_passthrough(source, output, &args).await;
    };

    let config = args.pipeline_config();
    let channel = InferenceChannel::spawn(segmentation::create_default_backend(), config.timeouts)
        .context("Failed to start inference worker")?;

    let placement = MarkerPlacement::default();
    let mut frame_loop = FrameLoop::new(source, channel, output, placement, &config);
    if config.model.binary {
        frame_loop = frame_loop.with_palette(ClassPalette::binary([0, 255, 128]));
    }

    let handle = frame_loop.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping");
            handle.stop();
        }
    });

    tracing::info!("Press Ctrl+C to stop");
    frame_loop
        .start(&model_path, &config.model)
        .await
        .context("Pipeline failed")?;

    Ok(())
}

async fn run_passthrough<C, O>(mut source: C, mut output: O, args: &Args) -> Result<()>
where
    C: CaptureSource,
    O: OutputSink,
{
    if !source.setup()? {
        bail!("Camera is not available");
    }

    let mut interval = tokio::time::interval(args.refresh_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut frame_count = 0u64;
    let mut total_capture_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    tracing::info!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let capture_start = Instant::now();
        let frame = source.capture_frame().context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();

        let output_start = Instant::now();
        output
            .write_frame(frame.image())
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / frame_count as f64;
            tracing::info!(
                "Frame {}: capture={:.1}ms, output={:.1}ms, total={:.1}ms",
                frame_count,
                avg_capture_ms,
                avg_output_ms,
                avg_capture_ms + avg_output_ms
            );
        }

        if args.frames.is_some_and(|max| frame_count >= max) {
            break;
        }
    }

    source.stop();
    Ok(())
}
