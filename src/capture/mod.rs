mod pattern;
#[cfg(feature = "camera")]
mod v4l_capture;

pub use pattern::TestPatternSource;
#[cfg(feature = "camera")]
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbaImage;
use std::time::Instant;

/// One captured RGBA frame.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Raw RGBA bytes, consuming the frame.
    pub fn into_raw(self) -> Vec<u8> {
        self.image.into_raw()
    }
}

/// How much the source can deliver right now, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Nothing,
    Metadata,
    CurrentData,
}

/// Trait for live video sources
pub trait CaptureSource {
    /// Acquire the device. `Ok(false)` means access was refused.
    fn setup(&mut self) -> Result<bool>;

    fn ready_state(&self) -> ReadyState;

    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);

    /// Release the device.
    fn stop(&mut self);
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn setup(&mut self) -> Result<bool> {
        (**self).setup()
    }

    fn ready_state(&self) -> ReadyState {
        (**self).ready_state()
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        (**self).capture_frame()
    }

    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Owns the live source and the size of the surfaces drawn from it.
pub struct SourceManager<C> {
    source: C,
    surface: (u32, u32),
    ready: bool,
}

impl<C: CaptureSource> SourceManager<C> {
    pub fn new(source: C) -> Self {
        let surface = source.resolution();
        Self {
            source,
            surface,
            ready: false,
        }
    }

    /// Acquire the source and size the surfaces to it.
    ///
    /// Returns `false` if the source refused; the loop must not start then.
    pub fn setup(&mut self) -> Result<bool> {
        self.ready = self.source.setup()?;
        if !self.ready {
            tracing::warn!("Live source is not available");
            return Ok(false);
        }
        self.adjust_surfaces();
        Ok(true)
    }

    /// Match the surface size to the source, returning the new size.
    pub fn adjust_surfaces(&mut self) -> (u32, u32) {
        let (width, height) = self.source.resolution();
        if width > 0 && height > 0 && (width, height) != self.surface {
            tracing::info!("Resizing surfaces to {}x{}", width, height);
            self.surface = (width, height);
        }
        self.surface
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    pub fn has_data(&self) -> bool {
        self.ready && self.source.ready_state() >= ReadyState::CurrentData
    }

    pub fn capture(&mut self) -> Result<Frame> {
        self.source.capture_frame()
    }

    pub fn stop(&mut self) {
        if self.ready {
            self.source.stop();
            self.ready = false;
        }
    }

    pub fn source(&self) -> &C {
        &self.source
    }
}
