use super::{CaptureSource, Frame, ReadyState};
use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

pub struct WebcamCapture {
    device_index: u32,
    width: u32,
    height: u32,
    camera: Option<Camera>,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Self {
        Self {
            device_index,
            width,
            height,
            camera: None,
        }
    }

    fn open(&self) -> Result<Camera> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            self.device_index,
            self.width,
            self.height
        );

        let index = CameraIndex::Index(self.device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(self.width, self.height),
        ));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera.open_stream().context("Failed to open camera stream")?;

        Ok(camera)
    }
}

impl CaptureSource for WebcamCapture {
    fn setup(&mut self) -> Result<bool> {
        match self.open() {
            Ok(camera) => {
                let resolution = camera.resolution();
                self.width = resolution.width();
                self.height = resolution.height();
                self.camera = Some(camera);
                tracing::info!("Webcam initialized at {}x{}", self.width, self.height);
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Camera access failed: {:#}", e);
                Ok(false)
            }
        }
    }

    fn ready_state(&self) -> ReadyState {
        match &self.camera {
            Some(camera) if camera.is_stream_open() => ReadyState::CurrentData,
            Some(_) => ReadyState::Metadata,
            None => ReadyState::Nothing,
        }
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        let camera = self.camera.as_mut().context("Camera is not open")?;

        let frame = camera.frame().context("Failed to capture frame")?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        let (width, height) = (decoded.width(), decoded.height());
        let rgb = RgbImage::from_raw(width, height, decoded.into_raw())
            .context("Decoded frame has an unexpected size")?;

        Ok(Frame::new(DynamicImage::ImageRgb8(rgb).into_rgba8()))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stop(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Failed to stop camera stream: {}", e);
            }
            tracing::info!("Webcam {} released", self.device_index);
        }
    }
}
