use super::{CaptureSource, Frame, ReadyState};
use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};

/// Synthetic source: a bright disc orbiting over a dark gradient.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_index: u64,
    running: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_index: 0,
            running: false,
        }
    }

    /// Disc center and radius for the current frame.
    pub fn subject(&self) -> (f32, f32, f32) {
        let t = self.frame_index as f32 / 60.0;
        let (w, h) = (self.width as f32, self.height as f32);
        let cx = w * 0.5 + w * 0.25 * t.cos();
        let cy = h * 0.5 + h * 0.2 * t.sin();
        (cx, cy, w.min(h) * 0.15)
    }
}

impl CaptureSource for TestPatternSource {
    fn setup(&mut self) -> Result<bool> {
        tracing::info!("Test pattern source at {}x{}", self.width, self.height);
        self.running = self.width > 0 && self.height > 0;
        Ok(self.running)
    }

    fn ready_state(&self) -> ReadyState {
        if self.running {
            ReadyState::CurrentData
        } else {
            ReadyState::Nothing
        }
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        if !self.running {
            bail!("Test pattern source is stopped");
        }

        let (cx, cy, radius) = self.subject();
        let height = self.height.max(1) as f32;
        let image = RgbaImage::from_fn(self.width, self.height, |x, y| {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            if dx * dx + dy * dy <= radius * radius {
                Rgba([240, 200, 160, 255])
            } else {
                let shade = (40.0 * y as f32 / height) as u8;
                Rgba([20 + shade, 30 + shade, 50 + shade, 255])
            }
        });

        self.frame_index += 1;
        Ok(Frame::new(image))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disc_drawn_at_subject() {
        let mut source = TestPatternSource::new(64, 48);
        assert!(source.capture_frame().is_err());
        assert!(source.setup().unwrap());

        let (cx, cy, _) = source.subject();
        let frame = source.capture_frame().unwrap();
        assert_eq!(frame.image().get_pixel(cx as u32, cy as u32), &Rgba([240, 200, 160, 255]));
        assert_eq!(frame.image().get_pixel(0, 0)[3], 255);

        source.stop();
        assert_eq!(source.ready_state(), ReadyState::Nothing);
    }
}
