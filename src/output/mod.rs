#[cfg(feature = "loopback")]
mod loopback;

#[cfg(feature = "loopback")]
pub use loopback::V4L2Output;

use anyhow::Result;
use image::{Rgb, RgbImage, RgbaImage};

/// Trait for output destinations
pub trait OutputSink {
    /// Write a composited frame to the output
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// Flatten an RGBA surface over black.
pub fn flatten(frame: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let p = frame.get_pixel(x, y);
        let a = p[3] as u32;
        let scale = |c: u8| ((c as u32 * a + 127) / 255) as u8;
        Rgb([scale(p[0]), scale(p[1]), scale(p[2])])
    })
}
