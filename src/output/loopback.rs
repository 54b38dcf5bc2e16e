use super::{flatten, OutputSink};
use anyhow::{Context, Result};
use image::{RgbImage, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, FourCC};

pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the YUYV frame format before writing raw frames
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;
        let mut format = Output::format(&device).context("Failed to query output format")?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"YUYV");
        let format = Output::set_format(&device, &format).context("Failed to set output format")?;
        if (format.width, format.height) != (width, height) {
            tracing::warn!(
                "Loopback device negotiated {}x{} instead of {}x{}",
                format.width,
                format.height,
                width,
                height
            );
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width: format.width,
            height: format.height,
        })
    }
}

/// Pack an RGB image as YUYV: two pixels per four bytes, chroma averaged
/// over each horizontal pair. An odd last column pairs with itself.
fn pack_yuyv(rgb: &RgbImage) -> Vec<u8> {
    let row_bytes = rgb.width() as usize * 3;
    let mut packed = Vec::with_capacity(rgb.width() as usize * rgb.height() as usize * 2);
    if row_bytes == 0 {
        return packed;
    }

    for row in rgb.as_raw().chunks_exact(row_bytes) {
        for pair in row.chunks(6) {
            let (left, right) = pair.split_at(3);
            let right = if right.is_empty() { left } else { right };
            let (y0, u0, v0) = luma_chroma(left);
            let (y1, u1, v1) = luma_chroma(right);
            let u = ((u0 as u16 + u1 as u16) / 2) as u8;
            let v = ((v0 as u16 + v1 as u16) / 2) as u8;
            packed.extend_from_slice(&[y0, u, y1, v]);
        }
    }

    packed
}

/// BT.601 analog YUV of one RGB pixel.
fn luma_chroma(px: &[u8]) -> (u8, u8, u8) {
    let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.147 * r - 0.289 * g + 0.436 * b + 128.0;
    let v = 0.615 * r - 0.515 * g - 0.100 * b + 128.0;
    let to_byte = |c: f32| c.clamp(0.0, 255.0) as u8;
    (to_byte(y), to_byte(u), to_byte(v))
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        let mut rgb = flatten(frame);
        if rgb.dimensions() != (self.width, self.height) {
            rgb = image::imageops::resize(
                &rgb,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            );
        }

        let yuyv_data = pack_yuyv(&rgb);

        self.file
            .write_all(&yuyv_data)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
