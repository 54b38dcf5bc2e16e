//! Compositing of the camera frame with a segmentation mask.

use crate::capture::Frame;
use crate::segmentation::{ClassId, ClassPalette, SegmentationMask, BACKGROUND};
use image::{Rgba, RgbaImage};
use std::collections::BTreeMap;
use thiserror::Error;

pub const FOREGROUND_ALPHA: u8 = 255;
pub const DIMMED_BACKGROUND_ALPHA: u8 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeMode {
    /// Foreground kept, background dimmed or removed.
    #[default]
    Cutout,
    /// Source frame tinted by class color.
    ClassOverlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CutoutBackground {
    /// Black at alpha 180.
    #[default]
    Dimmed,
    /// Fully transparent.
    Transparent,
}

impl CutoutBackground {
    fn pixel(self) -> Rgba<u8> {
        match self {
            CutoutBackground::Dimmed => Rgba([0, 0, 0, DIMMED_BACKGROUND_ALPHA]),
            CutoutBackground::Transparent => Rgba([0, 0, 0, 0]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeOptions {
    pub mode: CompositeMode,
    /// Class kept by cutout mode and tracked by the anchor; any foreground when `None`.
    pub target_class: Option<ClassId>,
    /// Class-overlay mode tints only this class when set.
    pub class_filter: Option<ClassId>,
    /// Class drawn with boosted opacity in class-overlay mode.
    pub highlight_class: Option<ClassId>,
    /// Overlay opacity in [0, 1].
    pub alpha: f32,
    /// Minimum mask confidence for class-overlay tinting.
    pub threshold: f32,
    pub background: CutoutBackground,
    /// Per-call color replacements, applied over the palette.
    pub color_overrides: BTreeMap<ClassId, [u8; 3]>,
    /// Draw the source frame untouched.
    pub passthrough: bool,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            mode: CompositeMode::Cutout,
            target_class: None,
            class_filter: None,
            highlight_class: None,
            alpha: 0.6,
            threshold: 0.5,
            background: CutoutBackground::Dimmed,
            color_overrides: BTreeMap::new(),
            passthrough: false,
        }
    }
}

#[derive(Error, Debug)]
enum CompositeError {
    #[error("malformed {width}x{height} mask")]
    MalformedMask { width: u32, height: u32 },

    #[error("empty frame")]
    EmptyFrame,
}

/// Produce the visible layer for `frame`.
///
/// Without a mask, or if anything about the mask is unusable, the unmodified
/// source frame is returned.
pub fn composite(
    frame: &Frame,
    mask: Option<&SegmentationMask>,
    palette: &ClassPalette,
    options: &CompositeOptions,
) -> RgbaImage {
    let _span = tracing::debug_span!("composite").entered();

    let Some(mask) = mask else {
        return frame.image().clone();
    };
    if options.passthrough {
        return frame.image().clone();
    }

    let result = match options.mode {
        CompositeMode::Cutout => cutout(frame.image(), mask, options),
        CompositeMode::ClassOverlay => class_overlay(frame.image(), mask, palette, options),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("Compositing failed ({}), drawing plain video", e);
        frame.image().clone()
    })
}

fn check(image: &RgbaImage, mask: &SegmentationMask) -> Result<(), CompositeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CompositeError::EmptyFrame);
    }
    if !mask.is_well_formed() {
        return Err(CompositeError::MalformedMask {
            width: mask.width,
            height: mask.height,
        });
    }
    Ok(())
}

/// Output pixel span covered by mask cell `cell` along one axis.
fn block(cell: usize, mask_len: u32, out_len: u32) -> std::ops::Range<u32> {
    let start = (cell as u64 * out_len as u64 / mask_len as u64) as u32;
    let end = ((cell as u64 + 1) * out_len as u64 / mask_len as u64) as u32;
    start..end
}

fn cutout(
    source: &RgbaImage,
    mask: &SegmentationMask,
    options: &CompositeOptions,
) -> Result<RgbaImage, CompositeError> {
    check(source, mask)?;
    let (width, height) = source.dimensions();
    let mut out = RgbaImage::from_pixel(width, height, options.background.pixel());

    for (my, row) in mask.rows() {
        let ys = block(my, mask.height, height);
        for (mx, &class) in row.iter().enumerate() {
            let targeted = options.target_class.map_or(true, |t| t == class);
            let foreground = class != BACKGROUND && targeted;
            if !foreground {
                continue;
            }
            for y in ys.clone() {
                for x in block(mx, mask.width, width) {
                    let src = source.get_pixel(x, y);
                    out.put_pixel(x, y, Rgba([src[0], src[1], src[2], FOREGROUND_ALPHA]));
                }
            }
        }
    }

    Ok(out)
}

fn class_overlay(
    source: &RgbaImage,
    mask: &SegmentationMask,
    palette: &ClassPalette,
    options: &CompositeOptions,
) -> Result<RgbaImage, CompositeError> {
    check(source, mask)?;
    let mut out = source.clone();
    if mask.confidence() < options.threshold {
        return Ok(out);
    }

    let (width, height) = source.dimensions();
    let base_alpha = (options.alpha.clamp(0.0, 1.0) * 255.0).round() as u16;
    let highlight_alpha = ((base_alpha as f32 * 1.5).round() as u16).min(255);

    for (my, row) in mask.rows() {
        let ys = block(my, mask.height, height);
        for (mx, &class) in row.iter().enumerate() {
            if class == BACKGROUND || options.class_filter.is_some_and(|f| f != class) {
                continue;
            }
            if !palette.contains(class) {
                continue;
            }
            let Some(color) = palette.color(class, &options.color_overrides) else {
                continue;
            };
            let alpha = if options.highlight_class == Some(class) {
                highlight_alpha
            } else {
                base_alpha
            };

            for y in ys.clone() {
                for x in block(mx, mask.width, width) {
                    let pixel = out.get_pixel_mut(x, y);
                    for c in 0..3 {
                        pixel[c] = blend(color[c], pixel[c], alpha);
                    }
                    pixel[3] = 255;
                }
            }
        }
    }

    Ok(out)
}

/// `over` drawn at `alpha` (0-255) on top of `under`.
fn blend(over: u8, under: u8, alpha: u16) -> u8 {
    let value = over as u32 * alpha as u32 + under as u32 * (255 - alpha as u32);
    ((value + 127) / 255) as u8
}
