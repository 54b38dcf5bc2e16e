use super::types::{ClassId, SegmentationMask, BACKGROUND};
use std::collections::BTreeSet;

/// Occupancy-weighted mean coordinate of the counted pixels, in mask pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
    pub pixel_count: usize,
}

/// Inclusive pixel bounds of the counted pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Extent {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaskAnalysis {
    /// `None` when no pixel matched: nothing should be placed this frame.
    pub centroid: Option<Centroid>,
    pub extent: Option<Extent>,
    pub pixel_count: usize,
    /// Every non-background class seen, regardless of the target filter.
    pub detected_classes: BTreeSet<ClassId>,
    pub mask_width: u32,
    pub mask_height: u32,
}

impl MaskAnalysis {
    fn empty(mask: &SegmentationMask) -> Self {
        Self {
            centroid: None,
            extent: None,
            pixel_count: 0,
            detected_classes: BTreeSet::new(),
            mask_width: mask.width,
            mask_height: mask.height,
        }
    }

    pub fn has_detection(&self) -> bool {
        self.centroid.is_some()
    }

    /// Share of the mask covered by the counted pixels.
    pub fn occupancy(&self) -> f64 {
        let area = self.mask_width as f64 * self.mask_height as f64;
        if area == 0.0 {
            0.0
        } else {
            self.pixel_count as f64 / area
        }
    }
}

/// Locate `target` (or any foreground class when `None`) in `mask`.
///
/// Each usable pixel is visited once. A malformed mask analyses as empty and
/// nested rows of the wrong width are skipped.
pub fn analyze_mask(mask: &SegmentationMask, target: Option<ClassId>) -> MaskAnalysis {
    let mut analysis = MaskAnalysis::empty(mask);
    if !mask.is_well_formed() {
        tracing::debug!(
            "Malformed {}x{} mask, treating as no detection",
            mask.width,
            mask.height
        );
        return analysis;
    }

    let (mut sum_x, mut sum_y) = (0f64, 0f64);
    let mut extent: Option<Extent> = None;

    for (y, row) in mask.rows() {
        for (x, &class) in row.iter().enumerate() {
            if class == BACKGROUND {
                continue;
            }
            analysis.detected_classes.insert(class);
            if target.is_some_and(|t| t != class) {
                continue;
            }

            sum_x += x as f64;
            sum_y += y as f64;
            analysis.pixel_count += 1;

            let (x, y) = (x as u32, y as u32);
            extent = Some(match extent {
                None => Extent {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(e) => Extent {
                    min_x: e.min_x.min(x),
                    min_y: e.min_y.min(y),
                    max_x: e.max_x.max(x),
                    max_y: e.max_y.max(y),
                },
            });
        }
    }

    if analysis.pixel_count > 0 {
        let n = analysis.pixel_count as f64;
        analysis.centroid = Some(Centroid {
            x: sum_x / n,
            y: sum_y / n,
            pixel_count: analysis.pixel_count,
        });
        analysis.extent = extent;
    }

    analysis
}
