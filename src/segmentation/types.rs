use crate::config::ModelConfig;
use anyhow::Result;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Per-pixel class label. 0 is reserved for background.
pub type ClassId = u16;

pub const BACKGROUND: ClassId = 0;

/// Class-ID buffer of a segmentation result.
///
/// The layout is decided once where the mask is produced so downstream code
/// never has to guess it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "lowercase")]
pub enum MaskData {
    /// Row-major buffer of `width * height` labels.
    Flat(Vec<ClassId>),
    /// One vector per row.
    Nested(Vec<Vec<ClassId>>),
}

/// Output of one successful inference call, at the model's native resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub data: MaskData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl SegmentationMask {
    pub fn flat(width: u32, height: u32, data: Vec<ClassId>) -> Self {
        Self {
            width,
            height,
            data: MaskData::Flat(data),
            confidence: None,
        }
    }

    pub fn nested(width: u32, rows: Vec<Vec<ClassId>>) -> Self {
        Self {
            width,
            height: rows.len() as u32,
            data: MaskData::Nested(rows),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn confidence(&self) -> f32 {
        self.confidence.unwrap_or(1.0)
    }

    /// Whether the buffer length agrees with the declared dimensions.
    ///
    /// Nested rows of the wrong width do not make the mask malformed; they are
    /// skipped individually by [`rows`](Self::rows).
    pub fn is_well_formed(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        match &self.data {
            MaskData::Flat(data) => data.len() == self.width as usize * self.height as usize,
            MaskData::Nested(rows) => rows.len() == self.height as usize,
        }
    }

    /// Iterate the usable rows as `(y, labels)`.
    ///
    /// Yields nothing for a malformed mask.
    pub fn rows(&self) -> Rows<'_> {
        let width = self.width as usize;
        let inner = if !self.is_well_formed() {
            RowsInner::Empty
        } else {
            match &self.data {
                MaskData::Flat(data) => RowsInner::Flat(data.chunks_exact(width)),
                MaskData::Nested(rows) => RowsInner::Nested(rows.iter()),
            }
        };
        Rows { inner, width, y: 0 }
    }

    pub fn class_at(&self, x: u32, y: u32) -> Option<ClassId> {
        if x >= self.width || y >= self.height || !self.is_well_formed() {
            return None;
        }
        match &self.data {
            MaskData::Flat(data) => {
                let index = y as usize * self.width as usize + x as usize;
                data.get(index).copied()
            }
            MaskData::Nested(rows) => rows
                .get(y as usize)
                .filter(|row| row.len() == self.width as usize)
                .map(|row| row[x as usize]),
        }
    }
}

pub struct Rows<'a> {
    inner: RowsInner<'a>,
    width: usize,
    y: usize,
}

enum RowsInner<'a> {
    Flat(std::slice::ChunksExact<'a, ClassId>),
    Nested(std::slice::Iter<'a, Vec<ClassId>>),
    Empty,
}

impl<'a> Iterator for Rows<'a> {
    type Item = (usize, &'a [ClassId]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row: &'a [ClassId] = match &mut self.inner {
                RowsInner::Flat(chunks) => chunks.next()?,
                RowsInner::Nested(rows) => rows.next()?.as_slice(),
                RowsInner::Empty => return None,
            };
            let y = self.y;
            self.y += 1;
            if row.len() == self.width {
                return Some((y, row));
            }
            tracing::trace!("Skipping mask row {} of width {}", y, row.len());
        }
    }
}

/// A loaded segmentation network.
///
/// Implementations take a preprocessed input tensor and return the raw output:
/// either per-class scores `[1, C, H, W]` / `[1, H, W, C]` or labels `[1, H, W]`.
pub trait SegmentationModel: Send {
    fn execute(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// Reset internal state (for models with temporal/recurrent components)
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }
}

/// The runtime that lives on the inference worker and produces models.
pub trait InferenceBackend: Send {
    /// Bring the runtime up. Called once when the worker starts.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn load(
        &mut self,
        model_url: &str,
        config: &ModelConfig,
    ) -> Result<Box<dyn SegmentationModel>>;
}
