//! Boundary to the scene that hosts the overlaid object.

use image::{Rgba, RgbaImage};

/// The 3D-placement collaborator driven by the frame loop.
pub trait ScenePlacement {
    /// Place the object at normalized `(x, y)` with the given scale.
    fn update_model_position(&mut self, x: f32, y: f32, scale: f32);

    fn reset_model_transform(&mut self);

    fn enable_interaction(&mut self);

    fn disable_interaction(&mut self);

    /// Model-specific multiplier applied to the occupancy-derived scale.
    fn base_scale(&self) -> f32 {
        1.0
    }

    /// The drawing surface was resized to match the source.
    fn update_size(&mut self, _width: u32, _height: u32) {}

    /// Draw the scene layer over the composited frame.
    fn render_into(&mut self, _surface: &mut RgbaImage) {}
}

/// Stand-in scene: a filled square marking the anchor.
#[derive(Debug, Clone)]
pub struct MarkerPlacement {
    color: Rgba<u8>,
    base_scale: f32,
    transform: Option<(f32, f32, f32)>,
    interaction: bool,
    size: (u32, u32),
}

impl MarkerPlacement {
    pub fn new(color: [u8; 3], base_scale: f32) -> Self {
        Self {
            color: Rgba([color[0], color[1], color[2], 255]),
            base_scale,
            transform: None,
            interaction: false,
            size: (0, 0),
        }
    }

    /// Last placement, `None` until the first update or after a reset.
    pub fn transform(&self) -> Option<(f32, f32, f32)> {
        self.transform
    }

    pub fn interaction_enabled(&self) -> bool {
        self.interaction
    }
}

impl Default for MarkerPlacement {
    fn default() -> Self {
        Self::new([0, 255, 128], 1.0)
    }
}

impl ScenePlacement for MarkerPlacement {
    fn update_model_position(&mut self, x: f32, y: f32, scale: f32) {
        self.transform = Some((x, y, scale));
    }

    fn reset_model_transform(&mut self) {
        self.transform = None;
    }

    fn enable_interaction(&mut self) {
        self.interaction = true;
    }

    fn disable_interaction(&mut self) {
        self.interaction = false;
    }

    fn base_scale(&self) -> f32 {
        self.base_scale
    }

    fn update_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn render_into(&mut self, surface: &mut RgbaImage) {
        let Some((x, y, scale)) = self.transform else {
            return;
        };
        let (width, height) = surface.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let cx = (x + 1.0) * 0.5 * width as f32;
        let cy = (1.0 - y) * 0.5 * height as f32;
        let half = (scale * width.min(height) as f32 * 0.1).max(1.0);

        let x0 = (cx - half).max(0.0) as u32;
        let y0 = (cy - half).max(0.0) as u32;
        let x1 = ((cx + half).max(0.0) as u32).min(width);
        let y1 = ((cy + half).max(0.0) as u32).min(height);
        for py in y0..y1 {
            for px in x0..x1 {
                surface.put_pixel(px, py, self.color);
            }
        }
    }
}
