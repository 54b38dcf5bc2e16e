//! Anchor placement: mask centroid to normalized scene position and scale,
//! smoothed over time.

use crate::config::SmootherConfig;
use crate::segmentation::{Centroid, MaskAnalysis};

/// Normalized scene placement. Position spans roughly [-1, 1] with +y up.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Anchor {
    pub fn new(x: f32, y: f32, scale: f32) -> Self {
        Self { x, y, scale }
    }

    /// Map a pixel-space centroid onto scene space.
    ///
    /// The size term is `sqrt(occupancy)` clamped to the configured range, then
    /// multiplied by the placement collaborator's base scale.
    pub fn from_centroid(
        centroid: &Centroid,
        mask_width: u32,
        mask_height: u32,
        config: &SmootherConfig,
        base_scale: f32,
    ) -> Self {
        let (w, h) = (mask_width.max(1) as f64, mask_height.max(1) as f64);
        let x = (centroid.x / w) * 2.0 - 1.0;
        let y = -(centroid.y / h) * 2.0 + 1.0;
        let size = (centroid.pixel_count as f64 / (w * h)).sqrt() as f32;
        let size = size.clamp(config.min_scale, config.max_scale);
        Self::new(x as f32, y as f32, size * base_scale)
    }

    /// Target anchor for an analysis, `None` when nothing was detected.
    pub fn from_analysis(
        analysis: &MaskAnalysis,
        config: &SmootherConfig,
        base_scale: f32,
    ) -> Option<Self> {
        let (width, height) = (analysis.mask_width, analysis.mask_height);
        analysis
            .centroid
            .as_ref()
            .map(|c| Self::from_centroid(c, width, height, config, base_scale))
    }
}

/// Frame-rate independent exponential smoothing of the overlay anchor.
///
/// While a manual gesture latch is set the rendered anchor is frozen but the
/// target keeps tracking detections. The latch is sticky: only
/// [`clear_user_interaction`](Self::clear_user_interaction) or
/// [`reset`](Self::reset) releases it.
#[derive(Debug, Clone)]
pub struct AnchorSmoother {
    config: SmootherConfig,
    initial_scale: f32,
    current: Anchor,
    target: Anchor,
    interaction_enabled: bool,
    user_interacted: bool,
}

impl AnchorSmoother {
    pub fn new(config: SmootherConfig, initial_scale: f32) -> Self {
        let rest = Anchor::new(0.0, 0.0, initial_scale);
        Self {
            config,
            initial_scale,
            current: rest,
            target: rest,
            interaction_enabled: false,
            user_interacted: false,
        }
    }

    /// Feed this frame's target and advance the rendered anchor by `dt` seconds.
    ///
    /// Returns the rendered anchor.
    pub fn update(&mut self, target: Anchor, dt: f32) -> Anchor {
        self.target = target;
        if self.is_suppressed() {
            return self.current;
        }

        let dx = (target.x - self.current.x).abs();
        let dy = (target.y - self.current.y).abs();
        if dx > self.config.snap_threshold || dy > self.config.snap_threshold {
            tracing::debug!("Anchor jumped ({:.2}, {:.2}), snapping", dx, dy);
            self.current = target;
            return self.current;
        }

        let factor = self.factor(dt);
        self.current.x += (target.x - self.current.x) * factor;
        self.current.y += (target.y - self.current.y) * factor;
        self.current.scale += (target.scale - self.current.scale) * factor;
        self.current
    }

    fn factor(&self, dt: f32) -> f32 {
        let dt = dt.max(0.0);
        (1.0 - self.config.decay_base.powf(dt)).clamp(0.0, 1.0)
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    pub fn current(&self) -> Anchor {
        self.current
    }

    pub fn target(&self) -> Anchor {
        self.target
    }

    /// Whether position updates must not reach the scene this frame.
    pub fn is_suppressed(&self) -> bool {
        self.user_interacted
    }

    pub fn set_interaction_enabled(&mut self, enabled: bool) {
        self.interaction_enabled = enabled;
    }

    pub fn interaction_enabled(&self) -> bool {
        self.interaction_enabled
    }

    /// Record a manual gesture. Ignored unless interaction is enabled.
    pub fn record_user_gesture(&mut self) {
        if self.interaction_enabled {
            self.user_interacted = true;
        }
    }

    pub fn user_interacted(&self) -> bool {
        self.user_interacted
    }

    pub fn clear_user_interaction(&mut self) {
        self.user_interacted = false;
    }

    /// Back to the rest pose with the latch cleared.
    pub fn reset(&mut self) {
        let rest = Anchor::new(0.0, 0.0, self.initial_scale);
        self.current = rest;
        self.target = rest;
        self.user_interacted = false;
    }
}
