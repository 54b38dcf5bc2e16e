use std::time::{Duration, Instant};

/// Counts rendered frames and recomputes the rate once per elapsed second.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
    fps: f32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            fps: 0.0,
        }
    }

    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f32 {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames as f32 / elapsed.as_secs_f32();
            self.frames = 0;
            self.window_start = now;
        }
        self.fps
    }

    /// Rate over the last completed window.
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_updates_once_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::starting_at(start);
        for i in 1..30 {
            let fps = counter.tick_at(start + Duration::from_millis(i * 33));
            assert_eq!(fps, 0.0);
        }
        let fps = counter.tick_at(start + Duration::from_secs(1));
        assert!((fps - 30.0).abs() < 1e-3);

        // Next window starts empty
        counter.tick_at(start + Duration::from_millis(1500));
        assert!((counter.fps() - 30.0).abs() < 1e-3);
        let fps = counter.tick_at(start + Duration::from_secs(3));
        assert!((fps - 1.0).abs() < 1e-3);
    }
}
