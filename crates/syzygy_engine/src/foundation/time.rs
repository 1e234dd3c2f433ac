//! Time management utilities

use std::time::{Duration, Instant};

/// High-precision timer for frame timing
pub struct Timer {
    last_frame: Instant,
    delta_time: f32,
    total_time: f32,
    frame_count: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self {
            last_frame: Instant::now(),
            delta_time: 0.0,
            total_time: 0.0,
            frame_count: 0,
        }
    }

    /// Update the timer (should be called once per frame)
    pub fn update(&mut self) {
        let now = Instant::now();
        self.advance(now.duration_since(self.last_frame));
        self.last_frame = now;
    }

    fn advance(&mut self, elapsed: Duration) {
        self.delta_time = elapsed.as_secs_f32();
        self.total_time += self.delta_time;
        self.frame_count += 1;
    }

    /// Time between the last two updates in seconds
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Total elapsed time since timer creation
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Number of updates so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average FPS since timer creation
    pub fn average_fps(&self) -> f32 {
        if self.total_time > 0.0 {
            self.frame_count as f32 / self.total_time
        } else {
            0.0
        }
    }

    /// Remaining time to sleep so that a frame lasts at least `1 / target_fps`
    pub fn frame_budget_remaining(&self, target_fps: u32) -> Option<Duration> {
        if target_fps == 0 {
            return None;
        }
        let budget = Duration::from_secs_f64(1.0 / f64::from(target_fps));
        budget.checked_sub(self.last_frame.elapsed()).filter(|d| !d.is_zero())
    }
}
