use log::debug;
use std::time::{Duration, Instant};

// Supplies the simulation tick for each frame.
pub trait TimeSource {
    fn tick(&mut self) -> f32;
}

// Wall clock ticks, clamped so a stall (window drag, debugger) doesn't turn
// into one enormous simulation step.
#[derive(Debug)]
pub struct FpsEstimator {
    iteration_start: Instant,
    pub iteration_duration: Duration,
    max_frame_time: f32,
}

impl FpsEstimator {
    pub fn new(fps: f64, max_frame_time: f32) -> FpsEstimator {
        FpsEstimator {
            iteration_start: Instant::now(),
            iteration_duration: Duration::from_secs_f64(1.0 / fps),
            max_frame_time,
        }
    }
}

impl TimeSource for FpsEstimator {
    fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta_t = now - self.iteration_start;
        if delta_t > self.iteration_duration {
            debug!(
                "Over time budget by: {:?}",
                delta_t - self.iteration_duration
            );
        }
        self.iteration_start = now;
        delta_t.as_secs_f32().min(self.max_frame_time)
    }
}

// Constant ticks for headless runs and reproducible captures.
#[derive(Debug, Clone, Copy)]
pub struct FixedTick {
    dt: f32,
}

impl FixedTick {
    pub fn new(dt: f32) -> Self {
        FixedTick { dt }
    }
}

impl TimeSource for FixedTick {
    fn tick(&mut self) -> f32 {
        self.dt
    }
}
