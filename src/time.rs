//! Frame timing for the simulation loop.
//!
//! [`FrameClock`] produces the delta time injected into the agent stage each
//! frame. Real deltas are clamped to a maximum so that a stalled frame (a
//! debugger break, a window drag) cannot launch the flock across the scene.
//!
//! # Example
//!
//! ```
//! use avoidance_boids::FrameClock;
//!
//! let mut clock = FrameClock::new().with_fixed_delta(1.0 / 60.0);
//!
//! let dt = clock.tick();
//! assert!((dt - 1.0 / 60.0).abs() < 1e-6);
//! assert_eq!(clock.frame(), 1);
//! ```

use std::time::Instant;

/// How the clock measures a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Step {
    /// Wall-clock time since the previous tick, capped at `max`.
    Real { max: f32 },
    /// The same delta every frame.
    Fixed(f32),
}

/// Delta-time source for the frame orchestrator.
#[derive(Debug)]
pub struct FrameClock {
    previous: Instant,
    step: Step,
    max_delta: f32,
    scale: f32,
    paused: bool,
    /// Simulated seconds (scaled, pauses excluded).
    simulated: f32,
    last_dt: f32,
    frames: u64,
}

impl FrameClock {
    /// Real deltas capped at 0.1 s, unscaled.
    pub fn new() -> Self {
        Self {
            previous: Instant::now(),
            step: Step::Real { max: 0.1 },
            max_delta: 0.1,
            scale: 1.0,
            paused: false,
            simulated: 0.0,
            last_dt: 0.0,
            frames: 0,
        }
    }

    /// Use a fixed delta every frame, for deterministic runs.
    pub fn with_fixed_delta(mut self, dt: f32) -> Self {
        self.set_fixed_delta(Some(dt));
        self
    }

    /// Cap on a single real delta, before scaling.
    pub fn with_max_delta(mut self, max_delta: f32) -> Self {
        self.max_delta = max_delta.max(0.0);
        if let Step::Real { max } = &mut self.step {
            *max = self.max_delta;
        }
        self
    }

    pub fn with_time_scale(mut self, scale: f32) -> Self {
        self.set_time_scale(scale);
        self
    }

    /// Advance one frame and return its delta time in seconds.
    ///
    /// Returns 0 while paused; the frame counter does not advance.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let wall = now.duration_since(self.previous).as_secs_f32();
        self.previous = now;

        self.last_dt = if self.paused {
            0.0
        } else {
            let raw = match self.step {
                Step::Real { max } => wall.min(max),
                Step::Fixed(dt) => dt,
            };
            self.frames += 1;
            raw * self.scale
        };
        self.simulated += self.last_dt;
        self.last_dt
    }

    /// Simulated seconds so far.
    pub fn elapsed(&self) -> f32 {
        self.simulated
    }

    /// Delta returned by the last tick.
    pub fn delta(&self) -> f32 {
        self.last_dt
    }

    pub fn frame(&self) -> u64 {
        self.frames
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn time_scale(&self) -> f32 {
        self.scale
    }

    pub fn max_delta(&self) -> f32 {
        self.max_delta
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume without counting the paused wall time as a delta.
    pub fn resume(&mut self) {
        if std::mem::replace(&mut self.paused, false) {
            self.previous = Instant::now();
        }
    }

    pub fn toggle_pause(&mut self) {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Fixed delta, or `None` to go back to real timing.
    pub fn set_fixed_delta(&mut self, dt: Option<f32>) {
        self.step = match dt {
            Some(dt) => Step::Fixed(dt.max(0.0)),
            None => Step::Real { max: self.max_delta },
        };
    }

    /// Negative scales clamp to 0.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.scale = scale.max(0.0);
    }

    /// Back to frame zero. Step mode, cap and scale are kept.
    pub fn reset(&mut self) {
        self.previous = Instant::now();
        self.paused = false;
        self.simulated = 0.0;
        self.last_dt = 0.0;
        self.frames = 0;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
