//! Fixed-step simulation clock.
//!
//! Converts monotonic wall time into a whole number of fixed-size
//! simulation steps per host tick. Fractional time carries over in an
//! accumulator; catch-up after a stall is clamped so a long hitch cannot
//! trigger an unbounded burst of steps.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    /// Simulation steps per second.
    pub tick_hz: u32,
    /// Upper bound on steps returned by a single `tick` call. Elapsed time
    /// beyond the clamp is discarded.
    pub max_steps_per_tick: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            max_steps_per_tick: 5,
        }
    }
}

#[derive(Debug)]
pub struct FixedSimulationClock {
    step: Duration,
    max_steps: u32,
    accumulator: Duration,
    last: Option<Instant>,
}

impl Default for FixedSimulationClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl FixedSimulationClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            step: Duration::from_secs(1) / config.tick_hz.max(1),
            max_steps: config.max_steps_per_tick.max(1),
            accumulator: Duration::ZERO,
            last: None,
        }
    }

    /// How many whole fixed steps have elapsed since the previous call.
    ///
    /// The first call anchors the clock and returns 0.
    pub fn tick(&mut self, now: Instant) -> u32 {
        let Some(last) = self.last else {
            self.last = Some(now);
            return 0;
        };
        self.accumulator += now.saturating_duration_since(last);
        self.last = Some(now);

        let mut steps = 0u32;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            steps += 1;
            if steps == self.max_steps {
                // Spiral-of-death guard: drop whatever backlog remains.
                self.accumulator = Duration::ZERO;
                break;
            }
        }
        steps
    }

    /// Fractional progress toward the next step, for interpolated rendering.
    pub fn alpha(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.step.as_secs_f32()
    }

    /// Re-anchor after a pause or reconnect so no catch-up burst fires.
    pub fn reanchor(&mut self, now: Instant) {
        self.last = Some(now);
        self.accumulator = Duration::ZERO;
    }

    pub fn step_duration(&self) -> Duration {
        self.step
    }
}
