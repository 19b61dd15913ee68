//! Frame timer used to drive per-frame animation.

use std::time::{Duration, Instant};

/// Measures total run time and the delta between frames.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous call to `tick()` (or since creation).
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Delta time in seconds since the previous tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let first = timer.tick();
        assert!(first >= Duration::from_millis(2));
        assert!(timer.elapsed() >= first);
    }

    #[test]
    fn test_delta_resets_between_ticks() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        let _ = timer.delta_secs();
        let second = timer.delta_secs();
        assert!(second < 5.0);
        assert!(second >= 0.0);
    }
}
