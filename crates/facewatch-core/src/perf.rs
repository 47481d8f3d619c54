//! Frame-rate instrumentation for a recognition run.

use std::time::{Duration, Instant};

/// Counts processed frames between `start` and `stop`.
pub trait PerfCounter: Send {
    fn start(&mut self);
    /// Called once per processed frame.
    fn update(&mut self);
    fn stop(&mut self);
    fn elapsed(&self) -> Duration;
    /// Approximate frames per second over the measured span.
    fn fps(&self) -> f64;
    fn frames(&self) -> u64;
}

/// Wall-clock frame counter.
#[derive(Debug, Default)]
pub struct FpsCounter {
    started: Option<Instant>,
    stopped: Option<Instant>,
    frames: u64,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PerfCounter for FpsCounter {
    fn start(&mut self) {
        self.started = Some(Instant::now());
        self.stopped = None;
        self.frames = 0;
    }

    fn update(&mut self) {
        self.frames += 1;
    }

    fn stop(&mut self) {
        if self.stopped.is_none() {
            self.stopped = Some(Instant::now());
        }
    }

    fn elapsed(&self) -> Duration {
        match (self.started, self.stopped) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    fn fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstarted_counter_is_zero() {
        let counter = FpsCounter::new();
        assert_eq!(counter.elapsed(), Duration::ZERO);
        assert_eq!(counter.fps(), 0.0);
    }

    #[test]
    fn test_counts_frames_and_freezes_on_stop() {
        let mut counter = FpsCounter::new();
        counter.start();
        for _ in 0..5 {
            counter.update();
        }
        std::thread::sleep(Duration::from_millis(10));
        counter.stop();

        let elapsed = counter.elapsed();
        assert_eq!(counter.frames(), 5);
        assert!(elapsed >= Duration::from_millis(10));
        assert!(counter.fps() > 0.0);

        std::thread::sleep(Duration::from_millis(5));
        counter.stop();
        assert_eq!(counter.elapsed(), elapsed);
    }

    #[test]
    fn test_restart_resets_frames() {
        let mut counter = FpsCounter::new();
        counter.start();
        counter.update();
        counter.stop();
        counter.start();
        assert_eq!(counter.frames(), 0);
    }
}
