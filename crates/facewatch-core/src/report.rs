//! Periodic confidence aggregation.

use crate::types::MatchResult;
use std::fmt;
use std::time::{Duration, Instant};

/// Aggregate emitted once per reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfidenceReport {
    /// No face was detected during the interval.
    NoRecognizedFaces,
    /// Mean confidence over every face seen during the interval.
    Mean(f32),
}

impl fmt::Display for ConfidenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecognizedFaces => write!(f, "No recognized faces"),
            Self::Mean(mean) => write!(f, "Average Confidence Rate: {mean:.2}%"),
        }
    }
}

/// Accumulates confidences and yields a report each time the interval elapses.
pub struct ConfidenceWindow {
    interval: Duration,
    started: Instant,
    sum: f64,
    count: usize,
}

impl ConfidenceWindow {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, started: Instant) -> Self {
        Self {
            interval,
            started,
            sum: 0.0,
            count: 0,
        }
    }

    /// Add one frame's results. Unknown faces count with confidence 0.
    pub fn record(&mut self, matches: &[MatchResult]) {
        self.sum += matches.iter().map(|m| m.confidence as f64).sum::<f64>();
        self.count += matches.len();
    }

    /// Report and reset if the interval has elapsed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<ConfidenceReport> {
        if now.saturating_duration_since(self.started) < self.interval {
            return None;
        }
        let report = self.current();
        self.started = now;
        self.sum = 0.0;
        self.count = 0;
        Some(report)
    }

    /// Aggregate of what has been recorded so far, without resetting.
    pub fn current(&self) -> ConfidenceReport {
        if self.count == 0 {
            ConfidenceReport::NoRecognizedFaces
        } else {
            ConfidenceReport::Mean((self.sum / self.count as f64) as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceBox, UNKNOWN_LABEL};

    fn result(label: &str, confidence: f32) -> MatchResult {
        MatchResult {
            face: FaceBox { top: 0, right: 10, bottom: 10, left: 0 },
            label: label.into(),
            confidence,
        }
    }

    #[test]
    fn test_mean_across_frames_in_interval() {
        let t0 = Instant::now();
        let mut window = ConfidenceWindow::starting_at(Duration::from_secs(1), t0);
        window.record(&[result("alice", 90.0), result("bob", 60.0)]);
        window.record(&[]);
        window.record(&[result("alice", 30.0)]);

        assert_eq!(window.poll(t0 + Duration::from_millis(500)), None);
        assert_eq!(
            window.poll(t0 + Duration::from_secs(1)),
            Some(ConfidenceReport::Mean(60.0))
        );
    }

    #[test]
    fn test_no_faces_is_distinct_from_zero_mean() {
        let t0 = Instant::now();
        let mut window = ConfidenceWindow::starting_at(Duration::from_secs(1), t0);
        window.record(&[]);
        assert_eq!(
            window.poll(t0 + Duration::from_secs(2)),
            Some(ConfidenceReport::NoRecognizedFaces)
        );

        window.record(&[result(UNKNOWN_LABEL, 0.0)]);
        assert_eq!(
            window.poll(t0 + Duration::from_secs(4)),
            Some(ConfidenceReport::Mean(0.0))
        );
    }

    #[test]
    fn test_poll_resets_window() {
        let t0 = Instant::now();
        let mut window = ConfidenceWindow::starting_at(Duration::from_secs(1), t0);
        window.record(&[result("alice", 80.0)]);
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(window.poll(t1), Some(ConfidenceReport::Mean(80.0)));

        // Interval restarts from the last report.
        assert_eq!(window.poll(t1 + Duration::from_millis(999)), None);
        assert_eq!(
            window.poll(t1 + Duration::from_secs(1)),
            Some(ConfidenceReport::NoRecognizedFaces)
        );
    }

    #[test]
    fn test_report_display() {
        assert_eq!(ConfidenceReport::NoRecognizedFaces.to_string(), "No recognized faces");
        assert_eq!(
            ConfidenceReport::Mean(87.256).to_string(),
            "Average Confidence Rate: 87.26%"
        );
    }
}
