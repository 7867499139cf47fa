//! Ground truth oracle for simulation.
//!
//! The Oracle keeps an independent ledger of what every instance's clock
//! should read, and a closed-form reference for body positions. Scenarios
//! compare the instances against it after every step.

use nalgebra::Vector3;
use orbitsync_core::{BodySpec, OrbitalPlane};
use std::f64::consts::TAU;
use std::time::Duration;

/// Expected clock state of one instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ledger {
    pub seconds: f64,
    pub scale: f64,
    last: Duration,
}

impl Ledger {
    fn settle(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last).as_secs_f64();
        self.seconds += elapsed * self.scale;
        self.last = now;
    }
}

/// Reference timelines for every instance in a world.
#[derive(Debug, Clone, Default)]
pub struct Oracle {
    ledgers: Vec<Option<Ledger>>,
}

impl Oracle {
    pub fn new(instances: usize) -> Self {
        Self {
            ledgers: vec![None; instances],
        }
    }

    /// Instance `i` started at `now` with the given state.
    pub fn started(&mut self, i: usize, seconds: f64, scale: f64, now: Duration) {
        self.ledgers[i] = Some(Ledger {
            seconds,
            scale,
            last: now,
        });
    }

    /// Instance `i` stopped; its ledger freezes at the value it saved.
    pub fn stopped(&mut self, i: usize, now: Duration) -> Option<f64> {
        let ledger = self.ledgers[i].as_mut()?;
        ledger.settle(now);
        let seconds = ledger.seconds;
        self.ledgers[i] = None;
        Some(seconds)
    }

    /// Records a scale change and returns the expected seconds at the change.
    pub fn set_scale(&mut self, i: usize, scale: f64, now: Duration) -> Option<f64> {
        let ledger = self.ledgers[i].as_mut()?;
        ledger.settle(now);
        ledger.scale = scale;
        Some(ledger.seconds)
    }

    /// Records an adopted absolute value.
    pub fn set_absolute(&mut self, i: usize, seconds: f64, now: Duration) {
        if let Some(ledger) = self.ledgers[i].as_mut() {
            ledger.settle(now);
            ledger.seconds = seconds;
        }
    }

    /// Expected seconds of instance `i` at `now`, if it is running.
    pub fn expected(&mut self, i: usize, now: Duration) -> Option<f64> {
        let ledger = self.ledgers[i].as_mut()?;
        ledger.settle(now);
        Some(ledger.seconds)
    }

    pub fn scale(&self, i: usize) -> Option<f64> {
        self.ledgers[i].map(|l| l.scale)
    }

    /// Reference position computed directly from a body spec.
    ///
    /// Unknown planes fall back to XY, matching the default policy.
    pub fn expected_position(spec: &BodySpec, seconds: f64) -> Vector3<f64> {
        let angle = spec.direction.signum() as f64 * TAU * seconds.rem_euclid(spec.period_secs) / spec.period_secs;
        let (sin, cos) = angle.sin_cos();
        let [x, y, z] = spec.offset;
        let plane = spec.plane.parse::<OrbitalPlane>().unwrap_or(OrbitalPlane::XY);
        match plane {
            OrbitalPlane::XY => Vector3::new(x * cos - y * sin, x * sin + y * cos, z),
            OrbitalPlane::XZ => Vector3::new(x * cos - z * sin, y, x * sin + z * cos),
            OrbitalPlane::YZ => Vector3::new(x, y * cos - z * sin, y * sin + z * cos),
        }
    }
}

/// Relative comparison used by every scenario check.
pub fn close_enough(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= 1e-6 * expected.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ledger_integrates_piecewise() {
        let mut oracle = Oracle::new(1);
        oracle.started(0, 0.0, 1.0, Duration::ZERO);

        assert_eq!(oracle.set_scale(0, 10.0, Duration::from_secs(2)), Some(2.0));
        assert_eq!(oracle.expected(0, Duration::from_secs(5)), Some(32.0));

        oracle.set_absolute(0, 100.0, Duration::from_secs(5));
        assert_eq!(oracle.expected(0, Duration::from_secs(6)), Some(110.0));
        assert_eq!(oracle.scale(0), Some(10.0));
    }

    #[test]
    fn test_stopped_instance_has_no_ledger() {
        let mut oracle = Oracle::new(2);
        oracle.started(1, 50.0, 2.0, Duration::ZERO);
        assert_eq!(oracle.stopped(1, Duration::from_secs(5)), Some(60.0));
        assert_eq!(oracle.expected(1, Duration::from_secs(10)), None);
        assert_eq!(oracle.expected(0, Duration::ZERO), None);
    }

    #[test]
    fn test_expected_position_quarter_turn() {
        let spec = BodySpec::new("iss", [6771.0, 0.0, 0.0], 5400.0);
        let p = Oracle::expected_position(&spec, 1350.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 6771.0, epsilon = 1e-9);

        let retro = spec.clone().with_direction(-1);
        let p = Oracle::expected_position(&retro, 1350.0);
        assert_relative_eq!(p.y, -6771.0, epsilon = 1e-9);
    }

    #[test]
    fn test_close_enough() {
        assert!(close_enough(1_000_000.0, 1_000_000.5));
        assert!(!close_enough(10.0, 10.1));
        assert!(close_enough(0.0, 1e-7));
    }
}
