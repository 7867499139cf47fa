//! The "CLOCK" - scaled simulated time shared by all handlers of an instance
//!
//! Simulated time is accumulated lazily: every read folds the wall time
//! elapsed since the previous read into `simulated_seconds` at the scale that
//! was in force during that interval. All fold-ins happen under one lock, so
//! two concurrent readers can never apply the same interval twice.

use chrono::{DateTime, Utc};
use orbitsync_env::SyncContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClockError, ComputationError};
use crate::store::PersistedSnapshot;
use crate::timefmt;

/// Mutable clock state. Only ever touched while holding the clock lock.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClockState {
    /// Wall-clock instant corresponding to simulated second zero
    epoch_start: DateTime<Utc>,

    /// Accumulated simulated seconds
    simulated_seconds: f64,

    /// Simulated seconds per wall-clock second
    scale: f64,

    /// Context time of the last fold-in
    last_update: Duration,
}

impl ClockState {
    fn fold_in(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_update);
        self.simulated_seconds += elapsed.as_secs_f64() * self.scale;
        self.last_update = now;
    }
}

/// Result of a scale change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleChange {
    pub previous_scale: f64,
    pub scale: f64,
    /// Simulated seconds at the instant the new scale took effect
    pub simulated_seconds: f64,
}

/// Result of adopting an absolute value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteSet {
    /// Local value just before it was overwritten
    pub previous_seconds: f64,
    pub simulated_seconds: f64,
}

impl AbsoluteSet {
    /// How far the local clock had drifted from the adopted value.
    pub fn drift(&self) -> f64 {
        self.previous_seconds - self.simulated_seconds
    }
}

fn validate_scale(scale: f64) -> Result<f64, ClockError> {
    if scale.is_finite() && scale >= 0.0 {
        Ok(scale)
    } else {
        Err(ClockError::InvalidScale(scale))
    }
}

/// Simulated clock driven by an injectable wall clock.
pub struct SimulatedClock<Ctx: SyncContext> {
    context: Arc<Ctx>,
    state: Mutex<ClockState>,
}

impl<Ctx: SyncContext> SimulatedClock<Ctx> {
    /// Creates a clock resuming from `snapshot` at the given scale.
    pub fn new(context: Arc<Ctx>, snapshot: PersistedSnapshot, scale: f64) -> Result<Self, ClockError> {
        let scale = validate_scale(scale)?;
        if !snapshot.simulated_seconds.is_finite() {
            return Err(ComputationError::NonFiniteSeconds(snapshot.simulated_seconds).into());
        }
        let last_update = context.now();
        Ok(Self {
            context,
            state: Mutex::new(ClockState {
                epoch_start: snapshot.epoch_start,
                simulated_seconds: snapshot.simulated_seconds,
                scale,
                last_update,
            }),
        })
    }

    /// Folds in elapsed wall time and returns the current simulated seconds.
    pub fn now_seconds(&self) -> f64 {
        let mut state = self.state.lock();
        state.fold_in(self.context.now());
        state.simulated_seconds
    }

    /// Folds in elapsed time at the current scale, then installs `new_scale`.
    pub fn set_scale(&self, new_scale: f64) -> Result<ScaleChange, ClockError> {
        let new_scale = validate_scale(new_scale)?;
        self.update_scale(|_| new_scale)
    }

    /// Derives the new scale from the current one under the clock lock.
    ///
    /// An invalid result is rejected and the scale is left as it was.
    pub fn update_scale<F>(&self, derive: F) -> Result<ScaleChange, ClockError>
    where
        F: FnOnce(f64) -> f64,
    {
        let mut state = self.state.lock();
        let new_scale = validate_scale(derive(state.scale))?;
        state.fold_in(self.context.now());
        let previous_scale = state.scale;
        state.scale = new_scale;
        Ok(ScaleChange {
            previous_scale,
            scale: new_scale,
            simulated_seconds: state.simulated_seconds,
        })
    }

    /// Overwrites the simulated seconds with a peer's authoritative value.
    ///
    /// The scale is left untouched.
    pub fn set_absolute(&self, seconds: f64) -> Result<AbsoluteSet, ClockError> {
        if !seconds.is_finite() {
            return Err(ComputationError::NonFiniteSeconds(seconds).into());
        }
        let mut state = self.state.lock();
        state.fold_in(self.context.now());
        let previous_seconds = state.simulated_seconds;
        state.simulated_seconds = seconds;
        Ok(AbsoluteSet {
            previous_seconds,
            simulated_seconds: seconds,
        })
    }

    pub fn scale(&self) -> f64 {
        self.state.lock().scale
    }

    pub fn epoch_start(&self) -> DateTime<Utc> {
        self.state.lock().epoch_start
    }

    /// Folds in elapsed time and returns the persistable part of the state.
    pub fn snapshot(&self) -> PersistedSnapshot {
        let mut state = self.state.lock();
        state.fold_in(self.context.now());
        PersistedSnapshot {
            epoch_start: state.epoch_start,
            simulated_seconds: state.simulated_seconds,
        }
    }

    /// Current simulated instant: `epoch_start + simulated_seconds`.
    pub fn simulated_time(&self) -> Result<DateTime<Utc>, ComputationError> {
        let snapshot = self.snapshot();
        timefmt::simulated_instant(snapshot.epoch_start, snapshot.simulated_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::time::SystemTime;

    /// Manually advanced wall clock.
    #[derive(Default)]
    struct FakeContext {
        now_ns: Mutex<u64>,
    }

    impl FakeContext {
        fn advance(&self, duration: Duration) {
            *self.now_ns.lock() += duration.as_nanos() as u64;
        }
    }

    #[async_trait]
    impl SyncContext for FakeContext {
        fn now(&self) -> Duration {
            Duration::from_nanos(*self.now_ns.lock())
        }

        fn system_time(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH + self.now()
        }

        async fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }

        fn spawn<F>(&self, _name: &str, _future: F)
        where
            F: std::future::Future<Output = ()> + Send + 'static,
        {
        }
    }

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn clock_at(seconds: f64, scale: f64) -> (Arc<FakeContext>, SimulatedClock<FakeContext>) {
        let ctx = Arc::new(FakeContext::default());
        let snapshot = PersistedSnapshot {
            epoch_start: epoch(),
            simulated_seconds: seconds,
        };
        let clock = SimulatedClock::new(Arc::clone(&ctx), snapshot, scale).unwrap();
        (ctx, clock)
    }

    #[test]
    fn test_linear_advance() {
        let (ctx, clock) = clock_at(100.0, 60.0);
        assert_eq!(clock.now_seconds(), 100.0);

        ctx.advance(Duration::from_secs(2));
        assert_relative_eq!(clock.now_seconds(), 220.0, epsilon = 1e-9);

        // A second read with no elapsed time does not advance again
        assert_relative_eq!(clock.now_seconds(), 220.0, epsilon = 1e-9);
    }

    #[test]
    fn test_scale_change_preserves_elapsed_time() {
        let (ctx, clock) = clock_at(0.0, 1.0);

        clock.set_scale(10.0).unwrap();
        ctx.advance(Duration::from_secs(3));
        let change = clock.set_scale(0.5).unwrap();
        assert_relative_eq!(change.simulated_seconds, 30.0, epsilon = 1e-9);
        assert_eq!(change.previous_scale, 10.0);
        assert_eq!(change.scale, 0.5);

        ctx.advance(Duration::from_secs(4));
        assert_relative_eq!(clock.now_seconds(), 32.0, epsilon = 1e-9);
    }

    #[test]
    fn test_set_absolute_keeps_scale() {
        let (ctx, clock) = clock_at(0.0, 2.0);
        ctx.advance(Duration::from_secs(5));

        let set = clock.set_absolute(1000.0).unwrap();
        assert_relative_eq!(set.previous_seconds, 10.0, epsilon = 1e-9);
        assert_relative_eq!(set.drift(), -990.0, epsilon = 1e-9);
        assert_eq!(clock.scale(), 2.0);

        ctx.advance(Duration::from_secs(1));
        assert_relative_eq!(clock.now_seconds(), 1002.0, epsilon = 1e-9);
    }

    #[test]
    fn test_absolute_set_may_move_backwards() {
        let (ctx, clock) = clock_at(500.0, 1.0);
        ctx.advance(Duration::from_secs(1));
        clock.set_absolute(10.0).unwrap();
        assert_eq!(clock.now_seconds(), 10.0);
    }

    #[test]
    fn test_invalid_inputs_leave_state_untouched() {
        let (ctx, clock) = clock_at(42.0, 3.0);
        assert!(matches!(clock.set_scale(f64::NAN), Err(ClockError::InvalidScale(_))));
        assert_eq!(clock.set_scale(-1.0), Err(ClockError::InvalidScale(-1.0)));
        assert!(clock.set_scale(f64::INFINITY).is_err());
        assert!(matches!(
            clock.set_absolute(f64::NAN),
            Err(ClockError::Computation(ComputationError::NonFiniteSeconds(_)))
        ));

        assert_eq!(clock.scale(), 3.0);
        ctx.advance(Duration::from_secs(1));
        assert_relative_eq!(clock.now_seconds(), 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_update_scale_reads_and_writes_under_one_lock() {
        let (ctx, clock) = clock_at(0.0, 1.0);
        let clock = Arc::new(clock);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    clock.update_scale(|s| s * 2.0).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(clock.scale(), 1024.0);

        // A derived scale that fails validation changes nothing
        assert!(clock.update_scale(|s| -s).is_err());
        assert_eq!(clock.scale(), 1024.0);
        ctx.advance(Duration::from_secs(1));
        assert_relative_eq!(clock.now_seconds(), 1024.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_scale_pauses() {
        let (ctx, clock) = clock_at(7.0, 0.0);
        ctx.advance(Duration::from_secs(3600));
        assert_eq!(clock.now_seconds(), 7.0);
    }

    #[test]
    fn test_simulated_time_and_snapshot() {
        let (ctx, clock) = clock_at(0.0, 60.0);
        ctx.advance(Duration::from_secs(61));

        let snapshot = clock.snapshot();
        assert_eq!(snapshot.epoch_start, epoch());
        assert_relative_eq!(snapshot.simulated_seconds, 3660.0, epsilon = 1e-9);

        let instant = clock.simulated_time().unwrap();
        assert_eq!(instant.format("%H:%M:%S").to_string(), "01:01:00");
    }

    #[test]
    fn test_concurrent_readers_never_double_count() {
        let (ctx, clock) = clock_at(0.0, 1.0);
        let clock = Arc::new(clock);
        ctx.advance(Duration::from_secs(10));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        clock.now_seconds();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_relative_eq!(clock.now_seconds(), 10.0, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_piecewise_scale_integral(
            steps in proptest::collection::vec((0.0f64..1000.0, 0u64..10_000), 1..20)
        ) {
            let (ctx, clock) = clock_at(0.0, 1.0);
            let mut expected = 0.0;
            for (scale, millis) in &steps {
                clock.set_scale(*scale).unwrap();
                ctx.advance(Duration::from_millis(*millis));
                expected += scale * (*millis as f64 / 1000.0);
            }
            let actual = clock.now_seconds();
            prop_assert!((actual - expected).abs() <= 1e-9 * expected.max(1.0));
        }
    }
}
