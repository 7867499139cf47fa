//! Core environment context trait for orbitsync instances.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" clock so that the simulated
/// orbital clock can run in both production (tokio) and deterministic
/// simulation environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `std::time::Instant` and `tokio::time`
/// - **Simulation**: `SimContext` - a virtual clock advanced by the harness
///
/// # Determinism
///
/// All reads of wall-clock time made by the simulated clock go through
/// this trait, so a test can advance time by an exact amount and assert
/// on the resulting simulated seconds.
#[async_trait]
pub trait SyncContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since context creation.
    ///
    /// Used to measure elapsed wall time between clock accumulations.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock instant.
    ///
    /// Used to stamp a fresh epoch start on first run.
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task that keeps running when the caller is dropped.
    ///
    /// Used for sequences that must not be cut short by a cancelled request,
    /// such as the shutdown save-then-publish and sibling fan-outs.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
