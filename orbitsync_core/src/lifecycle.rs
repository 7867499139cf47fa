//! Instance Lifecycle - glues clock, orbit model, store and broadcaster.
//!
//! # State machine
//!
//! ```text
//!   Stopped ──start()──► Starting ──► Running ──stop()──► Stopping ──► Stopped
//!                          │                                 │
//!                    store.load()                   store.save() + publish()
//! ```
//!
//! `stop()` is the single shutdown path. The HTTP route and the OS signal
//! handler both call it; whichever arrives first runs the sequence and the
//! other observes `StopOutcome::AlreadyStopping`.
//!
//! The shutdown sequence and every sibling fan-out run on tasks spawned
//! through the context. Dropping the future returned by `stop()` or
//! `set_scale()` does not cut them short; `stopped()` still resolves.
//!
//! # Usage
//!
//! ```ignore
//! use orbitsync_core::{Instance, InstanceConfig, SnapshotBackend};
//! use orbitsync_env::{HttpTransport, InstanceId, TokioContext};
//!
//! let config = InstanceConfig::load("leo-1.json")?;
//! let transport = Arc::new(HttpTransport::new(InstanceId::new(), config.peer_timeout())?);
//! let store = Arc::new(SnapshotBackend::open(&config.store_path));
//! let instance = Instance::new(&config, TokioContext::shared(), transport, store)?;
//!
//! instance.start()?;
//! let positions = instance.positions(&[])?;
//! instance.stop().await?;
//! ```

use orbitsync_env::{InstanceId, PeerTransport, SyncContext, SyncEnvelope, SyncReason};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::clock::SimulatedClock;
use crate::config::InstanceConfig;
use crate::error::{ConfigurationError, LifecycleError};
use crate::orbit::{compute_position, BodyPosition, BodyRegistry};
use crate::store::{self, SnapshotStore};
use crate::timefmt;

/// Lifecycle states of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Acknowledgment of a scale change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleAck {
    /// Scale actually applied
    pub scale: f64,
    pub previous_scale: f64,
    /// Simulated seconds at the instant of the change (the value broadcast)
    pub simulated_seconds: f64,
    pub siblings_notified: usize,
    pub siblings_failed: usize,
}

/// Acknowledgment of an adopted peer value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncAck {
    pub simulated_seconds: f64,
    /// Local minus adopted value, just before the overwrite
    pub drift: f64,
}

/// What the shutdown sequence did.
#[derive(Debug)]
pub struct StopReport {
    pub simulated_seconds: f64,
    pub saved: bool,
    pub broadcast: BroadcastReport,
}

#[derive(Debug)]
pub enum StopOutcome {
    /// This call ran the shutdown sequence
    Completed(StopReport),
    /// Another caller already started (or finished) it
    AlreadyStopping,
}

/// Snapshot of an instance for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatus {
    pub name: String,
    pub id: String,
    pub state: LifecycleState,
    pub scale: Option<f64>,
    pub simulated_seconds: Option<f64>,
    pub bodies: usize,
    pub siblings: usize,
}

/// One running orbitsync instance.
///
/// Generic over the context, transport and store implementations, allowing
/// the same instance code to run in production (tokio, HTTP, sled) or in
/// the simulation harness.
pub struct Instance<Ctx, Net, S>
where
    Ctx: SyncContext,
    Net: PeerTransport,
    S: SnapshotStore,
{
    name: String,
    context: Arc<Ctx>,
    store: Arc<S>,
    broadcaster: Arc<Broadcaster<Net>>,
    bodies: BodyRegistry,
    initial_scale: f64,
    /// Present only between Starting and Stopped
    clock: RwLock<Option<Arc<SimulatedClock<Ctx>>>>,
    state: Arc<watch::Sender<LifecycleState>>,
}

fn transition(state: &watch::Sender<LifecycleState>, name: &str, from: LifecycleState, to: LifecycleState) -> bool {
    let moved = state.send_if_modified(|state| {
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    });
    if moved {
        info!(instance = %name, %from, %to, "Lifecycle transition");
    }
    moved
}

impl<Ctx, Net, S> Instance<Ctx, Net, S>
where
    Ctx: SyncContext,
    Net: PeerTransport,
    S: SnapshotStore,
{
    /// Validates the configuration and builds a stopped instance.
    pub fn new(
        config: &InstanceConfig,
        context: Arc<Ctx>,
        transport: Arc<Net>,
        store: Arc<S>,
    ) -> Result<Self, ConfigurationError> {
        let bodies = config.validate()?;
        let broadcaster = Arc::new(Broadcaster::new(transport, config.siblings.clone(), config.peer_timeout()));
        let (state, _) = watch::channel(LifecycleState::Stopped);

        Ok(Self {
            name: config.name.clone(),
            context,
            store,
            broadcaster,
            bodies,
            initial_scale: config.initial_scale,
            clock: RwLock::new(None),
            state: Arc::new(state),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> InstanceId {
        self.broadcaster.transport().local_id()
    }

    pub fn bodies(&self) -> &BodyRegistry {
        &self.bodies
    }

    pub fn broadcaster(&self) -> &Broadcaster<Net> {
        &self.broadcaster
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Resolves once the instance is Stopped.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|s| *s == LifecycleState::Stopped).await;
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        transition(&self.state, &self.name, from, to)
    }

    /// Publishes on a spawned task and waits for its report.
    ///
    /// `None` means the task was dropped before it reported.
    async fn publish_detached(&self, envelope: SyncEnvelope) -> Option<BroadcastReport> {
        let (tx, rx) = oneshot::channel();
        let broadcaster = Arc::clone(&self.broadcaster);
        self.context.spawn("publish", async move {
            let _ = tx.send(broadcaster.publish(envelope).await);
        });
        rx.await.ok()
    }

    fn running_clock(&self) -> Result<Arc<SimulatedClock<Ctx>>, LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(LifecycleError::NotRunning(state));
        }
        self.clock
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(LifecycleError::NotRunning(state))
    }

    // ========================================================================
    // STARTING
    // ========================================================================

    /// Loads the persisted snapshot and starts serving.
    pub fn start(&self) -> Result<(), LifecycleError> {
        if !self.transition(LifecycleState::Stopped, LifecycleState::Starting) {
            return Err(LifecycleError::CannotStart(self.state()));
        }

        let snapshot = store::load_or_fresh(&*self.store, self.context.system_time());
        let clock = match SimulatedClock::new(Arc::clone(&self.context), snapshot, self.initial_scale) {
            Ok(clock) => clock,
            Err(e) => {
                error!(instance = %self.name, error = %e, "Failed to initialize clock");
                self.transition(LifecycleState::Starting, LifecycleState::Stopped);
                return Err(e.into());
            }
        };

        *self.clock.write() = Some(Arc::new(clock));
        self.transition(LifecycleState::Starting, LifecycleState::Running);
        info!(
            instance = %self.name,
            simulated_seconds = snapshot.simulated_seconds,
            scale = self.initial_scale,
            bodies = self.bodies.len(),
            siblings = self.broadcaster.siblings().len(),
            "Instance running"
        );
        Ok(())
    }

    // ========================================================================
    // RUNNING
    // ========================================================================

    /// Current positions of the named bodies, or of every body when `names` is empty.
    pub fn positions(&self, names: &[String]) -> Result<Vec<BodyPosition>, LifecycleError> {
        let clock = self.running_clock()?;
        let seconds = clock.now_seconds();

        if names.is_empty() {
            return self
                .bodies
                .iter()
                .map(|body| -> Result<BodyPosition, LifecycleError> {
                    Ok(BodyPosition::new(body.name(), compute_position(body, seconds)?))
                })
                .collect();
        }

        names
            .iter()
            .map(|name| -> Result<BodyPosition, LifecycleError> {
                let body = self
                    .bodies
                    .get(name)
                    .ok_or_else(|| LifecycleError::UnknownBody(name.clone()))?;
                Ok(BodyPosition::new(body.name(), compute_position(body, seconds)?))
            })
            .collect()
    }

    /// Current simulated seconds.
    pub fn simulated_seconds(&self) -> Result<f64, LifecycleError> {
        Ok(self.running_clock()?.now_seconds())
    }

    /// Current simulated time as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn simulated_time(&self) -> Result<String, LifecycleError> {
        let snapshot = self.running_clock()?.snapshot();
        Ok(timefmt::format_simulated_time(snapshot.epoch_start, snapshot.simulated_seconds)?)
    }

    /// Changes the scale, then pushes the simulated time at the change to all siblings.
    ///
    /// Sibling failures are reported in the ack but never fail the command.
    pub async fn set_scale(&self, scale: f64) -> Result<ScaleAck, LifecycleError> {
        self.change_scale(|_| scale).await
    }

    /// Doubles the current scale. A paused clock resumes at 1.0.
    pub async fn speed_up(&self) -> Result<ScaleAck, LifecycleError> {
        self.change_scale(|s| if s == 0.0 { 1.0 } else { s * 2.0 }).await
    }

    /// Halves the current scale.
    pub async fn slow_down(&self) -> Result<ScaleAck, LifecycleError> {
        self.change_scale(|s| s / 2.0).await
    }

    async fn change_scale<F>(&self, derive: F) -> Result<ScaleAck, LifecycleError>
    where
        F: FnOnce(f64) -> f64 + Send,
    {
        let change = self.running_clock()?.update_scale(derive)?;
        info!(
            instance = %self.name,
            previous = change.previous_scale,
            scale = change.scale,
            simulated_seconds = change.simulated_seconds,
            "Scale changed"
        );

        let envelope = self.broadcaster.envelope(
            change.simulated_seconds,
            SyncReason::ScaleChange,
            self.context.system_time(),
        );
        let (siblings_notified, siblings_failed) = match self.publish_detached(envelope).await {
            Some(report) => (report.delivered.len(), report.failed.len()),
            None => {
                error!(instance = %self.name, "Scale broadcast task ended without a report");
                (0, self.broadcaster.siblings().len())
            }
        };

        Ok(ScaleAck {
            scale: change.scale,
            previous_scale: change.previous_scale,
            simulated_seconds: change.simulated_seconds,
            siblings_notified,
            siblings_failed,
        })
    }

    /// Adopts a sibling's authoritative simulated time.
    pub fn adopt_peer_time(&self, envelope: &SyncEnvelope) -> Result<SyncAck, LifecycleError> {
        let clock = self.running_clock()?;
        if envelope.origin == self.id() {
            warn!(instance = %self.name, "Ignoring sync envelope from self");
            return Ok(SyncAck {
                simulated_seconds: clock.now_seconds(),
                drift: 0.0,
            });
        }

        let set = clock.set_absolute(envelope.simulated_seconds)?;
        info!(
            instance = %self.name,
            origin = %envelope.origin,
            reason = ?envelope.reason,
            simulated_seconds = set.simulated_seconds,
            drift = set.drift(),
            "Adopted sibling simulated time"
        );
        Ok(SyncAck {
            simulated_seconds: set.simulated_seconds,
            drift: set.drift(),
        })
    }

    pub fn status(&self) -> InstanceStatus {
        let clock = self.running_clock().ok();
        InstanceStatus {
            name: self.name.clone(),
            id: self.id().to_string(),
            state: self.state(),
            scale: clock.as_ref().map(|c| c.scale()),
            simulated_seconds: clock.as_ref().map(|c| c.now_seconds()),
            bodies: self.bodies.len(),
            siblings: self.broadcaster.siblings().len(),
        }
    }

    // ========================================================================
    // STOPPING
    // ========================================================================

    /// Saves the snapshot, publishes the final simulated time, then stops.
    ///
    /// A failed save is logged and the sequence continues. The sequence runs
    /// on its own task, so it completes even if this future is dropped.
    pub async fn stop(&self) -> Result<StopOutcome, LifecycleError> {
        if !self.transition(LifecycleState::Running, LifecycleState::Stopping) {
            return match self.state() {
                LifecycleState::Stopping | LifecycleState::Stopped => Ok(StopOutcome::AlreadyStopping),
                other => Err(LifecycleError::NotRunning(other)),
            };
        }

        let clock = self.clock.write().take();
        let Some(clock) = clock else {
            self.transition(LifecycleState::Stopping, LifecycleState::Stopped);
            return Err(LifecycleError::NotRunning(LifecycleState::Stopping));
        };

        let snapshot = clock.snapshot();
        let envelope = self.broadcaster.envelope(
            snapshot.simulated_seconds,
            SyncReason::Shutdown,
            self.context.system_time(),
        );

        let name = self.name.clone();
        let store = Arc::clone(&self.store);
        let broadcaster = Arc::clone(&self.broadcaster);
        let state = Arc::clone(&self.state);
        let (tx, rx) = oneshot::channel();

        self.context.spawn("shutdown", async move {
            let saved = match store.save(&snapshot) {
                Ok(()) => true,
                Err(e) => {
                    error!(instance = %name, error = %e, "Failed to save clock snapshot, stopping anyway");
                    false
                }
            };
            let broadcast = broadcaster.publish(envelope).await;

            transition(&state, &name, LifecycleState::Stopping, LifecycleState::Stopped);
            info!(
                instance = %name,
                simulated_seconds = snapshot.simulated_seconds,
                saved,
                "Instance stopped"
            );

            let _ = tx.send(StopReport {
                simulated_seconds: snapshot.simulated_seconds,
                saved,
                broadcast,
            });
        });

        match rx.await {
            Ok(report) => Ok(StopOutcome::Completed(report)),
            Err(_) => Err(LifecycleError::ShutdownInterrupted),
        }
    }
}
