//! OrbitSync Core - Simulated Orbital Clock and Position Propagation
//!
//! This library keeps a group of sibling instances on one shared simulated
//! timeline and answers position queries for a static set of bodies:
//! 1. **Clock**: scaled simulated time folded in lazily under a single lock
//! 2. **Orbit model**: pure circular-orbit propagation in one coordinate plane
//! 3. **Propagation**: best-effort fan-out of authoritative time to siblings
//!
//! Durable state is a single snapshot (epoch start + simulated seconds) kept
//! in sled and written on shutdown.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod orbit;
pub mod store;
pub mod timefmt;

// Re-export key types for convenience
pub use broadcast::{BroadcastReport, Broadcaster, DEFAULT_PEER_TIMEOUT};
pub use clock::{AbsoluteSet, ScaleChange, SimulatedClock};
pub use config::InstanceConfig;
pub use error::{ClockError, ComputationError, ConfigurationError, LifecycleError, PersistenceError};
pub use lifecycle::{
    Instance, InstanceStatus, LifecycleState, ScaleAck, StopOutcome, StopReport, SyncAck,
};
pub use orbit::{
    compute_position, orbit_angle, Body, BodyPosition, BodyRegistry, BodySpec, Direction,
    OrbitalPlane, UnknownPlanePolicy,
};
pub use store::{MemorySnapshotStore, PersistedSnapshot, SledSnapshotStore, SnapshotBackend, SnapshotStore};
pub use timefmt::{format_simulated_time, SIMULATED_TIME_FORMAT};
