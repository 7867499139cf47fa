//! Peer transport abstraction for orbitsync instances.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{InstanceId, PeerEndpoint, SyncEnvelope};

/// Abstraction for pushing simulated-time updates to sibling instances.
///
/// # Implementations
///
/// - **Production**: `HttpTransport` - POSTs JSON to `{peer}/sync`
/// - **Simulation**: Channel-based router with unreachable peers and latency
///
/// # Packet Flow
///
/// ```text
/// Instance A                  Transport                  Instance B
///   |                           |                          |
///   |-- push(B, envelope) ----->|                          |
///   |                           |-- [latency] ------------>|
///   |                           |                          |-- set_absolute(seconds)
/// ```
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Delivers a sync envelope to one sibling.
    ///
    /// # Returns
    /// * `Ok(())` - The sibling acknowledged the envelope
    /// * `Err(EnvError)` - Delivery failed; the caller decides whether to log or ignore
    ///
    /// # Note
    /// Implementations must not retry. Timeouts are applied by the caller.
    async fn push(&self, peer: &PeerEndpoint, envelope: &SyncEnvelope) -> Result<(), EnvError>;

    /// Returns this instance's ID.
    fn local_id(&self) -> InstanceId;
}

/// Fault-injection hooks for transports used in simulation.
pub trait NetworkController: Send + Sync {
    /// Marks a peer as unreachable; pushes to it fail immediately.
    fn set_unreachable(&self, peer: &PeerEndpoint);

    /// Makes every peer reachable again.
    fn heal_all(&self);

    /// Sets delivery latency for a specific peer.
    fn set_link_latency(&self, peer: &PeerEndpoint, latency_ms: u64);
}
