//! Simulated peer transport with fault injection.

use async_trait::async_trait;
use orbitsync_env::{EnvError, InstanceId, NetworkController, PeerEndpoint, PeerTransport, SyncContext, SyncEnvelope};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::context::SimContext;

/// Central mailbox table shared by every `SimNetwork` in a world.
///
/// Pushes land in the target's inbox; the world drains inboxes explicitly,
/// so delivery order is deterministic.
#[derive(Default)]
pub struct SimRouter {
    inboxes: Mutex<HashMap<PeerEndpoint, VecDeque<SyncEnvelope>>>,
    accepted: Mutex<HashMap<PeerEndpoint, u64>>,
}

impl SimRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers an endpoint so pushes to it can be accepted.
    pub fn register(&self, endpoint: &PeerEndpoint) {
        self.inboxes.lock().entry(endpoint.clone()).or_default();
    }

    /// Takes every queued envelope for `endpoint`.
    pub fn drain(&self, endpoint: &PeerEndpoint) -> Vec<SyncEnvelope> {
        self.inboxes
            .lock()
            .get_mut(endpoint)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Envelopes accepted for `endpoint` since the world was created.
    pub fn accepted(&self, endpoint: &PeerEndpoint) -> u64 {
        self.accepted.lock().get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_accepted(&self) -> u64 {
        self.accepted.lock().values().sum()
    }

    fn enqueue(&self, endpoint: &PeerEndpoint, envelope: SyncEnvelope) -> bool {
        let mut inboxes = self.inboxes.lock();
        let Some(queue) = inboxes.get_mut(endpoint) else {
            return false;
        };
        queue.push_back(envelope);
        *self.accepted.lock().entry(endpoint.clone()).or_default() += 1;
        true
    }
}

/// Network controller for fault injection.
#[derive(Default)]
pub struct SimNetworkController {
    /// Peers whose pushes fail immediately
    unreachable: Mutex<HashSet<PeerEndpoint>>,

    /// Per-peer delivery latency in milliseconds
    link_latency: Mutex<HashMap<PeerEndpoint, u64>>,
}

impl SimNetworkController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_reachable(&self, peer: &PeerEndpoint) -> bool {
        !self.unreachable.lock().contains(peer)
    }

    /// Gets the latency for a peer (default 0).
    pub fn latency(&self, peer: &PeerEndpoint) -> u64 {
        self.link_latency.lock().get(peer).copied().unwrap_or(0)
    }
}

impl NetworkController for SimNetworkController {
    fn set_unreachable(&self, peer: &PeerEndpoint) {
        self.unreachable.lock().insert(peer.clone());
    }

    fn heal_all(&self) {
        self.unreachable.lock().clear();
    }

    fn set_link_latency(&self, peer: &PeerEndpoint, latency_ms: u64) {
        self.link_latency.lock().insert(peer.clone(), latency_ms);
    }
}

/// Simulated transport for one instance.
pub struct SimNetwork {
    /// This instance's ID
    local_id: InstanceId,

    router: Arc<SimRouter>,
    controller: Arc<SimNetworkController>,

    /// Latency is paid on the shared virtual clock
    context: Arc<SimContext>,
}

impl SimNetwork {
    pub fn new(
        local_id: InstanceId,
        router: Arc<SimRouter>,
        controller: Arc<SimNetworkController>,
        context: Arc<SimContext>,
    ) -> Self {
        Self {
            local_id,
            router,
            controller,
            context,
        }
    }
}

#[async_trait]
impl PeerTransport for SimNetwork {
    async fn push(&self, peer: &PeerEndpoint, envelope: &SyncEnvelope) -> Result<(), EnvError> {
        if !self.controller.is_reachable(peer) {
            return Err(EnvError::unreachable(peer));
        }

        let latency = self.controller.latency(peer);
        if latency > 0 {
            self.context.sleep(Duration::from_millis(latency)).await;
        }

        if self.router.enqueue(peer, envelope.clone()) {
            Ok(())
        } else {
            Err(EnvError::unreachable(peer))
        }
    }

    fn local_id(&self) -> InstanceId {
        self.local_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbitsync_env::SyncReason;
    use std::time::SystemTime;

    fn endpoint(i: u16) -> PeerEndpoint {
        PeerEndpoint::parse(&format!("http://sim-{}:8000", i)).unwrap()
    }

    fn network(ctx: &Arc<SimContext>, router: &Arc<SimRouter>, controller: &Arc<SimNetworkController>) -> SimNetwork {
        SimNetwork::new(InstanceId::from_seed(0), Arc::clone(router), Arc::clone(controller), Arc::clone(ctx))
    }

    #[tokio::test]
    async fn test_push_lands_in_inbox() {
        let ctx = SimContext::shared(1);
        let router = SimRouter::new();
        let controller = SimNetworkController::new();
        router.register(&endpoint(1));

        let net = network(&ctx, &router, &controller);
        let envelope = SyncEnvelope::new(net.local_id(), 42.0, SyncReason::ScaleChange, SystemTime::now());
        net.push(&endpoint(1), &envelope).await.unwrap();

        assert_eq!(router.accepted(&endpoint(1)), 1);
        assert_eq!(router.drain(&endpoint(1)), vec![envelope]);
        assert!(router.drain(&endpoint(1)).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_and_unknown_peers_fail() {
        let ctx = SimContext::shared(1);
        let router = SimRouter::new();
        let controller = SimNetworkController::new();
        router.register(&endpoint(1));
        controller.set_unreachable(&endpoint(1));

        let net = network(&ctx, &router, &controller);
        let envelope = SyncEnvelope::new(net.local_id(), 1.0, SyncReason::Shutdown, SystemTime::now());
        assert!(matches!(net.push(&endpoint(1), &envelope).await, Err(EnvError::PeerUnreachable(_))));
        assert!(matches!(net.push(&endpoint(9), &envelope).await, Err(EnvError::PeerUnreachable(_))));
        assert_eq!(router.total_accepted(), 0);

        controller.heal_all();
        assert!(net.push(&endpoint(1), &envelope).await.is_ok());
    }

    #[tokio::test]
    async fn test_latency_advances_virtual_clock() {
        let ctx = SimContext::shared(1);
        let router = SimRouter::new();
        let controller = SimNetworkController::new();
        router.register(&endpoint(2));
        controller.set_link_latency(&endpoint(2), 150);

        let net = network(&ctx, &router, &controller);
        let envelope = SyncEnvelope::new(net.local_id(), 1.0, SyncReason::ScaleChange, SystemTime::now());
        net.push(&endpoint(2), &envelope).await.unwrap();
        assert_eq!(ctx.now(), Duration::from_millis(150));
    }
}
