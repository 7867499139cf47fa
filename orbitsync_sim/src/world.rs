//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::network::{SimNetwork, SimNetworkController, SimRouter};
use crate::oracle::Oracle;

use orbitsync_core::{BodySpec, ConfigurationError, Instance, InstanceConfig, LifecycleError, MemorySnapshotStore, SyncAck};
use orbitsync_env::{InstanceId, PeerEndpoint, SyncContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Instance type used throughout the harness.
pub type SimInstance = Instance<SimContext, SimNetwork, MemorySnapshotStore>;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of sibling instances
    pub num_instances: usize,

    /// Per-sibling push timeout
    pub peer_timeout: Duration,

    /// Body table shared by every instance
    pub bodies: Vec<BodySpec>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_instances: 3,
            peer_timeout: Duration::from_millis(500),
            bodies: default_bodies(),
        }
    }
}

/// A small mixed constellation covering every plane and both directions.
pub fn default_bodies() -> Vec<BodySpec> {
    vec![
        BodySpec::new("iss", [6771.0, 0.0, 0.0], 5556.0),
        BodySpec::new("molniya", [0.0, 26600.0, 0.0], 43080.0).with_plane("YZ"),
        BodySpec::new("geo", [42164.0, 0.0, 0.0], 86164.0).with_plane("XZ"),
        BodySpec::new("retro", [0.0, 7200.0, 100.0], 6100.0).with_direction(-1),
    ]
}

/// Handle to a simulated instance.
pub struct InstanceHandle {
    pub endpoint: PeerEndpoint,
    pub instance: Arc<SimInstance>,
    pub store: Arc<MemorySnapshotStore>,
    transport: Arc<SimNetwork>,
    config: InstanceConfig,
}

/// The SimWorld - a group of siblings on one virtual clock.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Reference timelines
    pub oracle: Oracle,

    /// Network controller for fault injection
    pub network_controller: Arc<SimNetworkController>,

    pub router: Arc<SimRouter>,

    pub instances: Vec<InstanceHandle>,
}

/// Summary of one inbox sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Delivery {
    pub adopted: usize,
    /// Envelopes that reached a stopped instance
    pub dropped: usize,
    pub max_abs_drift: f64,
}

impl SimWorld {
    /// Creates a world with every instance configured but stopped.
    pub fn new(config: SimConfig) -> Result<Self, ConfigurationError> {
        let context = SimContext::shared(config.seed);
        let router = SimRouter::new();
        let network_controller = SimNetworkController::new();

        let endpoints: Vec<PeerEndpoint> = (0..config.num_instances)
            .map(|i| PeerEndpoint::parse(&format!("http://sim-node-{}:8000", i)))
            .collect::<Result<_, _>>()
            .map_err(|e| ConfigurationError::Parse(e.to_string()))?;

        let mut instances = Vec::with_capacity(endpoints.len());
        for (i, endpoint) in endpoints.iter().enumerate() {
            router.register(endpoint);
            let siblings = endpoints.iter().filter(|e| *e != endpoint).cloned().collect();
            let instance_config = InstanceConfig::new(&format!("sim-node-{}", i), config.bodies.clone())
                .with_siblings(siblings)
                .with_peer_timeout(config.peer_timeout);

            let transport = Arc::new(SimNetwork::new(
                InstanceId::from_seed(config.seed.wrapping_add(i as u64)),
                Arc::clone(&router),
                Arc::clone(&network_controller),
                Arc::clone(&context),
            ));
            let store = Arc::new(MemorySnapshotStore::new());
            let instance = Arc::new(Instance::new(
                &instance_config,
                Arc::clone(&context),
                Arc::clone(&transport),
                Arc::clone(&store),
            )?);

            instances.push(InstanceHandle {
                endpoint: endpoint.clone(),
                instance,
                store,
                transport,
                config: instance_config,
            });
        }

        Ok(Self {
            oracle: Oracle::new(instances.len()),
            config,
            context,
            network_controller,
            router,
            instances,
        })
    }

    pub fn instance(&self, i: usize) -> &Arc<SimInstance> {
        &self.instances[i].instance
    }

    pub fn endpoint(&self, i: usize) -> &PeerEndpoint {
        &self.instances[i].endpoint
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn now(&self) -> Duration {
        self.context.now()
    }

    /// Starts instance `i` and seeds its oracle ledger.
    pub fn start(&mut self, i: usize) -> Result<(), LifecycleError> {
        let instance = Arc::clone(self.instance(i));
        instance.start()?;
        let seconds = instance.simulated_seconds()?;
        let scale = instance.status().scale.unwrap_or(1.0);
        self.oracle.started(i, seconds, scale, self.now());
        Ok(())
    }

    pub fn start_all(&mut self) -> Result<(), LifecycleError> {
        for i in 0..self.instances.len() {
            self.start(i)?;
        }
        Ok(())
    }

    /// Replaces instance `i` with a fresh one on the same store, as a process restart would.
    pub fn respawn(&mut self, i: usize) -> Result<(), ConfigurationError> {
        let handle = &mut self.instances[i];
        handle.instance = Arc::new(Instance::new(
            &handle.config,
            Arc::clone(&self.context),
            Arc::clone(&handle.transport),
            Arc::clone(&handle.store),
        )?);
        Ok(())
    }

    /// Advances virtual time.
    pub fn advance(&self, duration: Duration) {
        self.context.advance_time(duration);
    }

    /// Drains every inbox and lets running instances adopt what they received.
    pub fn deliver_pending(&mut self) -> Delivery {
        let mut delivery = Delivery::default();
        for i in 0..self.instances.len() {
            let endpoint = self.endpoint(i).clone();
            let instance = Arc::clone(self.instance(i));
            for envelope in self.router.drain(&endpoint) {
                match instance.adopt_peer_time(&envelope) {
                    Ok(SyncAck { simulated_seconds, drift }) => {
                        self.oracle.set_absolute(i, simulated_seconds, self.context.now());
                        delivery.adopted += 1;
                        delivery.max_abs_drift = delivery.max_abs_drift.max(drift.abs());
                    }
                    Err(e) => {
                        debug!(%endpoint, error = %e, "Envelope dropped by instance");
                        delivery.dropped += 1;
                    }
                }
            }
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbitsync_core::LifecycleState;

    fn world(n: usize) -> SimWorld {
        SimWorld::new(SimConfig {
            seed: 7,
            num_instances: n,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_sim_world_creation() {
        let world = world(3);
        assert_eq!(world.instance_count(), 3);
        for i in 0..3 {
            assert_eq!(world.instance(i).state(), LifecycleState::Stopped);
            assert_eq!(world.instance(i).broadcaster().siblings().len(), 2);
        }
    }

    #[test]
    fn test_start_all_seeds_oracle() {
        let mut world = world(2);
        world.start_all().unwrap();
        world.advance(Duration::from_secs(4));

        let now = world.now();
        assert_eq!(world.oracle.expected(1, now), Some(4.0));
        assert_eq!(world.instance(1).simulated_seconds().unwrap(), 4.0);
    }

    #[tokio::test]
    async fn test_scale_change_reaches_siblings() {
        let mut world = world(3);
        world.start_all().unwrap();
        world.advance(Duration::from_secs(10));

        let ack = world.instance(0).set_scale(60.0).await.unwrap();
        assert_eq!(ack.siblings_notified, 2);

        let delivery = world.deliver_pending();
        assert_eq!(delivery.adopted, 2);
        assert_eq!(delivery.dropped, 0);
        for i in 1..3 {
            assert_eq!(world.instance(i).simulated_seconds().unwrap(), ack.simulated_seconds);
        }
    }

    #[tokio::test]
    async fn test_stopped_instance_drops_envelopes() {
        let mut world = world(2);
        world.start(0).unwrap();
        world.instance(0).set_scale(2.0).await.unwrap();

        let delivery = world.deliver_pending();
        assert_eq!(delivery.adopted, 0);
        assert_eq!(delivery.dropped, 1);
    }

    #[test]
    fn test_respawn_replaces_instance() {
        let mut world = world(2);
        world.start(0).unwrap();
        let before = Arc::clone(world.instance(0));
        world.respawn(0).unwrap();
        assert!(!Arc::ptr_eq(&before, world.instance(0)));
        assert_eq!(world.instance(0).state(), LifecycleState::Stopped);
    }
}
