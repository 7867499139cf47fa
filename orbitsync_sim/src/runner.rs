//! Scenario runner - executes fault scenarios against a simulated sibling group.

use crate::oracle::{close_enough, Oracle};
use crate::scenarios::ScenarioId;
use crate::world::{Delivery, SimConfig, SimWorld};

use nalgebra::Vector3;
use orbitsync_core::{ConfigurationError, LifecycleError, ScaleAck, StopOutcome};
use orbitsync_env::NetworkController;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Why a scenario failed.
#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error("Instance error: {0}")]
    Instance(#[from] LifecycleError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Instance {instance} reads {observed} simulated seconds, expected {expected}")]
    Divergence {
        instance: usize,
        expected: f64,
        observed: f64,
    },

    #[error("Body {body} on instance {instance} is {offset} off the reference position")]
    Position {
        instance: usize,
        body: String,
        offset: f64,
    },

    #[error("{0}")]
    Assertion(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Size of the sibling group
    pub instances: usize,

    /// Virtual wall-clock time at the end, in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    pub scale_changes: u64,

    /// Envelopes accepted by the simulated network
    pub envelopes_accepted: u64,

    /// Envelopes applied by a running instance
    pub envelopes_adopted: u64,

    /// Envelopes that reached a stopped instance
    pub envelopes_dropped: u64,

    /// Per-sibling push failures reported by publishers
    pub push_failures: u64,

    /// Largest drift corrected by an adoption
    pub max_abs_drift: f64,
}

impl ScenarioMetrics {
    fn record_ack(&mut self, ack: &ScaleAck) {
        self.scale_changes += 1;
        self.push_failures += ack.siblings_failed as u64;
    }

    fn record_delivery(&mut self, delivery: &Delivery) {
        self.envelopes_adopted += delivery.adopted as u64;
        self.envelopes_dropped += delivery.dropped as u64;
        self.max_abs_drift = self.max_abs_drift.max(delivery.max_abs_drift);
    }
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of sibling instances
    num_instances: usize,

    /// Simulated wall-clock duration in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_instances: usize) -> Self {
        Self {
            seed,
            num_instances,
            max_duration_secs: 60.0,
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    fn whole_seconds(&self) -> u64 {
        self.max_duration_secs.max(1.0) as u64
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let instances = self.num_instances.max(scenario.min_instances());
        info!("Starting scenario: {} (seed={}, instances={})", scenario.name(), self.seed, instances);

        let mut metrics = ScenarioMetrics::default();
        let mut final_time_secs = 0.0;

        let outcome = (|| -> Result<(), ScenarioFailure> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(|e| ScenarioFailure::Runtime(e.to_string()))?;

            let mut world = SimWorld::new(SimConfig {
                seed: self.seed,
                num_instances: instances,
                ..Default::default()
            })?;

            let result = runtime.block_on(async {
                match scenario {
                    ScenarioId::ScaleSync => self.run_scale_sync(&mut world, &mut metrics).await,
                    ScenarioId::PartialOutage => self.run_partial_outage(&mut world, &mut metrics).await,
                    ScenarioId::RestartContinuity => self.run_restart_continuity(&mut world, &mut metrics).await,
                    ScenarioId::ShutdownHandoff => self.run_shutdown_handoff(&mut world, &mut metrics).await,
                    ScenarioId::ScaleStorm => self.run_scale_storm(&mut world, &mut metrics).await,
                }
            });

            metrics.envelopes_accepted = world.router.total_accepted();
            final_time_secs = world.now().as_secs_f64();
            result
        })();

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: outcome.is_ok(),
            instances,
            final_time_secs,
            failure_reason: outcome.err().map(|e| e.to_string()),
            metrics,
        }
    }

    /// Scale change on instance 0; siblings adopt the published value.
    async fn run_scale_sync(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioFailure> {
        let n = world.instance_count();
        world.start_all()?;
        world.advance(Duration::from_secs(10));

        let expected = set_scale(world, metrics, 0, 60.0).await?.simulated_seconds;
        let delivery = world.deliver_pending();
        metrics.record_delivery(&delivery);
        if delivery.adopted != n - 1 {
            return Err(ScenarioFailure::Assertion(format!(
                "{} of {} siblings adopted the published time",
                delivery.adopted,
                n - 1
            )));
        }
        for i in 1..n {
            expect_exact(world, i, expected)?;
        }

        for _ in 0..self.whole_seconds() {
            world.advance(Duration::from_secs(1));
            check_clocks(world)?;
        }
        check_positions(world)
    }

    /// Unreachable siblings only show up in the ack; reachable ones get exactly one envelope.
    async fn run_partial_outage(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioFailure> {
        let n = world.instance_count();
        world.start_all()?;

        let down: Vec<usize> = (1..n).filter(|i| i % 2 == 1).collect();
        for &i in &down {
            world.network_controller.set_unreachable(world.endpoint(i));
        }

        world.advance(Duration::from_secs(30));
        let ack = set_scale(world, metrics, 0, 10.0).await?;
        if ack.siblings_failed != down.len() || ack.siblings_notified != n - 1 - down.len() {
            return Err(ScenarioFailure::Assertion(format!(
                "ack reported {} notified / {} failed with {} siblings down",
                ack.siblings_notified,
                ack.siblings_failed,
                down.len()
            )));
        }

        let delivery = world.deliver_pending();
        metrics.record_delivery(&delivery);
        for i in 1..n {
            let want = if down.contains(&i) { 0 } else { 1 };
            let got = world.router.accepted(world.endpoint(i));
            if got != want {
                return Err(ScenarioFailure::Assertion(format!(
                    "sibling {} received {} envelopes, expected {}",
                    i, got, want
                )));
            }
        }
        check_clocks(world)?;

        world.network_controller.heal_all();
        world.advance(Duration::from_secs(self.whole_seconds()));
        set_scale(world, metrics, 0, 1.0).await?;
        let delivery = world.deliver_pending();
        metrics.record_delivery(&delivery);
        if delivery.adopted != n - 1 {
            return Err(ScenarioFailure::Assertion(format!(
                "after healing only {} of {} siblings adopted",
                delivery.adopted,
                n - 1
            )));
        }
        check_clocks(world)
    }

    /// Simulated time does not advance while an instance is down.
    async fn run_restart_continuity(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioFailure> {
        world.start_all()?;
        set_scale(world, metrics, 0, 3.0).await?;
        world.advance(Duration::from_secs(100));

        let report = stop(world, 0).await?;
        if !report.saved {
            return Err(ScenarioFailure::Assertion("snapshot was not saved".to_string()));
        }
        let stored = world.instances[0].store.peek().map(|s| s.simulated_seconds);
        if stored != Some(report.simulated_seconds) {
            return Err(ScenarioFailure::Assertion(format!(
                "store holds {:?}, shutdown reported {}",
                stored, report.simulated_seconds
            )));
        }
        metrics.record_delivery(&world.deliver_pending());

        world.advance(Duration::from_secs(self.whole_seconds()));
        world.respawn(0)?;
        world.start(0)?;
        expect_exact(world, 0, report.simulated_seconds)?;
        if world.instance(0).status().scale != Some(1.0) {
            return Err(ScenarioFailure::Assertion("restart did not reset the scale".to_string()));
        }

        world.advance(Duration::from_secs(10));
        check_clocks(world)
    }

    /// Concurrent stops run the sequence once and publish once.
    async fn run_shutdown_handoff(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioFailure> {
        let n = world.instance_count();
        world.start_all()?;
        set_scale(world, metrics, 0, 100.0).await?;
        metrics.record_delivery(&world.deliver_pending());
        world.advance(Duration::from_secs(20));

        let before: Vec<u64> = (0..n).map(|i| world.router.accepted(world.endpoint(i))).collect();
        let expected = world.oracle.stopped(0, world.now());

        let instance = std::sync::Arc::clone(world.instance(0));
        let (a, b) = tokio::join!(instance.stop(), instance.stop());
        let outcomes = [a?, b?];
        let reports: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                StopOutcome::Completed(report) => Some(report),
                StopOutcome::AlreadyStopping => None,
            })
            .collect();
        let [report] = reports.as_slice() else {
            return Err(ScenarioFailure::Assertion(format!(
                "{} stop calls ran the shutdown sequence",
                reports.len()
            )));
        };
        if let Some(expected) = expected {
            if !close_enough(report.simulated_seconds, expected) {
                return Err(ScenarioFailure::Divergence {
                    instance: 0,
                    expected,
                    observed: report.simulated_seconds,
                });
            }
        }
        if !matches!(instance.stop().await?, StopOutcome::AlreadyStopping) {
            return Err(ScenarioFailure::Assertion("third stop ran the sequence again".to_string()));
        }

        for i in 1..n {
            let sent = world.router.accepted(world.endpoint(i)) - before[i];
            if sent != 1 {
                return Err(ScenarioFailure::Assertion(format!(
                    "sibling {} received {} shutdown envelopes",
                    i, sent
                )));
            }
        }

        let final_seconds = report.simulated_seconds;
        metrics.record_delivery(&world.deliver_pending());
        for i in 1..n {
            expect_exact(world, i, final_seconds)?;
        }
        world.advance(Duration::from_secs(self.whole_seconds()));
        check_clocks(world)
    }

    /// Random commands on random instances, with latency on every link.
    async fn run_scale_storm(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioFailure> {
        let n = world.instance_count();
        let mut rng = world.context.rng(0x5ca1e);
        world.start_all()?;

        for i in 0..n {
            let latency = rng.gen_range(0..50);
            world.network_controller.set_link_latency(world.endpoint(i), latency);
        }

        let steps = self.whole_seconds() * 10;
        for step in 0..steps {
            world.advance(Duration::from_millis(rng.gen_range(0..2000)));
            let i = rng.gen_range(0..n);
            let current = world.oracle.scale(i).unwrap_or(1.0);

            match rng.gen_range(0..10) {
                0..=5 => {
                    let scale = if rng.gen_bool(0.1) { 0.0 } else { rng.gen_range(0.0..1000.0) };
                    set_scale(world, metrics, i, scale).await?;
                }
                6 | 7 => metrics.record_delivery(&world.deliver_pending()),
                8 => {
                    world.oracle.set_scale(i, current * 2.0, world.now());
                    metrics.record_ack(&world.instance(i).speed_up().await?);
                }
                _ => {
                    world.oracle.set_scale(i, current / 2.0, world.now());
                    metrics.record_ack(&world.instance(i).slow_down().await?);
                }
            }

            debug!(step, instance = i, now = ?world.now(), "Storm step");
            check_clocks(world)?;
        }

        metrics.record_delivery(&world.deliver_pending());
        check_clocks(world)?;
        check_positions(world)
    }
}

/// Applies a scale change on instance `i` and checks the value it reports
/// against the oracle.
async fn set_scale(
    world: &mut SimWorld,
    metrics: &mut ScenarioMetrics,
    i: usize,
    scale: f64,
) -> Result<ScaleAck, ScenarioFailure> {
    let expected = world.oracle.set_scale(i, scale, world.now());
    let ack = world.instance(i).set_scale(scale).await?;
    metrics.record_ack(&ack);

    match expected {
        Some(expected) if !close_enough(ack.simulated_seconds, expected) => Err(ScenarioFailure::Divergence {
            instance: i,
            expected,
            observed: ack.simulated_seconds,
        }),
        _ => Ok(ack),
    }
}

async fn stop(world: &mut SimWorld, i: usize) -> Result<orbitsync_core::StopReport, ScenarioFailure> {
    world.oracle.stopped(i, world.now());
    match world.instance(i).stop().await? {
        StopOutcome::Completed(report) => Ok(report),
        StopOutcome::AlreadyStopping => Err(ScenarioFailure::Assertion(format!("instance {} was already stopping", i))),
    }
}

fn expect_exact(world: &SimWorld, i: usize, expected: f64) -> Result<(), ScenarioFailure> {
    let observed = world.instance(i).simulated_seconds()?;
    if observed == expected {
        Ok(())
    } else {
        Err(ScenarioFailure::Divergence {
            instance: i,
            expected,
            observed,
        })
    }
}

/// Every running instance must agree with its oracle ledger.
fn check_clocks(world: &mut SimWorld) -> Result<(), ScenarioFailure> {
    let now = world.now();
    for i in 0..world.instance_count() {
        let Some(expected) = world.oracle.expected(i, now) else {
            continue;
        };
        let observed = world.instance(i).simulated_seconds()?;
        if !close_enough(observed, expected) {
            return Err(ScenarioFailure::Divergence {
                instance: i,
                expected,
                observed,
            });
        }
    }
    Ok(())
}

/// Every running instance must place every body where the closed form says.
fn check_positions(world: &SimWorld) -> Result<(), ScenarioFailure> {
    for i in 0..world.instance_count() {
        let instance = world.instance(i);
        let Ok(seconds) = instance.simulated_seconds() else {
            continue;
        };
        let positions = instance.positions(&[])?;
        for (spec, position) in world.config.bodies.iter().zip(&positions) {
            let reference = Oracle::expected_position(spec, seconds);
            let offset = (Vector3::new(position.x, position.y, position.z) - reference).norm();
            if offset > 1e-6 * reference.norm().max(1.0) {
                return Err(ScenarioFailure::Position {
                    instance: i,
                    body: spec.name.clone(),
                    offset,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_scenarios_pass() {
        for scenario in ScenarioId::all() {
            let result = ScenarioRunner::new(42, 3).with_duration(5.0).run(scenario);
            assert!(result.passed, "{} failed: {:?}", scenario, result.failure_reason);
            assert_eq!(result.instances, 3);
        }
    }

    #[test]
    fn test_runs_are_deterministic() {
        let a = ScenarioRunner::new(9, 4).with_duration(3.0).run(ScenarioId::ScaleStorm);
        let b = ScenarioRunner::new(9, 4).with_duration(3.0).run(ScenarioId::ScaleStorm);
        assert!(a.passed, "{:?}", a.failure_reason);
        assert_eq!(a.final_time_secs, b.final_time_secs);
        assert_eq!(a.metrics.envelopes_accepted, b.metrics.envelopes_accepted);
        assert_eq!(a.metrics.scale_changes, b.metrics.scale_changes);
    }

    #[test]
    fn test_small_groups_are_raised_to_minimum() {
        let result = ScenarioRunner::new(1, 1).with_duration(2.0).run(ScenarioId::PartialOutage);
        assert_eq!(result.instances, 3);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_partial_outage_counts_failures() {
        let result = ScenarioRunner::new(5, 5).with_duration(2.0).run(ScenarioId::PartialOutage);
        assert!(result.passed, "{:?}", result.failure_reason);
        // siblings 1 and 3 are down for the first change
        assert_eq!(result.metrics.push_failures, 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_scale_storm_holds_for_any_seed(seed in any::<u64>(), instances in 2usize..6) {
            let result = ScenarioRunner::new(seed, instances).with_duration(2.0).run(ScenarioId::ScaleStorm);
            prop_assert!(result.passed, "{:?}", result.failure_reason);
        }
    }
}
