//! OrbitSync Deterministic Simulation Testing (DST) Harness
//!
//! This crate runs a whole sibling group in one process on a virtual clock,
//! injects network faults, and checks every instance against an oracle.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advances only when the scenario says so
//! - **Network**: In-process mailboxes with unreachable peers and per-link latency
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock shared by all instances)   │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼─────┐             ┌────▼─────┐                      │
//! │  │ Instance │────────────►│ Instance │     ...              │
//! │  │    #0    │  SimRouter  │    #1    │                      │
//! │  └──────────┘  mailboxes  └──────────┘                      │
//! │       ▲                        ▲                            │
//! │  ┌────┴────────────────────────┴────┐                       │
//! │  │             Oracle                │                       │
//! │  │  (Reference clocks + positions)   │                       │
//! │  └───────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use orbitsync_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 3).with_duration(10.0).run(ScenarioId::ScaleStorm);
//! assert!(result.passed);
//! ```

mod context;
mod network;
mod oracle;
mod runner;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use network::{SimNetwork, SimNetworkController, SimRouter};
pub use oracle::{close_enough, Ledger, Oracle};
pub use runner::{ScenarioFailure, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{default_bodies, Delivery, InstanceHandle, SimConfig, SimInstance, SimWorld};
