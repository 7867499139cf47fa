//! orbitsync Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction that lets the simulated
//! orbital clock run in both **Production** (tokio + HTTP) and
//! **Simulation** (virtual clock + in-process router) environments.
//!
//! Two things are intercepted:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - Peer notification (`push()`)
//!
//! # Example
//!
//! ```ignore
//! use orbitsync_env::{PeerEndpoint, PeerTransport, SyncContext, SyncEnvelope, SyncReason};
//!
//! async fn announce<Ctx: SyncContext, Net: PeerTransport>(
//!     ctx: &Ctx,
//!     net: &Net,
//!     peer: &PeerEndpoint,
//!     seconds: f64,
//! ) {
//!     let envelope = SyncEnvelope::new(net.local_id(), seconds, SyncReason::ScaleChange, ctx.system_time());
//!     let _ = net.push(peer, &envelope).await;
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;
mod http_impl;

pub use context::SyncContext;
pub use network::{PeerTransport, NetworkController};
pub use types::{InstanceId, PeerEndpoint, SyncEnvelope, SyncReason};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use http_impl::{HttpTransport, SYNC_ROUTE};
