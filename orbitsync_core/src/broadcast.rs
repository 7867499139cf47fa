//! Fan-out of authoritative simulated time to sibling instances.
//!
//! Every sibling gets its own task and its own timeout. Nothing is retried,
//! and a failing sibling only shows up in the returned report and the log.

use orbitsync_env::{EnvError, PeerEndpoint, PeerTransport, SyncEnvelope, SyncReason};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Per-sibling timeout used when the configuration does not set one.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome of one publish.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<PeerEndpoint>,
    pub failed: Vec<(PeerEndpoint, EnvError)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pushes simulated time to a fixed set of siblings.
pub struct Broadcaster<Net: PeerTransport> {
    transport: Arc<Net>,
    siblings: Vec<PeerEndpoint>,
    timeout: Duration,
}

impl<Net: PeerTransport> Broadcaster<Net> {
    pub fn new(transport: Arc<Net>, siblings: Vec<PeerEndpoint>, timeout: Duration) -> Self {
        Self {
            transport,
            siblings,
            timeout,
        }
    }

    pub fn siblings(&self) -> &[PeerEndpoint] {
        &self.siblings
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &Arc<Net> {
        &self.transport
    }

    /// Builds an envelope stamped with this instance's ID.
    pub fn envelope(&self, simulated_seconds: f64, reason: SyncReason, sent_at: SystemTime) -> SyncEnvelope {
        SyncEnvelope::new(self.transport.local_id(), simulated_seconds, reason, sent_at)
    }

    /// Sends `envelope` to every sibling concurrently and waits for all of
    /// them to finish or time out.
    pub async fn publish(&self, envelope: SyncEnvelope) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if self.siblings.is_empty() {
            return report;
        }

        let mut tasks = JoinSet::new();
        for peer in self.siblings.iter().cloned() {
            let transport = Arc::clone(&self.transport);
            let envelope = envelope.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, transport.push(&peer, &envelope)).await {
                    Ok(result) => result,
                    Err(_) => Err(EnvError::Timeout(timeout.as_millis() as u64)),
                };
                (peer, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    debug!(%peer, "Sibling accepted simulated time");
                    report.delivered.push(peer);
                }
                Ok((peer, Err(e))) => {
                    warn!(%peer, error = %e, "Failed to push simulated time to sibling");
                    report.failed.push((peer, e));
                }
                Err(e) => {
                    // The peer name is lost with the panicked task, so it is only logged
                    warn!(error = %e, "Sibling push task did not complete");
                }
            }
        }

        info!(
            simulated_seconds = envelope.simulated_seconds,
            reason = ?envelope.reason,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Published simulated time"
        );
        report
    }
}
