//! Production implementation of PeerTransport over HTTP.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EnvError;
use crate::network::PeerTransport;
use crate::types::{InstanceId, PeerEndpoint, SyncEnvelope};

/// Route every sibling exposes for inbound sync.
pub const SYNC_ROUTE: &str = "/sync";

/// A thin wrapper around `reqwest::Client` used to push sync envelopes.
///
/// The client carries a fixed request timeout so a dead sibling costs at
/// most that long even if the caller applies no timeout of its own.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// The underlying `reqwest::Client`.
    client: reqwest::Client,
    /// This instance's ID, stamped into outgoing envelopes by callers.
    local_id: InstanceId,
    /// Request timeout configured on the client.
    timeout: Duration,
}

impl HttpTransport {
    /// Constructs a new `HttpTransport` with the given request timeout.
    pub fn new(local_id: InstanceId, timeout: Duration) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            local_id,
            timeout,
        })
    }

    /// Returns the configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify(&self, peer: &PeerEndpoint, err: reqwest::Error) -> EnvError {
        if err.is_timeout() {
            EnvError::Timeout(self.timeout.as_millis() as u64)
        } else if err.is_connect() {
            EnvError::unreachable(peer)
        } else if err.is_builder() || err.is_request() {
            EnvError::SerializationError(err.to_string())
        } else {
            EnvError::network(err.to_string())
        }
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn push(&self, peer: &PeerEndpoint, envelope: &SyncEnvelope) -> Result<(), EnvError> {
        let response = self
            .client
            .post(peer.join(SYNC_ROUTE))
            .json(envelope)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EnvError::HttpStatus {
                peer: peer.to_string(),
                status: status.as_u16(),
            })
        }
    }

    fn local_id(&self) -> InstanceId {
        self.local_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncReason;
    use std::time::SystemTime;

    #[tokio::test]
    async fn test_push_to_closed_port_fails_without_panicking() {
        let transport = HttpTransport::new(InstanceId::from_seed(1), Duration::from_millis(200)).unwrap();
        // Port 9 (discard) is closed on any sane test machine.
        let peer = PeerEndpoint::parse("http://127.0.0.1:9").unwrap();
        let envelope = SyncEnvelope::new(transport.local_id(), 10.0, SyncReason::ScaleChange, SystemTime::now());

        let result = transport.push(&peer, &envelope).await;
        assert!(result.is_err());
    }
}
