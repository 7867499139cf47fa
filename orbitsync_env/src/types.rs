//! Common types for the orbitsync environment abstraction.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::EnvError;

/// Unique identifier for an orbitsync instance.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Creates a new random InstanceId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic InstanceId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Base URL of a sibling instance, e.g. `http://127.0.0.1:8001`.
///
/// Stored without a trailing slash so route paths can be appended directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerEndpoint(String);

impl PeerEndpoint {
    /// Parses and normalizes an endpoint.
    pub fn parse(raw: &str) -> Result<Self, EnvError> {
        let trimmed = raw.trim().trim_end_matches('/');
        // The transport is built without TLS, so only plain http siblings are reachable
        let rest = trimmed
            .strip_prefix("http://")
            .ok_or_else(|| EnvError::InvalidEndpoint(format!("{raw}: expected http://")))?;
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            return Err(EnvError::InvalidEndpoint(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the normalized base URL.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins a route path onto the base URL.
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl TryFrom<String> for PeerEndpoint {
    type Error = EnvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerEndpoint> for String {
    fn from(value: PeerEndpoint) -> Self {
        value.0
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a simulated-time value is being pushed to siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    ScaleChange,
    Shutdown,
}

/// Envelope carrying an authoritative simulated-time value between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Instance that produced the value
    pub origin: InstanceId,

    /// Simulated seconds since the shared epoch start
    pub simulated_seconds: f64,

    /// What triggered the publish
    pub reason: SyncReason,

    /// Sender's wall clock in milliseconds since the Unix epoch (diagnostics only)
    pub sent_at_ms: u64,
}

impl SyncEnvelope {
    /// Creates a new envelope stamped with the given wall-clock time.
    pub fn new(origin: InstanceId, simulated_seconds: f64, reason: SyncReason, sent_at: SystemTime) -> Self {
        let sent_at_ms = sent_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            origin,
            simulated_seconds,
            reason,
            sent_at_ms,
        }
    }
}
