//! Static instance configuration, read once at startup.

use orbitsync_env::PeerEndpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broadcast::DEFAULT_PEER_TIMEOUT;
use crate::error::ConfigurationError;
use crate::orbit::{BodyRegistry, BodySpec, UnknownPlanePolicy};

/// Configuration for one orbitsync instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// Instance's logical name (for logging and status)
    pub name: String,

    /// Socket address the HTTP surface binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory of the snapshot store
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Sibling instances sharing the same timeline
    #[serde(default)]
    pub siblings: Vec<PeerEndpoint>,

    /// Per-sibling push timeout in milliseconds (default: 500)
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    /// Scale installed at startup (default: 1.0)
    #[serde(default = "default_initial_scale")]
    pub initial_scale: f64,

    /// Handling of plane strings other than XY, XZ, YZ
    #[serde(default)]
    pub unknown_plane: UnknownPlanePolicy,

    /// Static body table
    #[serde(default)]
    pub bodies: Vec<BodySpec>,
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("orbitsync-state")
}

fn default_peer_timeout_ms() -> u64 {
    DEFAULT_PEER_TIMEOUT.as_millis() as u64
}

fn default_initial_scale() -> f64 {
    1.0
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "orbitsync-node".to_string(),
            listen: default_listen(),
            store_path: default_store_path(),
            siblings: Vec::new(),
            peer_timeout_ms: default_peer_timeout_ms(),
            initial_scale: default_initial_scale(),
            unknown_plane: UnknownPlanePolicy::default(),
            bodies: Vec::new(),
        }
    }
}

impl InstanceConfig {
    pub fn new(name: &str, bodies: Vec<BodySpec>) -> Self {
        Self {
            name: name.to_string(),
            bodies,
            ..Self::default()
        }
    }

    pub fn with_siblings(mut self, siblings: Vec<PeerEndpoint>) -> Self {
        self.siblings = siblings;
        self
    }

    pub fn with_initial_scale(mut self, scale: f64) -> Self {
        self.initial_scale = scale;
        self
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Reads and parses a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Checks every field and builds the body registry.
    pub fn validate(&self) -> Result<BodyRegistry, ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyInstanceName);
        }
        if !(self.initial_scale.is_finite() && self.initial_scale >= 0.0) {
            return Err(ConfigurationError::InvalidScale(self.initial_scale));
        }
        if self.peer_timeout_ms == 0 {
            return Err(ConfigurationError::ZeroPeerTimeout);
        }
        BodyRegistry::from_specs(&self.bodies, self.unknown_plane)
    }
}
