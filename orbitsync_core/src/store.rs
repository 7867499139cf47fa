//! Durable snapshot of the simulated clock.
//!
//! Only two values survive a restart: the epoch start and the accumulated
//! simulated seconds. The scale is not persisted: a restarted
//! instance resumes at its configured initial scale.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;
use tracing::{info, warn};

use crate::error::PersistenceError;

/// The persisted part of the clock state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    /// Wall-clock instant corresponding to simulated second zero
    pub epoch_start: DateTime<Utc>,

    /// Accumulated simulated seconds
    pub simulated_seconds: f64,
}

impl PersistedSnapshot {
    /// First-run state: epoch starts now, nothing elapsed.
    pub fn fresh(now: SystemTime) -> Self {
        Self {
            epoch_start: DateTime::<Utc>::from(now),
            simulated_seconds: 0.0,
        }
    }
}

/// Trait for durable snapshot storage.
///
/// Implementations must be thread-safe, and `save` must replace the previous
/// snapshot atomically: a reader sees either the old or the new value.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Returns the last saved snapshot, or `None` on first run.
    fn load(&self) -> Result<Option<PersistedSnapshot>, PersistenceError>;

    /// Durably replaces the stored snapshot.
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError>;
}

/// Loads the stored snapshot, treating absence and failure alike as first run.
pub fn load_or_fresh<S: SnapshotStore + ?Sized>(store: &S, now: SystemTime) -> PersistedSnapshot {
    match store.load() {
        Ok(Some(snapshot)) => {
            info!(
                simulated_seconds = snapshot.simulated_seconds,
                epoch_start = %snapshot.epoch_start,
                "Restored clock snapshot"
            );
            snapshot
        }
        Ok(None) => {
            info!("No clock snapshot found, starting a fresh epoch");
            PersistedSnapshot::fresh(now)
        }
        Err(e) => {
            warn!(error = %e, "Failed to load clock snapshot, starting a fresh epoch");
            PersistedSnapshot::fresh(now)
        }
    }
}

// ============================================================================
// SLED STORE
// ============================================================================

const SNAPSHOT_KEY: &[u8] = b"clock_snapshot";

/// Sled-based persistent snapshot store
///
/// Keeps the JSON-encoded snapshot under a single key; sled makes the
/// single-key insert atomic and `flush` makes it durable.
pub struct SledSnapshotStore {
    db: sled::Db,
}

impl SledSnapshotStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let db = sled::open(path)
            .map_err(|e| PersistenceError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, PersistenceError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| PersistenceError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn load(&self) -> Result<Option<PersistedSnapshot>, PersistenceError> {
        let Some(bytes) = self
            .db
            .get(SNAPSHOT_KEY)
            .map_err(|e| PersistenceError::Storage(format!("Read failed: {}", e)))?
        else {
            return Ok(None);
        };

        let snapshot: PersistedSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        if !snapshot.simulated_seconds.is_finite() {
            return Err(PersistenceError::Corrupt(format!(
                "non-finite simulated seconds {}",
                snapshot.simulated_seconds
            )));
        }
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| PersistenceError::Storage(format!("Encode failed: {}", e)))?;
        self.db
            .insert(SNAPSHOT_KEY, bytes)
            .map_err(|e| PersistenceError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| PersistenceError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

/// Store chosen at process start.
///
/// A node whose sled directory cannot be opened (locked by another process,
/// unreadable) keeps serving from a fresh epoch instead of exiting; every
/// load and save then reports the original open error.
pub enum SnapshotBackend {
    Sled(SledSnapshotStore),
    Unavailable(String),
}

impl SnapshotBackend {
    /// Opens the sled store at `path`, degrading to `Unavailable` on failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match SledSnapshotStore::open(path) {
            Ok(store) => Self::Sled(store),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Snapshot store unavailable, running without persistence");
                Self::Unavailable(e.to_string())
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Sled(_))
    }
}

impl SnapshotStore for SnapshotBackend {
    fn load(&self) -> Result<Option<PersistedSnapshot>, PersistenceError> {
        match self {
            Self::Sled(store) => store.load(),
            Self::Unavailable(reason) => Err(PersistenceError::Storage(reason.clone())),
        }
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        match self {
            Self::Sled(store) => store.save(snapshot),
            Self::Unavailable(reason) => Err(PersistenceError::Storage(reason.clone())),
        }
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-process store for tests and the simulation harness.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<PersistedSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: PersistedSnapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }

    /// Returns the stored snapshot without going through the trait.
    pub fn peek(&self) -> Option<PersistedSnapshot> {
        *self.slot.lock()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<PersistedSnapshot>, PersistenceError> {
        Ok(*self.slot.lock())
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        *self.slot.lock() = Some(*snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample() -> PersistedSnapshot {
        PersistedSnapshot {
            epoch_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::TimeDelta::nanoseconds(123_456_789),
            simulated_seconds: 1234.567_890_123_456_7,
        }
    }

    struct BrokenStore;

    impl SnapshotStore for BrokenStore {
        fn load(&self) -> Result<Option<PersistedSnapshot>, PersistenceError> {
            Err(PersistenceError::Storage("disk on fire".to_string()))
        }

        fn save(&self, _snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
            Err(PersistenceError::Storage("disk on fire".to_string()))
        }
    }

    #[test]
    fn test_sled_round_trip_is_exact() {
        let store = SledSnapshotStore::open_temp().unwrap();
        assert_eq!(store.load().unwrap(), None);

        let snapshot = sample();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_sled_save_replaces_previous() {
        let store = SledSnapshotStore::open_temp().unwrap();
        let mut snapshot = sample();
        store.save(&snapshot).unwrap();

        snapshot.simulated_seconds = 99.0;
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap().unwrap().simulated_seconds, 99.0);
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("orbitsync-store-{}", uuid::Uuid::new_v4()));
        let snapshot = sample();
        {
            let store = SledSnapshotStore::open(&dir).unwrap();
            store.save(&snapshot).unwrap();
        }
        {
            let store = SledSnapshotStore::open(&dir).unwrap();
            assert_eq!(store.load().unwrap(), Some(snapshot));
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_locked_directory_degrades_to_unavailable() {
        let dir = std::env::temp_dir().join(format!("orbitsync-store-{}", uuid::Uuid::new_v4()));
        let first = SnapshotBackend::open(&dir);
        assert!(first.is_available());
        first.save(&sample()).unwrap();

        // The first handle still holds the directory lock
        let second = SnapshotBackend::open(&dir);
        assert!(!second.is_available());
        assert!(matches!(second.load(), Err(PersistenceError::Storage(_))));
        assert!(second.save(&sample()).is_err());

        let now = UNIX_EPOCH + Duration::from_secs(1_704_067_200);
        assert_eq!(load_or_fresh(&second, now), PersistedSnapshot::fresh(now));

        drop(first);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_bytes_are_reported() {
        let store = SledSnapshotStore::open_temp().unwrap();
        store.db.insert(SNAPSHOT_KEY, &b"not json"[..]).unwrap();
        assert!(matches!(store.load(), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn test_load_or_fresh_falls_back_on_error() {
        let now = UNIX_EPOCH + Duration::from_secs(1_704_067_200);
        let snapshot = load_or_fresh(&BrokenStore, now);
        assert_eq!(snapshot, PersistedSnapshot::fresh(now));
        assert_eq!(snapshot.simulated_seconds, 0.0);
    }

    #[test]
    fn test_load_or_fresh_prefers_stored_snapshot() {
        let store = MemorySnapshotStore::with_snapshot(sample());
        assert_eq!(load_or_fresh(&store, SystemTime::now()), sample());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySnapshotStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&sample()).unwrap();
        assert_eq!(store.peek(), Some(sample()));
    }
}
