//! Journal trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Concurrency conflict (optimistic locking failed)
    #[error("concurrency conflict: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// An event as stored in the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    /// Position of the event in its entity journal, starting at 1
    pub sequence_nr: u64,
    pub payload: serde_json::Value,
    pub written_at: DateTime<Utc>,
}

/// Snapshot of an entity state taken after `sequence_nr` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub sequence_nr: u64,
    pub payload: serde_json::Value,
    pub written_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn new(sequence_nr: u64, payload: serde_json::Value) -> Self {
        Self {
            sequence_nr,
            payload,
            written_at: Utc::now(),
        }
    }
}

/// Append-only event journal with a snapshot store
///
/// Each entity has its own journal identified by a persistence id. Events are
/// never changed or removed once appended.
#[async_trait]
pub trait Journal: Send + Sync + 'static {
    /// Append events to an entity journal
    ///
    /// `expected_sequence_nr` is the highest sequence number the caller has seen.
    /// Returns the new highest sequence number, or `ConcurrencyConflict` if the
    /// journal has moved on. Nothing is written on conflict.
    async fn append(
        &self,
        persistence_id: &str,
        expected_sequence_nr: u64,
        payloads: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError>;

    /// Load events with `sequence_nr >= from_sequence_nr` in ascending order
    async fn replay(
        &self,
        persistence_id: &str,
        from_sequence_nr: u64,
    ) -> Result<Vec<PersistedEvent>, StoreError>;

    /// Highest sequence number written, 0 if the journal is empty
    async fn highest_sequence_nr(&self, persistence_id: &str) -> Result<u64, StoreError>;

    /// Store a snapshot. Older snapshots of the same entity are superseded.
    async fn save_snapshot(
        &self,
        persistence_id: &str,
        snapshot: SnapshotRecord,
    ) -> Result<(), StoreError>;

    /// Latest snapshot of an entity
    async fn load_snapshot(&self, persistence_id: &str)
        -> Result<Option<SnapshotRecord>, StoreError>;

    /// Persistence ids with at least one event, filtered by prefix
    async fn persistence_ids(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
