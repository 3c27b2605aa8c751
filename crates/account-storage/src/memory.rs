//! In-memory implementation of Journal for testing

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::store::*;

/// In-memory implementation of Journal
///
/// Stores all data in memory and provides the same semantics as the RocksDB
/// implementation. Used by tests and by `STORAGE_BACKEND=memory`.
///
/// # Example
///
/// ```
/// use account_storage::InMemoryJournal;
///
/// let journal = InMemoryJournal::new();
/// assert_eq!(journal.event_count(), 0);
/// ```
pub struct InMemoryJournal {
    events: RwLock<BTreeMap<String, Vec<PersistedEvent>>>,
    snapshots: RwLock<HashMap<String, SnapshotRecord>>,
}

impl InMemoryJournal {
    /// Create a new in-memory journal
    pub fn new() -> Self {
        Self {
            events: RwLock::new(BTreeMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of events across all entities
    pub fn event_count(&self) -> usize {
        self.events.read().values().map(Vec::len).sum()
    }

    /// Number of stored snapshots
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn append(
        &self,
        persistence_id: &str,
        expected_sequence_nr: u64,
        payloads: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        let mut events = self.events.write();
        let journal = events.entry(persistence_id.to_string()).or_default();

        let current = journal.len() as u64;
        if current != expected_sequence_nr {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence_nr,
                actual: current,
            });
        }

        let now = Utc::now();
        for payload in payloads {
            let sequence_nr = journal.len() as u64 + 1;
            journal.push(PersistedEvent {
                sequence_nr,
                payload,
                written_at: now,
            });
        }
        Ok(journal.len() as u64)
    }

    async fn replay(
        &self,
        persistence_id: &str,
        from_sequence_nr: u64,
    ) -> Result<Vec<PersistedEvent>, StoreError> {
        let events = self.events.read();
        Ok(events
            .get(persistence_id)
            .map(|journal| {
                journal
                    .iter()
                    .filter(|e| e.sequence_nr >= from_sequence_nr)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn highest_sequence_nr(&self, persistence_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .events
            .read()
            .get(persistence_id)
            .map(|journal| journal.len() as u64)
            .unwrap_or(0))
    }

    async fn save_snapshot(
        &self,
        persistence_id: &str,
        snapshot: SnapshotRecord,
    ) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write();
        match snapshots.get(persistence_id) {
            Some(existing) if existing.sequence_nr > snapshot.sequence_nr => {}
            _ => {
                snapshots.insert(persistence_id.to_string(), snapshot);
            }
        }
        Ok(())
    }

    async fn load_snapshot(
        &self,
        persistence_id: &str,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        Ok(self.snapshots.read().get(persistence_id).cloned())
    }

    async fn persistence_ids(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|(id, journal)| id.starts_with(prefix) && !journal.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}
