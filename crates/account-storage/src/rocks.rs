//! RocksDB implementation of Journal

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::info;

use crate::store::*;

/// Type alias for the RocksDB instance
pub type RocksDB = DBWithThreadMode<MultiThreaded>;

/// Column family names
pub(crate) struct ColumnFamilies;

impl ColumnFamilies {
    /// Events keyed by `persistence_id 0x00 sequence_nr(be u64)`
    pub const JOURNAL: &'static str = "journal";
    /// Latest snapshot per persistence id
    pub const SNAPSHOTS: &'static str = "snapshots";
    /// Highest sequence number per persistence id
    pub const METADATA: &'static str = "metadata";

    pub fn all() -> Vec<&'static str> {
        vec![Self::JOURNAL, Self::SNAPSHOTS, Self::METADATA]
    }
}

const KEY_SEPARATOR: u8 = 0x00;

/// Journal key prefix shared by every event of one entity
fn journal_prefix(persistence_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(persistence_id.len() + 9);
    key.extend_from_slice(persistence_id.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

fn journal_key(persistence_id: &str, sequence_nr: u64) -> Vec<u8> {
    let mut key = journal_prefix(persistence_id);
    key.extend_from_slice(&sequence_nr.to_be_bytes());
    key
}

fn decode_sequence(bytes: &[u8]) -> Result<u64, StoreError> {
    let tail = bytes
        .len()
        .checked_sub(8)
        .map(|start| &bytes[start..])
        .ok_or_else(|| StoreError::Database("sequence number too short".into()))?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(tail);
    Ok(u64::from_be_bytes(bytes))
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// RocksDB-backed event journal
///
/// Database calls run on the blocking thread pool. Appends for all entities go
/// through a single writer lock so the expected sequence check and the write are
/// atomic with respect to each other.
#[derive(Clone)]
pub struct RocksJournal {
    db: Arc<RocksDB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksJournal {
    /// Open (or create) the journal at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Opening journal at path: {}", path.display());

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamilies::all()
            .into_iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(name, cf_opts)
            })
            .collect();

        let db = RocksDB::open_cf_descriptors(&db_opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(format!("failed to open RocksDB: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Run a database operation on the blocking thread pool
    async fn blocking<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce(&RocksJournal) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let journal = self.clone();
        tokio::task::spawn_blocking(move || operation(&journal))
            .await
            .map_err(|e| StoreError::Database(format!("journal task failed: {}", e)))?
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family '{}' not found", name)))
    }

    fn read_highest(&self, persistence_id: &str) -> Result<u64, StoreError> {
        let metadata = self.cf(ColumnFamilies::METADATA)?;
        match self
            .db
            .get_cf(&metadata, persistence_id.as_bytes())
            .map_err(db_err)?
        {
            Some(bytes) => decode_sequence(&bytes),
            None => Ok(0),
        }
    }
}

impl RocksJournal {
    fn append_blocking(
        &self,
        persistence_id: &str,
        expected_sequence_nr: u64,
        payloads: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock();

        let current = self.read_highest(persistence_id)?;
        if current != expected_sequence_nr {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence_nr,
                actual: current,
            });
        }
        if payloads.is_empty() {
            return Ok(current);
        }

        let journal = self.cf(ColumnFamilies::JOURNAL)?;
        let metadata = self.cf(ColumnFamilies::METADATA)?;
        let written_at = Utc::now();

        let mut batch = WriteBatch::default();
        let mut sequence_nr = current;
        for payload in payloads {
            sequence_nr += 1;
            let record = PersistedEvent {
                sequence_nr,
                payload,
                written_at,
            };
            batch.put_cf(
                &journal,
                journal_key(persistence_id, sequence_nr),
                serde_json::to_vec(&record)?,
            );
        }
        batch.put_cf(
            &metadata,
            persistence_id.as_bytes(),
            sequence_nr.to_be_bytes(),
        );
        self.db.write(batch).map_err(db_err)?;

        Ok(sequence_nr)
    }

    fn replay_blocking(
        &self,
        persistence_id: &str,
        from_sequence_nr: u64,
    ) -> Result<Vec<PersistedEvent>, StoreError> {
        let journal = self.cf(ColumnFamilies::JOURNAL)?;
        let prefix = journal_prefix(persistence_id);
        let start = journal_key(persistence_id, from_sequence_nr);

        let mut events = Vec::new();
        for item in self
            .db
            .iterator_cf(&journal, IteratorMode::From(start.as_slice(), Direction::Forward))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix.as_slice()) || key.len() != prefix.len() + 8 {
                break;
            }
            let event: PersistedEvent = serde_json::from_slice(&value)?;
            events.push(event);
        }
        Ok(events)
    }

    fn save_snapshot_blocking(
        &self,
        persistence_id: &str,
        snapshot: SnapshotRecord,
    ) -> Result<(), StoreError> {
        let snapshots = self.cf(ColumnFamilies::SNAPSHOTS)?;
        let _guard = self.write_lock.lock();

        if let Some(existing) = self
            .db
            .get_cf(&snapshots, persistence_id.as_bytes())
            .map_err(db_err)?
        {
            let existing: SnapshotRecord = serde_json::from_slice(&existing)?;
            if existing.sequence_nr > snapshot.sequence_nr {
                return Ok(());
            }
        }

        self.db
            .put_cf(
                &snapshots,
                persistence_id.as_bytes(),
                serde_json::to_vec(&snapshot)?,
            )
            .map_err(db_err)
    }

    fn load_snapshot_blocking(
        &self,
        persistence_id: &str,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let snapshots = self.cf(ColumnFamilies::SNAPSHOTS)?;
        match self
            .db
            .get_cf(&snapshots, persistence_id.as_bytes())
            .map_err(db_err)?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn persistence_ids_blocking(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let metadata = self.cf(ColumnFamilies::METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(
            &metadata,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        ) {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }
}

#[async_trait]
impl Journal for RocksJournal {
    async fn append(
        &self,
        persistence_id: &str,
        expected_sequence_nr: u64,
        payloads: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        let persistence_id = persistence_id.to_string();
        self.blocking(move |journal| {
            journal.append_blocking(&persistence_id, expected_sequence_nr, payloads)
        })
        .await
    }

    async fn replay(
        &self,
        persistence_id: &str,
        from_sequence_nr: u64,
    ) -> Result<Vec<PersistedEvent>, StoreError> {
        let persistence_id = persistence_id.to_string();
        self.blocking(move |journal| journal.replay_blocking(&persistence_id, from_sequence_nr))
            .await
    }

    async fn highest_sequence_nr(&self, persistence_id: &str) -> Result<u64, StoreError> {
        let persistence_id = persistence_id.to_string();
        self.blocking(move |journal| journal.read_highest(&persistence_id))
            .await
    }

    async fn save_snapshot(
        &self,
        persistence_id: &str,
        snapshot: SnapshotRecord,
    ) -> Result<(), StoreError> {
        let persistence_id = persistence_id.to_string();
        self.blocking(move |journal| journal.save_snapshot_blocking(&persistence_id, snapshot))
            .await
    }

    async fn load_snapshot(
        &self,
        persistence_id: &str,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let persistence_id = persistence_id.to_string();
        self.blocking(move |journal| journal.load_snapshot_blocking(&persistence_id))
            .await
    }

    async fn persistence_ids(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        self.blocking(move |journal| journal.persistence_ids_blocking(&prefix))
            .await
    }
}
