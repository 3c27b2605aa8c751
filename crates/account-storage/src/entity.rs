//! Typed event-sourcing helper on top of a Journal
//!
//! An entity owns one `EntityJournal`. Recovery loads the latest snapshot and folds
//! the events written after it; `persist` appends one event with the optimistic
//! sequence check; `maybe_snapshot` saves the state every `snapshot_interval` events.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::store::{Journal, SnapshotRecord, StoreError};

/// Journal of a single entity with event type `E` and state type `S`
pub struct EntityJournal<E, S> {
    journal: Arc<dyn Journal>,
    persistence_id: String,
    sequence_nr: u64,
    snapshot_interval: u64,
    _marker: PhantomData<fn(E) -> S>,
}

impl<E, S> EntityJournal<E, S>
where
    E: Serialize + DeserializeOwned,
    S: Serialize + DeserializeOwned + Clone,
{
    /// Create a journal handle. `snapshot_interval` of 0 disables snapshots.
    pub fn new(
        journal: Arc<dyn Journal>,
        persistence_id: impl Into<String>,
        snapshot_interval: u64,
    ) -> Self {
        Self {
            journal,
            persistence_id: persistence_id.into(),
            sequence_nr: 0,
            snapshot_interval,
            _marker: PhantomData,
        }
    }

    pub fn persistence_id(&self) -> &str {
        &self.persistence_id
    }

    /// Highest sequence number written or recovered
    pub fn sequence_nr(&self) -> u64 {
        self.sequence_nr
    }

    /// Rebuild the state from the latest snapshot and the events after it
    ///
    /// `fold` applies one event to the previous state. An event the fold rejects is
    /// logged and skipped; the previous state is kept.
    pub async fn recover<F, X>(&mut self, mut fold: F) -> Result<Option<S>, StoreError>
    where
        F: FnMut(Option<S>, E) -> Result<S, X>,
        X: Display,
    {
        let mut state: Option<S> = None;
        let mut sequence_nr = 0;

        if let Some(snapshot) = self.journal.load_snapshot(&self.persistence_id).await? {
            state = Some(serde_json::from_value(snapshot.payload)?);
            sequence_nr = snapshot.sequence_nr;
        }

        let events = self
            .journal
            .replay(&self.persistence_id, sequence_nr + 1)
            .await?;
        for persisted in events {
            let event: E = serde_json::from_value(persisted.payload)?;
            match fold(state.clone(), event) {
                Ok(next) => state = Some(next),
                Err(e) => warn!(
                    persistence_id = %self.persistence_id,
                    sequence_nr = persisted.sequence_nr,
                    error = %e,
                    "Skipping journal event that can not be applied"
                ),
            }
            sequence_nr = persisted.sequence_nr;
        }

        self.sequence_nr = sequence_nr;
        debug!(
            persistence_id = %self.persistence_id,
            sequence_nr,
            recovered = state.is_some(),
            "Entity recovered"
        );
        Ok(state)
    }

    /// Append one event, returning its sequence number
    pub async fn persist(&mut self, event: &E) -> Result<u64, StoreError> {
        let payload = serde_json::to_value(event)?;
        let sequence_nr = self
            .journal
            .append(&self.persistence_id, self.sequence_nr, vec![payload])
            .await?;
        self.sequence_nr = sequence_nr;
        Ok(sequence_nr)
    }

    /// Whether a snapshot is due at the current sequence number
    pub fn snapshot_due(&self) -> bool {
        self.snapshot_interval != 0
            && self.sequence_nr != 0
            && self.sequence_nr % self.snapshot_interval == 0
    }

    /// Save a snapshot of `state` if one is due
    ///
    /// Failures are logged, not returned: the journal alone is enough to recover.
    pub async fn maybe_snapshot(&self, state: &S) -> bool {
        if !self.snapshot_due() {
            return false;
        }

        let payload = match serde_json::to_value(state) {
            Ok(payload) => payload,
            Err(e) => {
                error!(persistence_id = %self.persistence_id, error = %e, "Failed to encode snapshot");
                return false;
            }
        };

        match self
            .journal
            .save_snapshot(
                &self.persistence_id,
                SnapshotRecord::new(self.sequence_nr, payload),
            )
            .await
        {
            Ok(()) => {
                debug!(
                    persistence_id = %self.persistence_id,
                    sequence_nr = self.sequence_nr,
                    "Snapshot saved"
                );
                true
            }
            Err(e) => {
                error!(persistence_id = %self.persistence_id, error = %e, "Failed to save snapshot");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryJournal;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        total: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Add(i64);

    fn fold(state: Option<Counter>, event: Add) -> Result<Counter, String> {
        if event.0 < 0 {
            return Err("negative".into());
        }
        let total = state.map(|s| s.total).unwrap_or(0) + event.0;
        Ok(Counter { total })
    }

    #[tokio::test]
    async fn test_persist_and_recover() {
        let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
        let mut entity: EntityJournal<Add, Counter> = EntityJournal::new(journal.clone(), "c-1", 0);

        assert_eq!(entity.recover(fold).await.unwrap(), None);
        for n in 1..=4 {
            entity.persist(&Add(n)).await.unwrap();
        }
        assert_eq!(entity.sequence_nr(), 4);

        let mut restarted: EntityJournal<Add, Counter> = EntityJournal::new(journal, "c-1", 0);
        let state = restarted.recover(fold).await.unwrap();
        assert_eq!(state, Some(Counter { total: 10 }));
        assert_eq!(restarted.sequence_nr(), 4);
    }

    #[tokio::test]
    async fn test_snapshot_every_interval() {
        let memory = Arc::new(InMemoryJournal::new());
        let journal: Arc<dyn Journal> = memory.clone();
        let mut entity: EntityJournal<Add, Counter> = EntityJournal::new(journal.clone(), "c-1", 3);
        entity.recover(fold).await.unwrap();

        let mut state: Option<Counter> = None;
        let mut saved = Vec::new();
        for n in 1..=7 {
            let event = Add(n);
            entity.persist(&event).await.unwrap();
            let next = fold(state, event).unwrap();
            if entity.maybe_snapshot(&next).await {
                saved.push(entity.sequence_nr());
            }
            state = Some(next);
        }
        assert_eq!(saved, vec![3, 6]);

        let snapshot = journal.load_snapshot("c-1").await.unwrap().unwrap();
        assert_eq!(snapshot.sequence_nr, 6);

        // snapshot plus tail equals full replay
        let mut restarted: EntityJournal<Add, Counter> = EntityJournal::new(journal, "c-1", 3);
        assert_eq!(
            restarted.recover(fold).await.unwrap(),
            Some(Counter { total: 28 })
        );
        assert_eq!(restarted.sequence_nr(), 7);
        assert_eq!(memory.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_handle_conflicts() {
        let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
        let mut first: EntityJournal<Add, Counter> = EntityJournal::new(journal.clone(), "c-1", 0);
        let mut second: EntityJournal<Add, Counter> = EntityJournal::new(journal, "c-1", 0);
        first.recover(fold).await.unwrap();
        second.recover(fold).await.unwrap();

        first.persist(&Add(1)).await.unwrap();
        let result = second.persist(&Add(2)).await;
        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn test_rejected_event_is_skipped_on_recovery() {
        let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
        let mut entity: EntityJournal<Add, Counter> = EntityJournal::new(journal.clone(), "c-1", 0);
        entity.persist(&Add(2)).await.unwrap();
        entity.persist(&Add(-1)).await.unwrap();
        entity.persist(&Add(3)).await.unwrap();

        let mut restarted: EntityJournal<Add, Counter> = EntityJournal::new(journal, "c-1", 0);
        assert_eq!(
            restarted.recover(fold).await.unwrap(),
            Some(Counter { total: 5 })
        );
        assert_eq!(restarted.sequence_nr(), 3);
    }
}
