// Account manager
// Decision: Entity registry in DashMaps, actors spawned on first use and replaced when dead
// Decision: Actors for unknown ids and finished transfers are released once nobody holds them
// Decision: A transfer starts only after source, target and transfer all confirm readiness
//
// The manager is the single entry point to accounts and transfers. Requests with the
// same transfer id are serialised through a pending set while their readiness checks
// run, so two concurrent creations of one transfer can not both start it.

use std::sync::Arc;

use account_core::{
    AccountError, AccountState, Money, Result, TransferKind, TransferState,
    TRANSFER_PERSISTENCE_PREFIX,
};
use account_storage::Journal;
use dashmap::{DashMap, DashSet};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account_actor::{spawn_account, AccountRef};
use crate::config::RuntimeConfig;
use crate::messages::{CreateReply, Readiness};
use crate::transfer_actor::{spawn_transfer, AccountDirectory, StartTransfer, TransferRef};

// =============================================================================
// Requests
// =============================================================================

/// Request to move money between two accounts
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub transfer_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Money,
}

/// Request to add money from outside the system to an account
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub transfer_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Money,
}

// =============================================================================
// EntityRegistry
// =============================================================================

struct Entry<R> {
    handle: R,
    task: JoinHandle<()>,
}

/// Running entity actors by id
pub struct EntityRegistry {
    journal: Arc<dyn Journal>,
    config: RuntimeConfig,
    accounts: DashMap<Uuid, Entry<AccountRef>>,
    transfers: DashMap<Uuid, Entry<TransferRef>>,
}

impl EntityRegistry {
    fn new(journal: Arc<dyn Journal>, config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            journal,
            config,
            accounts: DashMap::new(),
            transfers: DashMap::new(),
        })
    }

    /// Transfer actor for `id`, spawned if not running
    pub fn transfer(self: &Arc<Self>, id: Uuid) -> TransferRef {
        let spawn = || {
            let accounts: Arc<dyn AccountDirectory> = self.clone();
            let (handle, task) = spawn_transfer(
                id,
                self.journal.clone(),
                accounts,
                self.config.transfer_snapshot_interval,
                self.config.redelivery_interval,
                self.config.mailbox_capacity,
            );
            Entry { handle, task }
        };

        let mut entry = self.transfers.entry(id).or_insert_with(spawn);
        if !entry.handle.is_alive() {
            debug!(transfer_id = %id, "Replacing stopped transfer actor");
            *entry = spawn();
        }
        entry.handle.clone()
    }

    /// Drop the registry's handle to an account actor nobody else holds
    ///
    /// The actor stops once its mailbox is drained and is respawned from the
    /// journal on next use.
    pub fn release_account(&self, id: Uuid) {
        if self
            .accounts
            .remove_if(&id, |_, entry| entry.handle.is_unused())
            .is_some()
        {
            debug!(account_id = %id, "Released account actor");
        }
    }

    /// Drop the registry's handle to a transfer actor nobody else holds
    ///
    /// Only for transfers that have not started or have finished; an in-flight
    /// transfer actor drives its own delivery and must stay registered.
    pub fn release_transfer(&self, id: Uuid) {
        if self
            .transfers
            .remove_if(&id, |_, entry| entry.handle.is_unused())
            .is_some()
        {
            debug!(transfer_id = %id, "Released transfer actor");
        }
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    async fn shutdown(&self) {
        let mut tasks = Vec::new();
        let account_ids: Vec<Uuid> = self.accounts.iter().map(|e| *e.key()).collect();
        for id in account_ids {
            if let Some((_, entry)) = self.accounts.remove(&id) {
                entry.task.abort();
                tasks.push(entry.task);
            }
        }
        let transfer_ids: Vec<Uuid> = self.transfers.iter().map(|e| *e.key()).collect();
        for id in transfer_ids {
            if let Some((_, entry)) = self.transfers.remove(&id) {
                entry.task.abort();
                tasks.push(entry.task);
            }
        }
        // wait until aborted tasks have dropped their journal handles
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl AccountDirectory for EntityRegistry {
    fn account(&self, id: Uuid) -> AccountRef {
        let spawn = || {
            let (handle, task) = spawn_account(
                id,
                self.journal.clone(),
                self.config.account_snapshot_interval,
                self.config.mailbox_capacity,
            );
            Entry { handle, task }
        };

        let mut entry = self.accounts.entry(id).or_insert_with(spawn);
        if !entry.handle.is_alive() {
            debug!(account_id = %id, "Replacing stopped account actor");
            *entry = spawn();
        }
        entry.handle.clone()
    }
}

// =============================================================================
// AccountManager
// =============================================================================

/// Removes a transfer id from the pending set when dropped
struct PendingGuard<'a> {
    pending: &'a DashSet<Uuid>,
    transfer_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.transfer_id);
    }
}

/// Coordinates account and transfer actors
pub struct AccountManager {
    registry: Arc<EntityRegistry>,
    pending: DashSet<Uuid>,
    config: RuntimeConfig,
}

impl AccountManager {
    pub fn new(journal: Arc<dyn Journal>, config: RuntimeConfig) -> Self {
        Self {
            registry: EntityRegistry::new(journal, config.clone()),
            pending: DashSet::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Account actor for `id`, spawned if not running
    pub fn account(&self, id: Uuid) -> AccountRef {
        self.registry.account(id)
    }

    /// Transfer actor for `id`, spawned if not running
    pub fn transfer(&self, id: Uuid) -> TransferRef {
        self.registry.transfer(id)
    }

    pub async fn create_account(&self, id: Uuid, name: String) -> Result<Uuid> {
        match self.account(id).create(name).await? {
            CreateReply::Created(id) => Ok(id),
            CreateReply::AlreadyExists(id) => Err(AccountError::AccountAlreadyExists(id)),
        }
    }

    pub async fn retrieve_account(&self, id: Uuid) -> Result<AccountState> {
        let state = self.account(id).retrieve().await?;
        state.ok_or_else(|| {
            self.registry.release_account(id);
            AccountError::AccountNotFound(id)
        })
    }

    pub async fn retrieve_transfer(&self, id: Uuid) -> Result<TransferState> {
        let state = self.transfer(id).retrieve().await?;
        match state {
            Some(state) => {
                if state.is_finished() {
                    self.registry.release_transfer(id);
                }
                Ok(state)
            }
            None => {
                self.registry.release_transfer(id);
                Err(AccountError::TransferNotFound(id))
            }
        }
    }

    /// Start a transfer once both accounts and the transfer are ready, and wait for its end
    pub async fn make_transfer(&self, request: TransferRequest) -> Result<TransferState> {
        let transfer_id = request.transfer_id;
        let pending = self.begin_pending(transfer_id)?;

        let source = self.account(request.source_account_id);
        let target = self.account(request.target_account_id);
        let transfer = self.transfer(transfer_id);

        let checks = async {
            tokio::join!(
                source.ready_check(transfer_id),
                target.ready_check(transfer_id),
                transfer.ready_check()
            )
        };
        let (source_ready, target_ready, transfer_ready) =
            tokio::time::timeout(self.config.pending_request_timeout, checks)
                .await
                .map_err(|_| {
                    warn!(%transfer_id, "Transfer readiness checks timed out");
                    AccountError::Timeout("transfer readiness check")
                })?;

        let (source_ready, target_ready, transfer_ready) =
            (source_ready?, target_ready?, transfer_ready?);
        let accounts = [
            (request.source_account_id, source_ready),
            (request.target_account_id, target_ready),
        ];
        let missing = accounts
            .iter()
            .find(|(_, readiness)| *readiness == Readiness::NotFound);
        if let Some(&(account_id, _)) = missing {
            drop((source, target, transfer));
            self.release_unstarted(transfer_id, transfer_ready, &accounts);
            return Err(AccountError::AccountNotFound(account_id));
        }
        if transfer_ready == Readiness::AlreadyStarted {
            return Err(AccountError::TransferAlreadyExists(transfer_id));
        }

        let finished = transfer
            .start(StartTransfer {
                kind: TransferKind::Transfer,
                source_account_id: request.source_account_id,
                target_account_id: request.target_account_id,
                amount: request.amount,
            })
            .await?;
        drop((source, target, transfer, pending));

        self.finish(transfer_id, finished).await
    }

    /// Deposit money from a fresh external bank id once target and transfer are ready
    pub async fn deposit(&self, request: DepositRequest) -> Result<TransferState> {
        let transfer_id = request.transfer_id;
        let pending = self.begin_pending(transfer_id)?;

        let target = self.account(request.target_account_id);
        let transfer = self.transfer(transfer_id);

        let checks = async { tokio::join!(target.ready_check(transfer_id), transfer.ready_check()) };
        let (target_ready, transfer_ready) =
            tokio::time::timeout(self.config.pending_request_timeout, checks)
                .await
                .map_err(|_| {
                    warn!(%transfer_id, "Deposit readiness checks timed out");
                    AccountError::Timeout("deposit readiness check")
                })?;

        let (target_ready, transfer_ready) = (target_ready?, transfer_ready?);
        if target_ready == Readiness::NotFound {
            drop((target, transfer));
            self.release_unstarted(
                transfer_id,
                transfer_ready,
                &[(request.target_account_id, target_ready)],
            );
            return Err(AccountError::AccountNotFound(request.target_account_id));
        }
        if transfer_ready == Readiness::AlreadyStarted {
            return Err(AccountError::TransferAlreadyExists(transfer_id));
        }

        let bank_account_id = Uuid::new_v4();
        debug!(%transfer_id, %bank_account_id, "Depositing from external bank account");
        let finished = transfer
            .start(StartTransfer {
                kind: TransferKind::Deposit,
                source_account_id: bank_account_id,
                target_account_id: request.target_account_id,
                amount: request.amount,
            })
            .await?;
        drop((target, transfer, pending));

        self.finish(transfer_id, finished).await
    }

    /// Resume every transfer in the journal that has not finished
    ///
    /// Returns the number of resumed transfers.
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let ids = self
            .registry
            .journal
            .persistence_ids(TRANSFER_PERSISTENCE_PREFIX)
            .await
            .map_err(|e| AccountError::storage(e.to_string()))?;

        let mut resumed = 0;
        for persistence_id in ids {
            let parsed = persistence_id
                .strip_prefix(TRANSFER_PERSISTENCE_PREFIX)
                .and_then(|id| id.parse::<Uuid>().ok());
            let Some(id) = parsed else {
                warn!(%persistence_id, "Skipping journal entry with invalid transfer id");
                continue;
            };
            match self.transfer(id).retrieve().await {
                Ok(Some(state)) if !state.is_finished() => resumed += 1,
                Ok(_) => self.registry.release_transfer(id),
                Err(e) => {
                    warn!(transfer_id = %id, error = %e, "Failed to recover transfer");
                    self.registry.release_transfer(id);
                }
            }
        }

        info!(resumed, "In-flight transfers recovered");
        Ok(resumed)
    }

    /// Stop every entity actor
    pub async fn shutdown(&self) {
        info!(
            accounts = self.registry.account_count(),
            transfers = self.registry.transfer_count(),
            "Stopping entity actors"
        );
        self.registry.shutdown().await;
    }

    fn begin_pending(&self, transfer_id: Uuid) -> Result<PendingGuard<'_>> {
        if !self.pending.insert(transfer_id) {
            return Err(AccountError::TransferIsBeingCreated(transfer_id));
        }
        Ok(PendingGuard {
            pending: &self.pending,
            transfer_id,
        })
    }

    /// Release actors a rejected request spawned for ids with no journal
    ///
    /// Handles to these actors must already be dropped.
    fn release_unstarted(
        &self,
        transfer_id: Uuid,
        transfer_ready: Readiness,
        accounts: &[(Uuid, Readiness)],
    ) {
        for (account_id, readiness) in accounts {
            if *readiness == Readiness::NotFound {
                self.registry.release_account(*account_id);
            }
        }
        if transfer_ready == Readiness::Ready {
            self.registry.release_transfer(transfer_id);
        }
    }

    /// Wait for a started transfer and release its actor once it has finished
    async fn finish(
        &self,
        transfer_id: Uuid,
        finished: tokio::sync::oneshot::Receiver<Result<TransferState>>,
    ) -> Result<TransferState> {
        let state = finished.await.map_err(|_| {
            AccountError::unavailable(format!("transfer {} stopped before finishing", transfer_id))
        })??;
        self.registry.release_transfer(transfer_id);
        Ok(state)
    }
}
