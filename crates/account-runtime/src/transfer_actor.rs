// Transfer entity actor
//
// A transfer is a saga over two accounts:
//   Started -> BlockMoney(source) -> DepositMoney(target) -> CompleteTransfer(source) -> Completed
// A deposit only has the DepositMoney step.
//
// The step still to be delivered is derived from the persisted stage. A delivery task
// sends it to the account and resends until a reply arrives; the reply comes back
// into this actor's mailbox, is persisted, and the next step starts. After a restart
// the actor recovers its stage and resumes the pending step.

use std::sync::Arc;
use std::time::Duration;

use account_core::{
    transfer_persistence_id, AccountError, Delivery, Money, Result, TransferEvent, TransferKind,
    TransferStage, TransferState, TransferStatus,
};
use account_storage::{EntityJournal, Journal};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::account_actor::AccountRef;
use crate::messages::{Readiness, StepReply};

/// Resolves account handles for transfer deliveries
///
/// Implementations spawn the account actor if it is not running.
pub trait AccountDirectory: Send + Sync + 'static {
    fn account(&self, id: Uuid) -> AccountRef;
}

// =============================================================================
// Messages
// =============================================================================

/// Parameters of a transfer start
#[derive(Debug, Clone)]
pub struct StartTransfer {
    pub kind: TransferKind,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Money,
}

/// Messages handled by a transfer actor
#[derive(Debug)]
pub enum TransferCommand {
    Retrieve {
        reply: oneshot::Sender<Result<Option<TransferState>>>,
    },
    ReadyCheck {
        reply: oneshot::Sender<Result<Readiness>>,
    },
    /// Start the transfer. `reply_to` receives the final state once the transfer
    /// is completed or failed, or an error if it can not start.
    Start {
        start: StartTransfer,
        reply_to: oneshot::Sender<Result<TransferState>>,
    },
    /// Account reply to the step pending at `stage`
    DeliveryOutcome {
        stage: TransferStage,
        reply: StepReply,
    },
}

// =============================================================================
// TransferRef
// =============================================================================

/// Cloneable handle to a running transfer actor
#[derive(Debug, Clone)]
pub struct TransferRef {
    id: Uuid,
    tx: mpsc::Sender<TransferCommand>,
}

impl TransferRef {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the actor is still receiving messages
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Whether this is the only handle to the actor's mailbox
    pub(crate) fn is_unused(&self) -> bool {
        self.tx.strong_count() == 1
    }

    async fn send(&self, command: TransferCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| AccountError::unavailable(format!("transfer {} is stopped", self.id)))
    }

    async fn ask<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T>>) -> TransferCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(message(reply)).await?;
        rx.await.map_err(|_| {
            AccountError::unavailable(format!("transfer {} dropped the request", self.id))
        })?
    }

    pub async fn retrieve(&self) -> Result<Option<TransferState>> {
        self.ask(|reply| TransferCommand::Retrieve { reply }).await
    }

    pub async fn ready_check(&self) -> Result<Readiness> {
        self.ask(|reply| TransferCommand::ReadyCheck { reply }).await
    }

    /// Enqueue a start and return the receiver of the final transfer state
    pub async fn start(
        &self,
        start: StartTransfer,
    ) -> Result<oneshot::Receiver<Result<TransferState>>> {
        let (reply_to, rx) = oneshot::channel();
        self.send(TransferCommand::Start { start, reply_to }).await?;
        Ok(rx)
    }
}

/// Spawn a transfer actor
pub fn spawn_transfer(
    id: Uuid,
    journal: Arc<dyn Journal>,
    accounts: Arc<dyn AccountDirectory>,
    snapshot_interval: u64,
    redelivery_interval: Duration,
    mailbox_capacity: usize,
) -> (TransferRef, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = TransferActor {
        id,
        journal: EntityJournal::new(journal, transfer_persistence_id(id), snapshot_interval),
        state: None,
        accounts,
        mailbox: tx.downgrade(),
        redelivery_interval,
        initiator: None,
        delivery: None,
    };
    let task = tokio::spawn(actor.run(rx));
    (TransferRef { id, tx }, task)
}

// =============================================================================
// TransferActor
// =============================================================================

struct TransferActor {
    id: Uuid,
    journal: EntityJournal<TransferEvent, TransferState>,
    state: Option<TransferState>,
    accounts: Arc<dyn AccountDirectory>,
    mailbox: mpsc::WeakSender<TransferCommand>,
    redelivery_interval: Duration,
    /// Who started the transfer; absent for transfers recovered after a restart
    initiator: Option<oneshot::Sender<Result<TransferState>>>,
    delivery: Option<JoinHandle<()>>,
}

impl Drop for TransferActor {
    fn drop(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            delivery.abort();
        }
    }
}

impl TransferActor {
    async fn run(mut self, mut rx: mpsc::Receiver<TransferCommand>) {
        match self.journal.recover(|state, event| event.apply(state)).await {
            Ok(state) => self.state = state,
            Err(e) => {
                error!(transfer_id = %self.id, error = %e, "Failed to recover transfer");
                return;
            }
        }
        if let Some(state) = self.state.as_ref().filter(|s| !s.is_finished()) {
            info!(transfer_id = %self.id, stage = ?state.stage, "Resuming transfer");
            self.progress().await;
        }

        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!(transfer_id = %self.id, "Transfer actor stopped");
    }

    async fn handle(&mut self, command: TransferCommand) {
        match command {
            TransferCommand::Retrieve { reply } => {
                let _ = reply.send(Ok(self.state.clone()));
            }
            TransferCommand::ReadyCheck { reply } => {
                let readiness = if self.state.is_some() {
                    Readiness::AlreadyStarted
                } else {
                    Readiness::Ready
                };
                let _ = reply.send(Ok(readiness));
            }
            TransferCommand::Start { start, reply_to } => self.start(start, reply_to).await,
            TransferCommand::DeliveryOutcome { stage, reply } => {
                self.on_delivery_outcome(stage, reply).await
            }
        }
    }

    async fn start(
        &mut self,
        start: StartTransfer,
        reply_to: oneshot::Sender<Result<TransferState>>,
    ) {
        if self.state.is_some() {
            let _ = reply_to.send(Err(AccountError::TransferAlreadyExists(self.id)));
            return;
        }

        let event = TransferEvent::Started {
            id: self.id,
            kind: start.kind,
            source_account_id: start.source_account_id,
            target_account_id: start.target_account_id,
            amount: start.amount,
            time: Utc::now(),
        };
        if let Err(e) = self.persist(event).await {
            let _ = reply_to.send(Err(e));
            return;
        }

        info!(
            transfer_id = %self.id,
            kind = ?start.kind,
            source_account_id = %start.source_account_id,
            target_account_id = %start.target_account_id,
            "Transfer started"
        );
        self.initiator = Some(reply_to);
        self.progress().await;
    }

    async fn on_delivery_outcome(&mut self, stage: TransferStage, reply: StepReply) {
        let Some(state) = &self.state else {
            return;
        };
        if state.stage != stage {
            debug!(transfer_id = %self.id, ?stage, ?reply, "Ignoring duplicate confirmation");
            return;
        }
        self.delivery = None;

        let time = Utc::now();
        let event = match reply {
            StepReply::MoneyBlocked => TransferEvent::MoneyBlocked { time },
            StepReply::InsufficientBalance => TransferEvent::MoneyBlockFailed {
                status: TransferStatus::LowBalance,
                time,
            },
            StepReply::MoneyDeposited => TransferEvent::MoneyDeposited { time },
            StepReply::TransferCompleted => TransferEvent::Completed { time },
            StepReply::NotFound => {
                // delivery tasks retry NotFound themselves
                self.progress().await;
                return;
            }
        };

        if let Err(e) = self.persist(event).await {
            error!(transfer_id = %self.id, error = %e, "Failed to persist transfer step");
        }
        self.progress().await;
    }

    /// Move the saga forward from the current stage
    ///
    /// Notifies the initiator when finished, closes a deposit whose money has
    /// arrived, or starts delivering the pending step.
    async fn progress(&mut self) {
        loop {
            let Some(state) = &self.state else {
                return;
            };

            if state.is_finished() {
                info!(transfer_id = %self.id, status = %state.status, "Transfer finished");
                if let Some(initiator) = self.initiator.take() {
                    let _ = initiator.send(Ok(state.clone()));
                }
                return;
            }

            if state.kind == TransferKind::Deposit && state.stage == TransferStage::MoneyDeposited {
                if let Err(e) = self.persist(TransferEvent::Completed { time: Utc::now() }).await {
                    error!(transfer_id = %self.id, error = %e, "Failed to complete deposit");
                    return;
                }
                continue;
            }

            if let Some(step) = state.next_delivery() {
                let stage = step.pending_stage(state.kind);
                self.deliver(step, stage);
            }
            return;
        }
    }

    fn deliver(&mut self, step: Delivery, stage: TransferStage) {
        if let Some(previous) = self.delivery.take() {
            previous.abort();
        }
        self.delivery = Some(tokio::spawn(deliver_step(
            self.id,
            step,
            stage,
            self.accounts.clone(),
            self.mailbox.clone(),
            self.redelivery_interval,
        )));
    }

    /// Write and apply one event
    async fn persist(&mut self, event: TransferEvent) -> Result<()> {
        let next = event.clone().apply(self.state.clone())?;
        self.journal
            .persist(&event)
            .await
            .map_err(|e| AccountError::storage(e.to_string()))?;
        debug!(
            transfer_id = %self.id,
            event_type = event.event_type(),
            sequence_nr = self.journal.sequence_nr(),
            "Transfer event persisted"
        );
        self.journal.maybe_snapshot(&next).await;
        self.state = Some(next);
        Ok(())
    }
}

/// Send one step to its account until the account replies
async fn deliver_step(
    transfer_id: Uuid,
    step: Delivery,
    stage: TransferStage,
    accounts: Arc<dyn AccountDirectory>,
    mailbox: mpsc::WeakSender<TransferCommand>,
    redelivery_interval: Duration,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let account = accounts.account(step.account_id());

        match tokio::time::timeout(redelivery_interval, account.deliver(&step)).await {
            Ok(Ok(StepReply::NotFound)) => {
                debug!(%transfer_id, account_id = %account.id(), attempt, "Account not found, retrying step");
            }
            Ok(Ok(reply)) => {
                let Some(mailbox) = mailbox.upgrade() else {
                    return;
                };
                let _ = mailbox
                    .send(TransferCommand::DeliveryOutcome { stage, reply })
                    .await;
                return;
            }
            Ok(Err(e)) => {
                warn!(%transfer_id, account_id = %account.id(), attempt, error = %e, "Step delivery failed, retrying");
            }
            Err(_) => {
                debug!(%transfer_id, account_id = %account.id(), attempt, "No reply within redelivery interval, resending");
                continue;
            }
        }
        tokio::time::sleep(redelivery_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_actor::spawn_account;
    use account_storage::InMemoryJournal;
    use dashmap::DashMap;

    struct TestAccounts {
        journal: Arc<dyn Journal>,
        accounts: DashMap<Uuid, AccountRef>,
    }

    impl AccountDirectory for TestAccounts {
        fn account(&self, id: Uuid) -> AccountRef {
            self.accounts
                .entry(id)
                .or_insert_with(|| spawn_account(id, self.journal.clone(), 0, 16).0)
                .clone()
        }
    }

    async fn setup() -> (Arc<dyn Journal>, Arc<TestAccounts>, Uuid, Uuid) {
        let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
        let accounts = Arc::new(TestAccounts {
            journal: journal.clone(),
            accounts: DashMap::new(),
        });
        let source = Uuid::new_v4();
        let target = Uuid::new_v4();
        accounts.account(source).create("source").await.unwrap();
        accounts.account(target).create("target").await.unwrap();
        accounts
            .account(source)
            .deliver(&Delivery::DepositMoney {
                account_id: source,
                transfer_id: Uuid::new_v4(),
                source_account_id: Uuid::new_v4(),
                amount: Money::from(100),
            })
            .await
            .unwrap();
        (journal, accounts, source, target)
    }

    fn spawn(journal: &Arc<dyn Journal>, accounts: &Arc<TestAccounts>, id: Uuid) -> TransferRef {
        let accounts: Arc<dyn AccountDirectory> = accounts.clone();
        spawn_transfer(id, journal.clone(), accounts, 0, Duration::from_millis(100), 16).0
    }

    async fn balance(accounts: &TestAccounts, id: Uuid) -> Money {
        accounts
            .account(id)
            .retrieve()
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn test_transfer_completes() {
        let (journal, accounts, source, target) = setup().await;
        let transfer = spawn(&journal, &accounts, Uuid::new_v4());

        assert_eq!(transfer.ready_check().await.unwrap(), Readiness::Ready);
        let done = transfer
            .start(StartTransfer {
                kind: TransferKind::Transfer,
                source_account_id: source,
                target_account_id: target,
                amount: Money::from(30),
            })
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(balance(&accounts, source).await, Money::from(70));
        assert_eq!(balance(&accounts, target).await, Money::from(30));
        assert_eq!(
            transfer.ready_check().await.unwrap(),
            Readiness::AlreadyStarted
        );
    }

    #[tokio::test]
    async fn test_transfer_with_low_balance() {
        let (journal, accounts, source, target) = setup().await;
        let transfer = spawn(&journal, &accounts, Uuid::new_v4());

        let done = transfer
            .start(StartTransfer {
                kind: TransferKind::Transfer,
                source_account_id: source,
                target_account_id: target,
                amount: Money::from(101),
            })
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.status, TransferStatus::LowBalance);
        assert_eq!(balance(&accounts, source).await, Money::from(100));
        assert_eq!(balance(&accounts, target).await, Money::ZERO);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (journal, accounts, source, target) = setup().await;
        let id = Uuid::new_v4();
        let transfer = spawn(&journal, &accounts, id);
        let start = StartTransfer {
            kind: TransferKind::Transfer,
            source_account_id: source,
            target_account_id: target,
            amount: Money::from(1),
        };

        transfer.start(start.clone()).await.unwrap().await.unwrap().unwrap();
        let err = transfer
            .start(start)
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, AccountError::TransferAlreadyExists(id));
    }

    #[tokio::test]
    async fn test_deposit_skips_source_account() {
        let (journal, accounts, _source, target) = setup().await;
        let transfer = spawn(&journal, &accounts, Uuid::new_v4());
        let bank = Uuid::new_v4();

        let done = transfer
            .start(StartTransfer {
                kind: TransferKind::Deposit,
                source_account_id: bank,
                target_account_id: target,
                amount: Money::from(12),
            })
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.stage, TransferStage::Completed);
        assert_eq!(balance(&accounts, target).await, Money::from(12));
        // no actor was ever resolved for the external source
        assert!(!accounts.accounts.contains_key(&bank));
    }

    #[tokio::test]
    async fn test_stale_outcome_is_ignored() {
        let (journal, accounts, source, target) = setup().await;
        let transfer = spawn(&journal, &accounts, Uuid::new_v4());

        let done = transfer
            .start(StartTransfer {
                kind: TransferKind::Transfer,
                source_account_id: source,
                target_account_id: target,
                amount: Money::from(5),
            })
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, TransferStatus::Completed);

        transfer
            .send(TransferCommand::DeliveryOutcome {
                stage: TransferStage::Started,
                reply: StepReply::InsufficientBalance,
            })
            .await
            .unwrap();
        let state = transfer.retrieve().await.unwrap().unwrap();
        assert_eq!(state.status, TransferStatus::Completed);
    }
}
