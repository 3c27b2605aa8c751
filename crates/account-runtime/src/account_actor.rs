// Account entity actor
//
// One task per account. The task recovers the account from the journal, then handles
// its mailbox one message at a time. Every state change is validated against the
// current state, written to the journal and only then applied and answered.
//
// Transfer steps (BlockMoney, DepositMoney, CompleteTransfer) may arrive more than
// once; a step the account has already recorded is answered with the same reply
// without writing a second event.

use std::sync::Arc;

use account_core::{
    account_persistence_id, AccountError, AccountEvent, AccountState, Delivery, Money, Result,
};
use account_storage::{EntityJournal, Journal};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::messages::{CreateReply, Readiness, StepReply};

// =============================================================================
// Messages
// =============================================================================

/// Messages handled by an account actor
#[derive(Debug)]
pub enum AccountCommand {
    Create {
        name: String,
        reply: oneshot::Sender<Result<CreateReply>>,
    },
    Retrieve {
        reply: oneshot::Sender<Result<Option<AccountState>>>,
    },
    ReadyCheck {
        transfer_id: Uuid,
        reply: oneshot::Sender<Result<Readiness>>,
    },
    BlockMoney {
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
        reply: oneshot::Sender<Result<StepReply>>,
    },
    DepositMoney {
        transfer_id: Uuid,
        source_account_id: Uuid,
        amount: Money,
        reply: oneshot::Sender<Result<StepReply>>,
    },
    CompleteTransfer {
        transfer_id: Uuid,
        reply: oneshot::Sender<Result<StepReply>>,
    },
}

// =============================================================================
// AccountRef
// =============================================================================

/// Cloneable handle to a running account actor
#[derive(Debug, Clone)]
pub struct AccountRef {
    id: Uuid,
    tx: mpsc::Sender<AccountCommand>,
}

impl AccountRef {
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

    async fn ask<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T>>) -> AccountCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(message(reply))
            .await
            .map_err(|_| AccountError::unavailable(format!("account {} is stopped", self.id)))?;
        rx.await
            .map_err(|_| AccountError::unavailable(format!("account {} dropped the request", self.id)))?
    }

    pub async fn create(&self, name: impl Into<String>) -> Result<CreateReply> {
        let name = name.into();
        self.ask(|reply| AccountCommand::Create { name, reply }).await
    }

    pub async fn retrieve(&self) -> Result<Option<AccountState>> {
        self.ask(|reply| AccountCommand::Retrieve { reply }).await
    }

    pub async fn ready_check(&self, transfer_id: Uuid) -> Result<Readiness> {
        self.ask(|reply| AccountCommand::ReadyCheck { transfer_id, reply })
            .await
    }

    /// Deliver a transfer step to this account
    pub async fn deliver(&self, step: &Delivery) -> Result<StepReply> {
        match step.clone() {
            Delivery::BlockMoney {
                transfer_id,
                target_account_id,
                amount,
                ..
            } => {
                self.ask(|reply| AccountCommand::BlockMoney {
                    transfer_id,
                    target_account_id,
                    amount,
                    reply,
                })
                .await
            }
            Delivery::DepositMoney {
                transfer_id,
                source_account_id,
                amount,
                ..
            } => {
                self.ask(|reply| AccountCommand::DepositMoney {
                    transfer_id,
                    source_account_id,
                    amount,
                    reply,
                })
                .await
            }
            Delivery::CompleteTransfer { transfer_id, .. } => {
                self.ask(|reply| AccountCommand::CompleteTransfer { transfer_id, reply })
                    .await
            }
        }
    }
}

/// Spawn an account actor
pub fn spawn_account(
    id: Uuid,
    journal: Arc<dyn Journal>,
    snapshot_interval: u64,
    mailbox_capacity: usize,
) -> (AccountRef, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = AccountActor {
        id,
        journal: EntityJournal::new(journal, account_persistence_id(id), snapshot_interval),
        state: None,
    };
    let task = tokio::spawn(actor.run(rx));
    (AccountRef { id, tx }, task)
}

// =============================================================================
// AccountActor
// =============================================================================

struct AccountActor {
    id: Uuid,
    journal: EntityJournal<AccountEvent, AccountState>,
    state: Option<AccountState>,
}

impl AccountActor {
    async fn run(mut self, mut rx: mpsc::Receiver<AccountCommand>) {
        match self.journal.recover(|state, event| event.apply(state)).await {
            Ok(state) => self.state = state,
            Err(e) => {
                error!(account_id = %self.id, error = %e, "Failed to recover account");
                return;
            }
        }

        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!(account_id = %self.id, "Account actor stopped");
    }

    async fn handle(&mut self, command: AccountCommand) {
        match command {
            AccountCommand::Create { name, reply } => {
                let _ = reply.send(self.create(name).await);
            }
            AccountCommand::Retrieve { reply } => {
                let _ = reply.send(Ok(self.state.clone()));
            }
            AccountCommand::ReadyCheck { transfer_id, reply } => {
                let readiness = if self.state.is_some() {
                    Readiness::Ready
                } else {
                    Readiness::NotFound
                };
                debug!(account_id = %self.id, %transfer_id, ?readiness, "Ready check");
                let _ = reply.send(Ok(readiness));
            }
            AccountCommand::BlockMoney {
                transfer_id,
                target_account_id,
                amount,
                reply,
            } => {
                let result = self
                    .block_money(transfer_id, target_account_id, amount)
                    .await;
                let _ = reply.send(result);
            }
            AccountCommand::DepositMoney {
                transfer_id,
                source_account_id,
                amount,
                reply,
            } => {
                let result = self
                    .deposit_money(transfer_id, source_account_id, amount)
                    .await;
                let _ = reply.send(result);
            }
            AccountCommand::CompleteTransfer { transfer_id, reply } => {
                let _ = reply.send(self.complete_transfer(transfer_id).await);
            }
        }
    }

    async fn create(&mut self, name: String) -> Result<CreateReply> {
        if self.state.is_some() {
            return Ok(CreateReply::AlreadyExists(self.id));
        }
        self.persist(AccountEvent::Created {
            id: self.id,
            name,
            time: Utc::now(),
        })
        .await?;
        info!(account_id = %self.id, "Account created");
        Ok(CreateReply::Created(self.id))
    }

    async fn block_money(
        &mut self,
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
    ) -> Result<StepReply> {
        let Some(account) = &self.state else {
            return Ok(StepReply::NotFound);
        };
        if account.has_active_transfer(transfer_id) {
            return Ok(StepReply::MoneyBlocked);
        }
        if !account.has_sufficient_balance_to_block(amount)? {
            info!(account_id = %self.id, %transfer_id, "Insufficient balance to block money");
            return Ok(StepReply::InsufficientBalance);
        }

        self.persist(AccountEvent::MoneyBlocked {
            transfer_id,
            target_account_id,
            amount,
            time: Utc::now(),
        })
        .await?;
        Ok(StepReply::MoneyBlocked)
    }

    async fn deposit_money(
        &mut self,
        transfer_id: Uuid,
        source_account_id: Uuid,
        amount: Money,
    ) -> Result<StepReply> {
        let Some(account) = &self.state else {
            return Ok(StepReply::NotFound);
        };
        if account.has_deposit(transfer_id) {
            return Ok(StepReply::MoneyDeposited);
        }

        let event =
            AccountEvent::money_deposited(transfer_id, source_account_id, amount, Utc::now())?;
        self.persist(event).await?;
        Ok(StepReply::MoneyDeposited)
    }

    async fn complete_transfer(&mut self, transfer_id: Uuid) -> Result<StepReply> {
        let Some(account) = &self.state else {
            return Ok(StepReply::NotFound);
        };
        if account.has_completed_transfer(transfer_id) {
            return Ok(StepReply::TransferCompleted);
        }

        self.persist(AccountEvent::TransferCompleted {
            transfer_id,
            time: Utc::now(),
        })
        .await?;
        Ok(StepReply::TransferCompleted)
    }

    /// Validate, write and apply one event
    async fn persist(&mut self, event: AccountEvent) -> Result<()> {
        let next = event.clone().apply(self.state.clone())?;
        self.journal
            .persist(&event)
            .await
            .map_err(|e| AccountError::storage(e.to_string()))?;
        debug!(
            account_id = %self.id,
            event_type = event.event_type(),
            sequence_nr = self.journal.sequence_nr(),
            "Account event persisted"
        );
        self.journal.maybe_snapshot(&next).await;
        self.state = Some(next);
        Ok(())
    }
}
