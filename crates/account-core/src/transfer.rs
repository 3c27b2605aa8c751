// Transfer state, events and saga stages
//
// A transfer moves money in up to three delivered steps:
//   BlockMoney (source) -> DepositMoney (target) -> CompleteTransfer (source)
// A deposit is a transfer whose source is outside the system, so it has only the
// DepositMoney step. The persisted stage says which step is still pending, which is
// what makes delivery resumable after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;
use crate::Money;

/// What kind of money movement the transfer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Between two accounts of the service
    Transfer,
    /// From outside the system into an account
    Deposit,
}

/// Public status of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    InProgress,
    Completed,
    LowBalance,
}

impl TransferStatus {
    /// Wire code of the status
    pub fn code(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::LowBalance => "low_balance",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Progress of the transfer saga
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStage {
    Started,
    MoneyBlocked,
    MoneyDeposited,
    Completed,
    Failed,
}

/// A step the transfer still has to deliver to an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Withdraw the amount from the source account
    BlockMoney {
        account_id: Uuid,
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
    },
    /// Add the amount to the target account
    DepositMoney {
        account_id: Uuid,
        transfer_id: Uuid,
        source_account_id: Uuid,
        amount: Money,
    },
    /// Release the transfer bookkeeping on the source account
    CompleteTransfer { account_id: Uuid, transfer_id: Uuid },
}

impl Delivery {
    /// Account the step is delivered to
    pub fn account_id(&self) -> Uuid {
        match self {
            Delivery::BlockMoney { account_id, .. }
            | Delivery::DepositMoney { account_id, .. }
            | Delivery::CompleteTransfer { account_id, .. } => *account_id,
        }
    }

    /// Stage the transfer is in while this step is pending
    pub fn pending_stage(&self, kind: TransferKind) -> TransferStage {
        match (self, kind) {
            (Delivery::BlockMoney { .. }, _) => TransferStage::Started,
            (Delivery::DepositMoney { .. }, TransferKind::Deposit) => TransferStage::Started,
            (Delivery::DepositMoney { .. }, TransferKind::Transfer) => TransferStage::MoneyBlocked,
            (Delivery::CompleteTransfer { .. }, _) => TransferStage::MoneyDeposited,
        }
    }
}

/// State of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    pub id: Uuid,
    pub kind: TransferKind,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Money,
    pub status: TransferStatus,
    pub stage: TransferStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferState {
    /// Apply an event to this state and produce the next one
    pub fn update(&self, event: TransferEvent) -> Result<TransferState, StateError> {
        event.apply(Some(self.clone()))
    }

    /// Whether the saga has reached a terminal stage
    pub fn is_finished(&self) -> bool {
        matches!(self.stage, TransferStage::Completed | TransferStage::Failed)
    }

    /// The step still to be delivered, if any
    pub fn next_delivery(&self) -> Option<Delivery> {
        match (self.kind, self.stage) {
            (TransferKind::Transfer, TransferStage::Started) => Some(Delivery::BlockMoney {
                account_id: self.source_account_id,
                transfer_id: self.id,
                target_account_id: self.target_account_id,
                amount: self.amount,
            }),
            (TransferKind::Deposit, TransferStage::Started)
            | (_, TransferStage::MoneyBlocked) => Some(Delivery::DepositMoney {
                account_id: self.target_account_id,
                transfer_id: self.id,
                source_account_id: self.source_account_id,
                amount: self.amount,
            }),
            (TransferKind::Transfer, TransferStage::MoneyDeposited) => {
                Some(Delivery::CompleteTransfer {
                    account_id: self.source_account_id,
                    transfer_id: self.id,
                })
            }
            (TransferKind::Deposit, TransferStage::MoneyDeposited) => None,
            (_, TransferStage::Completed | TransferStage::Failed) => None,
        }
    }
}

/// Events changing a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Transfer was accepted and initialised
    Started {
        id: Uuid,
        kind: TransferKind,
        source_account_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
        time: DateTime<Utc>,
    },

    /// Source account confirmed the money is blocked
    MoneyBlocked { time: DateTime<Utc> },

    /// Source account could not block the money
    MoneyBlockFailed {
        status: TransferStatus,
        time: DateTime<Utc>,
    },

    /// Target account confirmed the deposit
    MoneyDeposited { time: DateTime<Utc> },

    /// Transfer finished successfully
    Completed { time: DateTime<Utc> },
}

impl TransferEvent {
    /// Event type label used in logs
    pub fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Started { .. } => "transfer.started",
            TransferEvent::MoneyBlocked { .. } => "transfer.money_blocked",
            TransferEvent::MoneyBlockFailed { .. } => "transfer.money_block_failed",
            TransferEvent::MoneyDeposited { .. } => "transfer.money_deposited",
            TransferEvent::Completed { .. } => "transfer.completed",
        }
    }

    /// Apply the event to an optional previous state
    pub fn apply(self, state: Option<TransferState>) -> Result<TransferState, StateError> {
        match (self, state) {
            (
                TransferEvent::Started {
                    id,
                    kind,
                    source_account_id,
                    target_account_id,
                    amount,
                    time,
                },
                None,
            ) => Ok(TransferState {
                id,
                kind,
                source_account_id,
                target_account_id,
                amount,
                status: TransferStatus::InProgress,
                stage: TransferStage::Started,
                created_at: time,
                updated_at: time,
            }),
            (TransferEvent::Started { .. }, Some(_)) => Err(StateError::TransferAlreadyStarted),
            (_, None) => Err(StateError::TransferMissing),

            (TransferEvent::MoneyBlocked { time }, Some(state)) => {
                Ok(state.advance(TransferStage::MoneyBlocked, None, time))
            }
            (TransferEvent::MoneyBlockFailed { status, time }, Some(state)) => {
                Ok(state.advance(TransferStage::Failed, Some(status), time))
            }
            (TransferEvent::MoneyDeposited { time }, Some(state)) => {
                Ok(state.advance(TransferStage::MoneyDeposited, None, time))
            }
            (TransferEvent::Completed { time }, Some(state)) => Ok(state.advance(
                TransferStage::Completed,
                Some(TransferStatus::Completed),
                time,
            )),
        }
    }
}

impl TransferState {
    fn advance(
        mut self,
        stage: TransferStage,
        status: Option<TransferStatus>,
        time: DateTime<Utc>,
    ) -> Self {
        self.stage = stage;
        if let Some(status) = status {
            self.status = status;
        }
        self.updated_at = time;
        self
    }
}
