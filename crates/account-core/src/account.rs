// Account state and events
//
// AccountState is immutable from the outside: the only way to get a new state is to
// apply an AccountEvent. The runtime persists each event before applying it, so replaying
// the journal through `AccountEvent::apply` rebuilds exactly the state clients observed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;
use crate::Money;

/// Funds blocked on the source account for a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTransfer {
    pub id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Money,
}

/// Current state of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub id: Uuid,
    pub name: String,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Transfers whose money is blocked here and not yet completed
    #[serde(default)]
    pub current_transfers: BTreeMap<Uuid, ActiveTransfer>,

    /// Completed outgoing transfers. Kept so a redelivered CompleteTransfer or
    /// BlockMoney is recognised and answered without a second state change.
    #[serde(default)]
    pub completed_transfers: BTreeMap<Uuid, ActiveTransfer>,

    /// Transfer ids already deposited into this account
    #[serde(default)]
    pub deposits: BTreeSet<Uuid>,
}

impl AccountState {
    /// Create a state directly, bypassing the event log
    pub fn new(id: Uuid, name: impl Into<String>, balance: Money, at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            balance,
            created_at: at,
            updated_at: at,
            current_transfers: BTreeMap::new(),
            completed_transfers: BTreeMap::new(),
            deposits: BTreeSet::new(),
        }
    }

    /// Apply an event to this state and produce the next one
    pub fn update(&self, event: AccountEvent) -> Result<AccountState, StateError> {
        event.apply(Some(self.clone()))
    }

    /// Whether money for the transfer is currently blocked on this account
    pub fn has_current_transfer(&self, id: Uuid) -> bool {
        self.current_transfers.contains_key(&id)
    }

    /// Whether the transfer is blocked or already completed on this account
    pub fn has_active_transfer(&self, id: Uuid) -> bool {
        self.current_transfers.contains_key(&id) || self.completed_transfers.contains_key(&id)
    }

    /// Whether the transfer has been completed on this account
    pub fn has_completed_transfer(&self, id: Uuid) -> bool {
        self.completed_transfers.contains_key(&id)
    }

    /// Whether money of the transfer has been deposited into this account
    pub fn has_deposit(&self, id: Uuid) -> bool {
        self.deposits.contains(&id)
    }

    /// Check whether the balance covers `amount`
    ///
    /// Returns `StateError::NonPositiveAmount` if `amount` is zero or negative.
    pub fn has_sufficient_balance_to_block(&self, amount: Money) -> Result<bool, StateError> {
        if amount <= Money::ZERO {
            return Err(StateError::NonPositiveAmount);
        }
        Ok(self.balance >= amount)
    }
}

/// Events changing an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountEvent {
    /// Account was created with zero balance
    Created {
        id: Uuid,
        name: String,
        time: DateTime<Utc>,
    },

    /// Money was blocked (withdrawn) for an outgoing transfer
    MoneyBlocked {
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
        time: DateTime<Utc>,
    },

    /// Money of an incoming transfer or deposit was added
    MoneyDeposited {
        transfer_id: Uuid,
        source_account_id: Uuid,
        amount: Money,
        time: DateTime<Utc>,
    },

    /// Outgoing transfer finished, blocked money is gone for good
    TransferCompleted {
        transfer_id: Uuid,
        time: DateTime<Utc>,
    },
}

impl AccountEvent {
    /// Build a `MoneyDeposited` event, rejecting non-positive amounts
    pub fn money_deposited(
        transfer_id: Uuid,
        source_account_id: Uuid,
        amount: Money,
        time: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        if amount <= Money::ZERO {
            return Err(StateError::NonPositiveAmount);
        }
        Ok(AccountEvent::MoneyDeposited {
            transfer_id,
            source_account_id,
            amount,
            time,
        })
    }

    /// Event type label used in logs
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Created { .. } => "account.created",
            AccountEvent::MoneyBlocked { .. } => "account.money_blocked",
            AccountEvent::MoneyDeposited { .. } => "account.money_deposited",
            AccountEvent::TransferCompleted { .. } => "account.transfer_completed",
        }
    }

    /// Apply the event to an optional previous state
    ///
    /// `None` means the account has not been created yet; only `Created` is valid then.
    pub fn apply(self, state: Option<AccountState>) -> Result<AccountState, StateError> {
        match (self, state) {
            (AccountEvent::Created { id, name, time }, None) => {
                Ok(AccountState::new(id, name, Money::ZERO, time))
            }
            (AccountEvent::Created { .. }, Some(_)) => Err(StateError::AccountAlreadyCreated),
            (_, None) => Err(StateError::AccountMissing),

            (
                AccountEvent::MoneyBlocked {
                    transfer_id,
                    target_account_id,
                    amount,
                    time,
                },
                Some(mut account),
            ) => {
                if !account.has_sufficient_balance_to_block(amount)? {
                    return Err(StateError::InsufficientBalance);
                }
                account.balance -= amount;
                account.updated_at = time;
                account.current_transfers.insert(
                    transfer_id,
                    ActiveTransfer {
                        id: transfer_id,
                        source_account_id: account.id,
                        target_account_id,
                        amount,
                    },
                );
                Ok(account)
            }

            (
                AccountEvent::MoneyDeposited {
                    transfer_id,
                    amount,
                    time,
                    ..
                },
                Some(mut account),
            ) => {
                if amount <= Money::ZERO {
                    return Err(StateError::NonPositiveAmount);
                }
                account.balance += amount;
                account.updated_at = time;
                account.deposits.insert(transfer_id);
                Ok(account)
            }

            (AccountEvent::TransferCompleted { transfer_id, time }, Some(mut account)) => {
                let transfer = account
                    .current_transfers
                    .remove(&transfer_id)
                    .ok_or(StateError::UnknownTransfer(transfer_id))?;
                account.completed_transfers.insert(transfer_id, transfer);
                account.updated_at = time;
                Ok(account)
            }
        }
    }
}
