// Account service facade
// Decision: HTTP handlers depend on the AccountService trait, not on actors
// Decision: Every operation has its own timeout; a timed-out transfer keeps running

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use account_core::{AccountError, AccountState, Money, Result, TransferState};
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::ServiceTimeouts;
use crate::manager::{AccountManager, DepositRequest, TransferRequest};

/// Operations exposed by the account service
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Create an account with zero balance
    async fn create_account(&self, account_id: Uuid, name: String) -> Result<Uuid>;

    async fn retrieve_account(&self, account_id: Uuid) -> Result<AccountState>;

    /// Move money between two accounts and wait for the outcome
    async fn make_transfer(
        &self,
        transfer_id: Uuid,
        source_account_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
    ) -> Result<TransferState>;

    async fn retrieve_transfer(&self, transfer_id: Uuid) -> Result<TransferState>;

    /// Add money from outside the system to an account
    async fn deposit_money(
        &self,
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
    ) -> Result<TransferState>;
}

/// `AccountService` backed by the entity actors of an `AccountManager`
pub struct ActorAccountService {
    manager: Arc<AccountManager>,
    timeouts: ServiceTimeouts,
}

impl ActorAccountService {
    pub fn new(manager: Arc<AccountManager>, timeouts: ServiceTimeouts) -> Self {
        Self { manager, timeouts }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    operation: &'static str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| AccountError::Timeout(operation))?
}

fn validate_amount(amount: Money) -> Result<()> {
    if amount <= Money::ZERO {
        return Err(AccountError::invalid("Amount has to be positive number"));
    }
    Ok(())
}

#[async_trait]
impl AccountService for ActorAccountService {
    async fn create_account(&self, account_id: Uuid, name: String) -> Result<Uuid> {
        with_timeout(
            self.timeouts.create_account,
            "create account",
            self.manager.create_account(account_id, name),
        )
        .await
    }

    async fn retrieve_account(&self, account_id: Uuid) -> Result<AccountState> {
        with_timeout(
            self.timeouts.retrieve_account,
            "retrieve account",
            self.manager.retrieve_account(account_id),
        )
        .await
    }

    async fn make_transfer(
        &self,
        transfer_id: Uuid,
        source_account_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
    ) -> Result<TransferState> {
        validate_amount(amount)?;
        if source_account_id == target_account_id {
            return Err(AccountError::invalid(
                "Source and target accounts must be different",
            ));
        }

        with_timeout(
            self.timeouts.make_transfer,
            "make transfer",
            self.manager.make_transfer(TransferRequest {
                transfer_id,
                source_account_id,
                target_account_id,
                amount,
            }),
        )
        .await
    }

    async fn retrieve_transfer(&self, transfer_id: Uuid) -> Result<TransferState> {
        with_timeout(
            self.timeouts.retrieve_transfer,
            "retrieve transfer",
            self.manager.retrieve_transfer(transfer_id),
        )
        .await
    }

    async fn deposit_money(
        &self,
        transfer_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
    ) -> Result<TransferState> {
        validate_amount(amount)?;

        with_timeout(
            self.timeouts.deposit_money,
            "deposit money",
            self.manager.deposit(DepositRequest {
                transfer_id,
                target_account_id,
                amount,
            }),
        )
        .await
    }
}
