// Error types for the account domain

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for account service operations
pub type Result<T> = std::result::Result<T, AccountError>;

/// Errors returned by the account service
///
/// Display strings are the messages clients see in error responses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountError {
    /// Account with the given id has already been created
    #[error("Account {0} already exists")]
    AccountAlreadyExists(Uuid),

    /// Account with the given id does not exist
    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    /// Transfer with the given id has already been started
    #[error("Transfer with id {0} has been already created")]
    TransferAlreadyExists(Uuid),

    /// Another request with the same transfer id is still in its readiness phase
    #[error("Transfer {0} is being created")]
    TransferIsBeingCreated(Uuid),

    /// Transfer with the given id does not exist
    #[error("Transfer {0} not found")]
    TransferNotFound(Uuid),

    /// Request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No reply within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(&'static str),

    /// Entity task is gone or its mailbox is closed
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Journal or snapshot store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AccountError {
    /// Create an invalid request error
    pub fn invalid(msg: impl Into<String>) -> Self {
        AccountError::InvalidRequest(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        AccountError::Unavailable(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        AccountError::Storage(msg.into())
    }
}

/// Errors raised when an event can not be applied to a state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Create event can not be applied for already created account")]
    AccountAlreadyCreated,

    #[error("Event can not be applied, account does not exist")]
    AccountMissing,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Amount has to be positive number")]
    NonPositiveAmount,

    #[error("Transfer {0} is not active on the account")]
    UnknownTransfer(Uuid),

    #[error("Start event can not be applied for already started transfer")]
    TransferAlreadyStarted,

    #[error("Event can not be applied, transfer has not been started")]
    TransferMissing,
}

impl From<StateError> for AccountError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NonPositiveAmount => AccountError::InvalidRequest(e.to_string()),
            other => AccountError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let id = Uuid::nil();
        assert_eq!(
            AccountError::AccountAlreadyExists(id).to_string(),
            format!("Account {} already exists", id)
        );
        assert_eq!(
            AccountError::TransferAlreadyExists(id).to_string(),
            format!("Transfer with id {} has been already created", id)
        );
        assert_eq!(
            AccountError::TransferNotFound(id).to_string(),
            format!("Transfer {} not found", id)
        );
    }

    #[test]
    fn test_non_positive_amount_maps_to_invalid_request() {
        let err: AccountError = StateError::NonPositiveAmount.into();
        assert!(matches!(err, AccountError::InvalidRequest(_)));
    }
}
