// Account service core domain
//
// This crate holds the event-sourced domain model shared by the runtime and the API:
// - AccountState / AccountEvent: balance, blocked transfers, deposits
// - TransferState / TransferEvent: the transfer saga and its delivery stages
// - AccountError / StateError: domain and service errors

pub mod account;
pub mod error;
pub mod transfer;

pub use account::{AccountEvent, AccountState, ActiveTransfer};
pub use error::{AccountError, Result, StateError};
pub use transfer::{Delivery, TransferEvent, TransferKind, TransferStage, TransferState, TransferStatus};

/// Amount of money. Arbitrary precision decimal, compared numerically.
pub type Money = rust_decimal::Decimal;

/// Persistence id prefix for account journals
pub const ACCOUNT_PERSISTENCE_PREFIX: &str = "account-";

/// Persistence id prefix for transfer journals
pub const TRANSFER_PERSISTENCE_PREFIX: &str = "transfer-";

/// Journal key of an account entity
pub fn account_persistence_id(id: uuid::Uuid) -> String {
    format!("{}{}", ACCOUNT_PERSISTENCE_PREFIX, id)
}

/// Journal key of a transfer entity
pub fn transfer_persistence_id(id: uuid::Uuid) -> String {
    format!("{}{}", TRANSFER_PERSISTENCE_PREFIX, id)
}
