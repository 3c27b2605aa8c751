// Replies exchanged between the manager, transfer actors and account actors

use uuid::Uuid;

/// Reply to an account `Create`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateReply {
    Created(Uuid),
    AlreadyExists(Uuid),
}

/// Reply to a readiness check sent before a transfer starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Account exists, or transfer has not started yet
    Ready,
    /// Account does not exist
    NotFound,
    /// Transfer has already started
    AlreadyStarted,
}

/// Reply of an account to a delivered transfer step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReply {
    MoneyBlocked,
    InsufficientBalance,
    MoneyDeposited,
    TransferCompleted,
    /// The account does not exist (yet); the step is retried
    NotFound,
}
