// Account service runtime
//
// Entity actors on Tokio tasks:
// - account_actor: one task per account, idempotent transfer steps
// - transfer_actor: one task per transfer, saga with at-least-once step delivery
// - manager: entity registry, readiness protocol, recovery of in-flight transfers
// - service: AccountService trait and its actor-backed implementation

pub mod account_actor;
pub mod config;
pub mod manager;
pub mod messages;
pub mod service;
pub mod transfer_actor;

pub use account_actor::{AccountCommand, AccountRef};
pub use config::{RuntimeConfig, ServiceTimeouts};
pub use manager::{AccountManager, DepositRequest, EntityRegistry, TransferRequest};
pub use messages::{CreateReply, Readiness, StepReply};
pub use service::{AccountService, ActorAccountService};
pub use transfer_actor::{AccountDirectory, StartTransfer, TransferCommand, TransferRef};
