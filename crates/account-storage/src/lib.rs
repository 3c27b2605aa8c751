//! Event journal and snapshot store for the account service
//!
//! This crate provides:
//! - [`Journal`] trait for append-only, per-entity event logs with snapshots
//! - [`RocksJournal`] backed by an embedded RocksDB database
//! - [`InMemoryJournal`] for testing
//! - [`EntityJournal`] typed recover/persist/snapshot helper used by entities

mod entity;
mod memory;
mod rocks;
mod store;

pub use entity::EntityJournal;
pub use memory::InMemoryJournal;
pub use rocks::RocksJournal;
pub use store::{Journal, PersistedEvent, SnapshotRecord, StoreError};
