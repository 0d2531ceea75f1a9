//! Ticket Ledger
//!
//! Off-chain record of which address holds which ticket, kept in step with
//! the chain by the reconciliation engine in `ticket-sync`.
//!
//! # Architecture
//!
//! - **Point operations**: get, compare-and-swap, list by owner
//! - **Optimistic concurrency**: every write names the block it was read at
//! - **Atomic batches**: a record and its owner index move together
//! - **Persisted cursor**: sync progress lives next to the records it covers
//!
//! # Invariants
//!
//! - `last_applied_block` never decreases for a record
//! - Records are never deleted; redemption is a status transition
//! - The sync cursor never moves backwards

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod memory;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use config::{RocksDBConfig, StorageBackend, StorageConfig};
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use storage::Storage;
pub use store::TicketStore;
pub use types::{
    Address, ChainEvent, EventKind, SyncCursor, TicketId, TicketRecord, TicketStatus, TxHash,
};
