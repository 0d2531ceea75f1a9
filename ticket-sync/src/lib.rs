//! Ticket Sync
//!
//! Keeps the ticket ledger in step with the ERC-721 ticket contract and
//! answers ownership queries from it.
//!
//! # Flow
//!
//! ```text
//! ChainProvider -> ChainEventReader -> ReconciliationEngine -> TicketStore
//!                                             |                    |
//!                                 InconsistencyReporter   TicketQueryHandler
//! ```
//!
//! The engine only ever applies events at least `confirmation_depth` blocks
//! behind the chain head, and persists its cursor after each sub-batch, so a
//! restarted process resumes where the last one stopped.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod query;
pub mod reader;
pub mod report;
pub mod service;
pub mod testing;

// Re-exports
pub use config::{Config, LogFormat, ProviderConfig, SyncConfig};
pub use engine::{ReconciliationEngine, SyncOutcome};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use provider::{ChainProvider, JsonRpcProvider, LogFilter, ProviderError, RawLog};
pub use query::TicketQueryHandler;
pub use reader::{ChainEventReader, ReaderConfig};
pub use report::{
    ChannelReporter, Inconsistency, InconsistencyKind, InconsistencyReporter, TracingReporter,
};
pub use service::{ShutdownHandle, SyncService};
