//! Error types for chain synchronisation

use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sync errors
#[derive(Error, Debug)]
pub enum Error {
    /// Chain provider unreachable or still failing after retries
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider refused a range that cannot be subdivided further
    #[error("Block range too large: {from}..={to}")]
    RangeTooLarge {
        /// First block of the refused range
        from: u64,
        /// Last block of the refused range
        to: u64,
    },

    /// Requested range is empty or reversed
    #[error("Invalid block range: {from}..={to}")]
    InvalidRange {
        /// First block requested
        from: u64,
        /// Last block requested
        to: u64,
    },

    /// Conditional update kept losing races
    #[error("Store conflict on ticket {0}")]
    StoreConflict(String),

    /// Ledger store error
    #[error("Store error: {0}")]
    Store(#[from] ticket_ledger::Error),

    /// Another sync pass holds the run-lock
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Sync pass exceeded its deadline
    #[error("Sync timed out after {0} ms")]
    Timeout(u64),

    /// Malformed owner address supplied by a caller
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
