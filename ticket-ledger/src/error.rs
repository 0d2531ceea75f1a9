//! Error types for the ticket ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Ticket not found
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// Conditional update lost a race: the stored record is not at the expected block
    #[error("Conflict on ticket {ticket_id}: expected block {expected:?}, found {actual:?}")]
    Conflict {
        /// Ticket being updated
        ticket_id: String,
        /// Block the caller expected (`None` = absent)
        expected: Option<u64>,
        /// Block actually stored (`None` = absent)
        actual: Option<u64>,
    },

    /// Invariant violation (block regression, mismatched ids)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed address or hash
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
