//! Core types for the ticket ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Canonical textual form (lowercase `0x`-hex) for identifiers
//! - Total ordering of chain events by `(block_number, log_index)`

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decode a `0x`-prefixed (or bare) hex string into exactly `N` bytes
fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N]> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if digits.len() != N * 2 {
        return Err(Error::InvalidAddress(format!(
            "expected {} hex digits, got {} in {:?}",
            N * 2,
            digits.len(),
            s
        )));
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| Error::InvalidAddress(format!("{:?}: {}", s, e)))?;
    Ok(out)
}

/// Account address (20 bytes, EVM layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address (mint source, burn target)
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed::<20>(s.trim()).map(Self)
    }
}

/// Ticket identifier
///
/// Opaque to the ledger. Tickets decoded from ERC-721 logs use the token id as
/// lowercase hex without leading zeros (`0x0` for token zero).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(String);

impl TicketId {
    /// Create new ticket ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction hash (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for TxHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed::<32>(s.trim()).map(Self)
    }
}

/// Kind of on-chain ticket event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Ticket created
    Mint,
    /// Ownership moved between holders
    Transfer,
    /// Ticket spent by its holder
    Redeem,
}

impl EventKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Mint => "mint",
            EventKind::Transfer => "transfer",
            EventKind::Redeem => "redeem",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized on-chain ticket event
///
/// Produced by the chain, never mutated. Uniquely identified by
/// `(block_number, log_index, tx_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Ticket this event applies to
    pub ticket_id: TicketId,

    /// Type of event
    pub kind: EventKind,

    /// Previous holder (`None` for mints)
    pub from: Option<Address>,

    /// New holder; for redemptions, the holder that redeemed
    pub to: Address,

    /// Block containing the log
    pub block_number: u64,

    /// Position of the log within its block
    pub log_index: u64,

    /// Transaction that emitted the log
    pub tx_hash: TxHash,
}

impl ChainEvent {
    /// Ordering key: events are applied ascending by this key
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Held and spendable
    Active,
    /// Spent; kept for audit history
    Redeemed,
}

/// Ownership record for one ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Ticket ID
    pub ticket_id: TicketId,

    /// Current holder
    pub owner: Address,

    /// Lifecycle status
    pub status: TicketStatus,

    /// Block of the last event applied to this record (never decreases)
    pub last_applied_block: u64,

    /// Log index of that event within its block
    #[serde(default)]
    pub last_applied_log_index: u64,
}

impl TicketRecord {
    /// Fresh active record for a minted ticket
    pub fn minted(event: &ChainEvent) -> Self {
        Self {
            ticket_id: event.ticket_id.clone(),
            owner: event.to,
            status: TicketStatus::Active,
            last_applied_block: event.block_number,
            last_applied_log_index: event.log_index,
        }
    }

    /// Position of the last applied event, comparable with [`ChainEvent::position`]
    pub fn last_applied_position(&self) -> (u64, u64) {
        (self.last_applied_block, self.last_applied_log_index)
    }

    /// Whether the ticket can still be transferred or redeemed
    pub fn is_active(&self) -> bool {
        self.status == TicketStatus::Active
    }
}

/// Reconciliation progress marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Highest block whose events have all been applied
    pub last_confirmed_block: u64,
}

impl SyncCursor {
    /// Create new cursor
    pub fn new(last_confirmed_block: u64) -> Self {
        Self {
            last_confirmed_block,
        }
    }
}
