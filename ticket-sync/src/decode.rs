//! Normalisation of raw ERC-721 logs into [`ChainEvent`]s
//!
//! `Transfer(address indexed from, address indexed to, uint256 indexed tokenId)`:
//!
//! | from | to   | kind     |
//! |------|------|----------|
//! | 0x0  | addr | Mint     |
//! | addr | 0x0  | Redeem   |
//! | addr | addr | Transfer |
//!
//! A redeemed ticket keeps the holder that burned it as its owner.

use crate::provider::RawLog;
use thiserror::Error;
use ticket_ledger::{Address, ChainEvent, EventKind, TicketId, TxHash};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Log that looked like a ticket event but could not be normalised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("undecodable log: {0}")]
pub struct DecodeError(pub String);

/// Parse a JSON-RPC hex quantity (`0x1a`)
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

fn parse_word(raw: &str) -> Result<[u8; 32], DecodeError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| DecodeError(format!("topic {:?} missing 0x prefix", raw)))?;
    let mut word = [0u8; 32];
    hex::decode_to_slice(digits, &mut word)
        .map_err(|e| DecodeError(format!("topic {:?}: {}", raw, e)))?;
    Ok(word)
}

fn address_from_word(word: &[u8; 32]) -> Result<Address, DecodeError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError(format!(
            "topic 0x{} is not a left-padded address",
            hex::encode(word)
        )));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address::from_bytes(bytes))
}

/// Canonical ticket id for an ERC-721 token id word
pub fn ticket_id_from_word(word: &[u8; 32]) -> TicketId {
    let encoded = hex::encode(word);
    let trimmed = encoded.trim_start_matches('0');
    if trimmed.is_empty() {
        TicketId::new("0x0")
    } else {
        TicketId::new(format!("0x{}", trimmed))
    }
}

/// Normalise one log.
///
/// Returns `Ok(None)` for logs that are not ticket transfers or were removed
/// by a reorganisation.
pub fn decode_log(log: &RawLog) -> Result<Option<ChainEvent>, DecodeError> {
    if log.removed {
        return Ok(None);
    }

    match log.topics.first() {
        Some(topic0) if topic0.eq_ignore_ascii_case(TRANSFER_TOPIC) => {}
        _ => return Ok(None),
    }

    // ERC-20 Transfer shares topic0 but carries the amount in data
    if log.topics.len() != 4 {
        return Err(DecodeError(format!(
            "expected 4 topics, got {}",
            log.topics.len()
        )));
    }

    let block_number = log
        .block_number
        .as_deref()
        .and_then(parse_quantity)
        .ok_or_else(|| DecodeError("missing or bad blockNumber".to_string()))?;
    let log_index = log
        .log_index
        .as_deref()
        .and_then(parse_quantity)
        .ok_or_else(|| DecodeError("missing or bad logIndex".to_string()))?;
    let tx_hash: TxHash = log
        .transaction_hash
        .as_deref()
        .ok_or_else(|| DecodeError("missing transactionHash".to_string()))?
        .parse()
        .map_err(|e| DecodeError(format!("transactionHash: {}", e)))?;

    let from = address_from_word(&parse_word(&log.topics[1])?)?;
    let to = address_from_word(&parse_word(&log.topics[2])?)?;
    let ticket_id = ticket_id_from_word(&parse_word(&log.topics[3])?);

    let (kind, from, to) = match (from.is_zero(), to.is_zero()) {
        (true, true) => {
            return Err(DecodeError(format!(
                "ticket {} moved from and to the zero address",
                ticket_id
            )))
        }
        (true, false) => (EventKind::Mint, None, to),
        (false, true) => (EventKind::Redeem, Some(from), from),
        (false, false) => (EventKind::Transfer, Some(from), to),
    };

    Ok(Some(ChainEvent {
        ticket_id,
        kind,
        from,
        to,
        block_number,
        log_index,
        tx_hash,
    }))
}
