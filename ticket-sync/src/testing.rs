//! Scripted chain provider for tests and local runs
//!
//! Serves logs from memory, with knobs for the failure modes the reader and
//! engine have to survive: transient errors, result-size limits, latency and
//! a moving chain head.

use crate::decode::{parse_quantity, TRANSFER_TOPIC};
use crate::provider::{ChainProvider, LogFilter, ProviderError, RawLog};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use ticket_ledger::Address;

/// Contract address the scripted logs are emitted from
pub const TEST_CONTRACT: &str = "0x1111111111111111111111111111111111111111";

/// Address made of one repeated byte (`0` is the zero address)
pub fn address(byte: u8) -> Address {
    Address::from_bytes([byte; 20])
}

fn address_word(byte: u8) -> String {
    format!("0x{}{}", "00".repeat(12), format!("{:02x}", byte).repeat(20))
}

/// ERC-721 `Transfer` log between [`address`]`(from)` and [`address`]`(to)`
pub fn transfer_log(from: u8, to: u8, token: u64, block: u64, log_index: u64) -> RawLog {
    RawLog {
        address: TEST_CONTRACT.to_string(),
        topics: vec![
            TRANSFER_TOPIC.to_string(),
            address_word(from),
            address_word(to),
            format!("0x{:064x}", token),
        ],
        data: "0x".to_string(),
        block_number: Some(format!("0x{:x}", block)),
        transaction_hash: Some(format!("0x{:064x}", block * 1_000 + log_index)),
        log_index: Some(format!("0x{:x}", log_index)),
        removed: false,
    }
}

/// In-memory [`ChainProvider`]
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    max_span: Mutex<Option<u64>>,
    failures_remaining: AtomicU32,
    latency: Mutex<Option<Duration>>,
    unavailable_from: Mutex<Option<u64>>,
    get_logs_calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Provider whose chain head is `head`
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Self::default()
        }
    }

    /// Move the chain head
    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Append a log
    pub fn push_log(&self, log: RawLog) {
        self.logs.lock().push(log);
    }

    /// Replace every log (simulates a reorganisation)
    pub fn replace_logs(&self, logs: Vec<RawLog>) {
        *self.logs.lock() = logs;
    }

    /// Refuse `eth_getLogs` spans wider than `blocks`
    pub fn set_max_span(&self, blocks: u64) {
        *self.max_span.lock() = Some(blocks);
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Fail every `eth_getLogs` reaching `block` or beyond
    pub fn set_unavailable_from(&self, block: u64) {
        *self.unavailable_from.lock() = Some(block);
    }

    /// Number of `eth_getLogs` calls served (including failed ones)
    pub fn get_logs_calls(&self) -> usize {
        self.get_logs_calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), ProviderError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ProviderError::Transient("injected failure".to_string()));
        }
        Ok(())
    }
}

fn log_position(log: &RawLog) -> (u64, u64) {
    (
        log.block_number.as_deref().and_then(parse_quantity).unwrap_or(0),
        log.log_index.as_deref().and_then(parse_quantity).unwrap_or(0),
    )
}

#[async_trait]
impl ChainProvider for ScriptedProvider {
    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.before_call().await?;
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ProviderError> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let unavailable_from = *self.unavailable_from.lock();
        if let Some(block) = unavailable_from {
            if filter.to_block >= block {
                return Err(ProviderError::Transient(format!(
                    "no data beyond block {}",
                    block - 1
                )));
            }
        }

        let span = filter.to_block - filter.from_block + 1;
        let max_span = *self.max_span.lock();
        if let Some(max_span) = max_span {
            if span > max_span {
                return Err(ProviderError::RangeTooLarge(format!(
                    "query spans {} blocks, limit is {}",
                    span, max_span
                )));
            }
        }

        let mut logs: Vec<RawLog> = self
            .logs
            .lock()
            .iter()
            .filter(|log| {
                let (block, _) = log_position(log);
                (filter.from_block..=filter.to_block).contains(&block)
            })
            .cloned()
            .collect();
        logs.sort_by_key(log_position);
        Ok(logs)
    }
}
