//! Chain Event Reader
//!
//! Turns a block range into an ordered sequence of [`ChainEvent`]s:
//!
//! 1. Subdivide into chunks of at most `max_block_range` blocks
//! 2. Fetch chunks with bounded parallelism, retrying transient failures
//! 3. Halve any chunk the provider refuses as too large
//! 4. Decode, then merge everything back into `(block, log_index)` order

use crate::config::ProviderConfig;
use crate::decode::{decode_log, TRANSFER_TOPIC};
use crate::metrics::Metrics;
use crate::provider::{ChainProvider, LogFilter, ProviderError, RawLog};
use crate::{Error, Result};
use futures::{StreamExt, TryStreamExt};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use ticket_ledger::{Address, ChainEvent};
use tracing::{debug, error, info, warn};

/// Reader configuration
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Ticket contract
    pub contract: Address,

    /// Largest block span per request
    pub max_block_range: u64,

    /// Requests in flight at once
    pub max_parallel_requests: usize,

    /// Max attempts per request
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl ReaderConfig {
    /// Build from provider configuration
    pub fn from_provider_config(config: &ProviderConfig, contract: Address) -> Self {
        Self {
            contract,
            max_block_range: config.max_block_range.max(1),
            max_parallel_requests: config.max_parallel_requests.max(1),
            max_retry_attempts: config.max_retry_attempts.max(1),
            initial_retry_delay: Duration::from_millis(config.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }
}

/// Split `from..=to` into consecutive spans of at most `max_span` blocks
pub fn split_range(from: u64, to: u64, max_span: u64) -> Vec<(u64, u64)> {
    let max_span = max_span.max(1);
    let mut chunks = Vec::new();
    let mut start = from;
    loop {
        let end = start.saturating_add(max_span - 1).min(to);
        chunks.push((start, end));
        if end >= to {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Reads ticket events from a chain provider
pub struct ChainEventReader<P> {
    provider: Arc<P>,
    config: ReaderConfig,
    metrics: Metrics,
}

impl<P: ChainProvider> ChainEventReader<P> {
    /// Create new reader
    pub fn new(provider: Arc<P>, config: ReaderConfig, metrics: Metrics) -> Self {
        Self {
            provider,
            config,
            metrics,
        }
    }

    /// Current chain head
    pub async fn chain_head(&self) -> Result<u64> {
        self.with_retry("eth_blockNumber", || self.provider.block_number())
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))
    }

    /// Events in `from_block..=to_block`, ascending by `(block_number, log_index)`
    pub async fn fetch_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>> {
        if from_block > to_block {
            return Err(Error::InvalidRange {
                from: from_block,
                to: to_block,
            });
        }

        let chunks = split_range(from_block, to_block, self.config.max_block_range);
        debug!(
            from_block,
            to_block,
            chunks = chunks.len(),
            "Fetching ticket events"
        );

        let per_chunk: Vec<Vec<ChainEvent>> = futures::stream::iter(chunks)
            .map(|(lo, hi)| self.fetch_chunk(lo, hi))
            .buffer_unordered(self.config.max_parallel_requests)
            .try_collect()
            .await?;

        let mut events: Vec<ChainEvent> = per_chunk.into_iter().flatten().collect();
        events.sort_by_key(ChainEvent::position);

        info!(
            from_block,
            to_block,
            events = events.len(),
            "Fetched ticket events"
        );

        Ok(events)
    }

    /// Fetch one chunk, halving it while the provider refuses the size
    async fn fetch_chunk(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>> {
        let mut pending = vec![(from_block, to_block)];
        let mut events = Vec::new();

        while let Some((lo, hi)) = pending.pop() {
            match self.get_logs(lo, hi).await {
                Ok(logs) => events.extend(self.decode_all(&logs)),
                Err(ProviderError::RangeTooLarge(reason)) if lo < hi => {
                    let mid = lo + (hi - lo) / 2;
                    debug!(lo, hi, mid, %reason, "Provider refused range, splitting");
                    pending.push((mid + 1, hi));
                    pending.push((lo, mid));
                }
                Err(ProviderError::RangeTooLarge(reason)) => {
                    error!(block = lo, %reason, "Single block exceeds provider limits");
                    return Err(Error::RangeTooLarge { from: lo, to: hi });
                }
                Err(e) => return Err(Error::ProviderUnavailable(e.to_string())),
            }
        }

        Ok(events)
    }

    async fn get_logs(&self, lo: u64, hi: u64) -> std::result::Result<Vec<RawLog>, ProviderError> {
        let filter = LogFilter {
            address: self.config.contract,
            topic0: TRANSFER_TOPIC.to_string(),
            from_block: lo,
            to_block: hi,
        };
        self.with_retry("eth_getLogs", || self.provider.get_logs(&filter))
            .await
    }

    fn decode_all(&self, logs: &[RawLog]) -> Vec<ChainEvent> {
        logs.iter()
            .filter_map(|log| match decode_log(log) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Skipping undecodable log"
                    );
                    None
                }
            })
            .collect()
    }

    /// Run a provider call with exponential backoff on transient errors
    async fn with_retry<T, F, Fut>(
        &self,
        method: &str,
        mut call: F,
    ) -> std::result::Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match call().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!(method, attempts, "Provider call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(ProviderError::Transient(reason)) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(method, attempts, %reason, "Provider call failed, giving up");
                        return Err(ProviderError::Transient(reason));
                    }

                    let jittered = {
                        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
                        delay.mul_f64(factor)
                    };
                    warn!(
                        method,
                        attempts,
                        delay_ms = jittered.as_millis() as u64,
                        %reason,
                        "Provider call failed, retrying"
                    );
                    self.metrics.provider_retries.inc();
                    tokio::time::sleep(jittered).await;

                    // Exponential backoff
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
                Err(other) => return Err(other),
            }
        }
    }
}
