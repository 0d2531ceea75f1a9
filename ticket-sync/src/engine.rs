//! Reconciliation Engine
//!
//! Advances the ledger from the persisted cursor `C` to the confirmed head
//! `T = head - confirmation_depth`, one sub-batch of `batch_blocks` at a time:
//!
//! ```text
//! (C, T] -> [sub-batch] -> fetch -> apply in order -> store cursor -> [next]
//! ```
//!
//! Every event is applied as a compare-and-swap on the ticket record and only
//! when it lies after the record's last applied position, so replaying a range
//! is a no-op. Applied state is never rolled back: reorganisations are expected
//! to stay within `confirmation_depth`, which keeps orphaned blocks from being
//! applied in the first place.

use crate::config::SyncConfig;
use crate::metrics::Metrics;
use crate::provider::ChainProvider;
use crate::reader::{split_range, ChainEventReader};
use crate::report::{Inconsistency, InconsistencyKind, InconsistencyReporter};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use ticket_ledger::{
    ChainEvent, EventKind, SyncCursor, TicketRecord, TicketStatus, TicketStore,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Cursor after the pass
    pub confirmed_block: u64,

    /// Events that changed a record
    pub applied: usize,

    /// Events already covered by a record
    pub skipped: usize,

    /// Inconsistencies found during the pass
    pub inconsistencies: Vec<Inconsistency>,
}

/// What applying one event to the current record amounts to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// Compare-and-swap `record` against `expected` block
    Write {
        expected: Option<u64>,
        record: TicketRecord,
    },
    /// Event at or before the record's last applied position
    Skip,
    /// No record yet; retry at the end of the sub-batch
    Defer,
    /// Cannot be applied
    Report(InconsistencyKind, String),
}

/// Decide how `event` changes `current`
fn plan(event: &ChainEvent, current: Option<&TicketRecord>) -> Step {
    let current = match current {
        Some(record) if event.position() <= record.last_applied_position() => {
            return Step::Skip
        }
        Some(record) => record,
        None if event.kind == EventKind::Mint => {
            return Step::Write {
                expected: None,
                record: TicketRecord::minted(event),
            }
        }
        None => return Step::Defer,
    };

    let mut next = current.clone();
    next.last_applied_block = event.block_number;
    next.last_applied_log_index = event.log_index;

    match event.kind {
        EventKind::Mint if current.is_active() => {
            return Step::Report(
                InconsistencyKind::DuplicateMint,
                format!(
                    "ticket already active for {} since block {}",
                    current.owner, current.last_applied_block
                ),
            )
        }
        EventKind::Mint => next = TicketRecord::minted(event),
        EventKind::Transfer => next.owner = event.to,
        // Already redeemed: only the position moves
        EventKind::Redeem if !current.is_active() => {}
        EventKind::Redeem => {
            next.owner = event.to;
            next.status = TicketStatus::Redeemed;
        }
    }

    Step::Write {
        expected: Some(current.last_applied_block),
        record: next,
    }
}

/// Per-event result
enum Applied {
    Changed,
    Skipped,
    Deferred,
    Inconsistent(Inconsistency),
}

/// Reconciles the ticket ledger with the chain
pub struct ReconciliationEngine<S, P> {
    store: Arc<S>,
    reader: ChainEventReader<P>,
    config: SyncConfig,
    reporter: Arc<dyn InconsistencyReporter>,
    metrics: Metrics,
    run_lock: Mutex<()>,
}

impl<S: TicketStore, P: ChainProvider> ReconciliationEngine<S, P> {
    /// Create new engine
    pub fn new(
        store: Arc<S>,
        reader: ChainEventReader<P>,
        config: SyncConfig,
        reporter: Arc<dyn InconsistencyReporter>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            reader,
            config,
            reporter,
            metrics,
            run_lock: Mutex::new(()),
        }
    }

    /// Ledger store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Sync configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one sync pass, waiting for any pass already in flight
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let _guard = self.run_lock.lock().await;
        self.timed_pass().await
    }

    /// Run one sync pass, or fail with [`Error::SyncInProgress`]
    pub async fn try_sync(&self) -> Result<SyncOutcome> {
        let _guard = self.run_lock.try_lock().map_err(|_| Error::SyncInProgress)?;
        self.timed_pass().await
    }

    /// Run one sync pass bounded by `deadline`.
    ///
    /// Sub-batches completed before the deadline stay applied and
    /// checkpointed; the in-flight one leaves the cursor untouched.
    pub async fn sync_with_deadline(&self, deadline: Duration) -> Result<SyncOutcome> {
        match tokio::time::timeout(deadline, self.sync()).await {
            Ok(result) => result,
            Err(_) => {
                let millis = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(deadline_ms = millis, "Sync pass timed out");
                self.metrics.record_pass("timeout", deadline.as_secs_f64());
                Err(Error::Timeout(millis))
            }
        }
    }

    async fn timed_pass(&self) -> Result<SyncOutcome> {
        let start = Instant::now();
        let result = self.run_pass().await;

        let label = match &result {
            Ok(_) => "ok",
            Err(Error::ProviderUnavailable(_)) | Err(Error::RangeTooLarge { .. }) => {
                "provider_error"
            }
            Err(_) => "error",
        };
        self.metrics.record_pass(label, start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(error = %e, "Sync pass failed");
        }
        result
    }

    async fn run_pass(&self) -> Result<SyncOutcome> {
        let cursor = match self.store.load_cursor()? {
            Some(cursor) => cursor,
            None => {
                let cursor = SyncCursor::new(self.config.start_block);
                self.store.store_cursor(cursor)?;
                info!(start_block = self.config.start_block, "Initialised sync cursor");
                cursor
            }
        };

        let mut outcome = SyncOutcome {
            confirmed_block: cursor.last_confirmed_block,
            ..SyncOutcome::default()
        };
        self.metrics.set_confirmed_block(outcome.confirmed_block);

        let head = self.reader.chain_head().await?;
        let target = head.saturating_sub(self.config.confirmation_depth);
        if target <= outcome.confirmed_block {
            debug!(
                head,
                confirmed_block = outcome.confirmed_block,
                "No newly confirmed blocks"
            );
            return Ok(outcome);
        }

        info!(
            head,
            from_block = outcome.confirmed_block + 1,
            to_block = target,
            "Starting sync pass"
        );

        for (lo, hi) in split_range(outcome.confirmed_block + 1, target, self.config.batch_blocks) {
            let events = self.reader.fetch_events(lo, hi).await?;
            self.apply_batch(&events, &mut outcome)?;

            self.store.store_cursor(SyncCursor::new(hi))?;
            outcome.confirmed_block = hi;
            self.metrics.set_confirmed_block(hi);
            debug!(from_block = lo, to_block = hi, events = events.len(), "Sub-batch applied");
        }

        info!(
            confirmed_block = outcome.confirmed_block,
            applied = outcome.applied,
            skipped = outcome.skipped,
            inconsistencies = outcome.inconsistencies.len(),
            "Sync pass complete"
        );

        Ok(outcome)
    }

    fn apply_batch(&self, events: &[ChainEvent], outcome: &mut SyncOutcome) -> Result<()> {
        let mut deferred = Vec::new();

        for event in events {
            match self.apply_event(event, true)? {
                Applied::Deferred => {
                    debug!(
                        ticket_id = %event.ticket_id,
                        block = event.block_number,
                        "Deferring event for unknown ticket"
                    );
                    deferred.push(event);
                }
                applied => self.tally(applied, outcome),
            }
        }

        for event in deferred {
            let applied = self.apply_event(event, false)?;
            self.tally(applied, outcome);
        }

        Ok(())
    }

    fn tally(&self, applied: Applied, outcome: &mut SyncOutcome) {
        match applied {
            Applied::Changed => {
                outcome.applied += 1;
                self.metrics.events_applied.inc();
            }
            Applied::Skipped | Applied::Deferred => {
                outcome.skipped += 1;
                self.metrics.events_skipped.inc();
            }
            Applied::Inconsistent(inconsistency) => {
                self.reporter.report(&inconsistency);
                self.metrics.record_inconsistency(inconsistency.kind.as_str());
                outcome.inconsistencies.push(inconsistency);
            }
        }
    }

    /// Apply one event, re-reading the record after each lost race
    fn apply_event(&self, event: &ChainEvent, may_defer: bool) -> Result<Applied> {
        let mut conflicts = 0;

        loop {
            let current = self.store.find(&event.ticket_id)?;

            let (expected, record) = match plan(event, current.as_ref()) {
                Step::Write { expected, record } => (expected, record),
                Step::Defer if may_defer => return Ok(Applied::Deferred),
                Step::Defer => {
                    return Ok(Applied::Inconsistent(Inconsistency::new(
                        InconsistencyKind::UnknownTicket,
                        event.clone(),
                        format!("{} for a ticket that was never minted", event.kind),
                    )))
                }
                // Retried after deferral: the record only exists because of a later mint
                Step::Skip if !may_defer => {
                    let minted_at = current.as_ref().map_or(0, |r| r.last_applied_block);
                    return Ok(Applied::Inconsistent(Inconsistency::new(
                        InconsistencyKind::UnknownTicket,
                        event.clone(),
                        format!(
                            "{} before the ticket was minted (record at block {})",
                            event.kind, minted_at
                        ),
                    )));
                }
                Step::Skip => return Ok(Applied::Skipped),
                Step::Report(kind, detail) => {
                    return Ok(Applied::Inconsistent(Inconsistency::new(
                        kind,
                        event.clone(),
                        detail,
                    )))
                }
            };

            match self.store.conditional_update(&event.ticket_id, expected, &record) {
                Ok(()) => return Ok(Applied::Changed),
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    if conflicts > self.config.conflict_retries {
                        let err = Error::StoreConflict(event.ticket_id.to_string());
                        return Ok(Applied::Inconsistent(Inconsistency::new(
                            InconsistencyKind::ConflictExhausted,
                            event.clone(),
                            format!("{} after {} attempts", err, conflicts),
                        )));
                    }
                    debug!(
                        ticket_id = %event.ticket_id,
                        conflicts,
                        "Conditional update conflicted, re-reading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderConfig;
    use crate::report::ChannelReporter;
    use crate::testing::{address, transfer_log, ScriptedProvider, TEST_CONTRACT};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use ticket_ledger::{Address, MemoryStore, TicketId};

    fn sync_config() -> SyncConfig {
        SyncConfig {
            start_block: 0,
            confirmation_depth: 0,
            batch_blocks: 100,
            conflict_retries: 2,
            ..SyncConfig::default()
        }
    }

    fn engine<S: TicketStore>(
        store: Arc<S>,
        provider: Arc<ScriptedProvider>,
        config: SyncConfig,
    ) -> ReconciliationEngine<S, ScriptedProvider> {
        let metrics = Metrics::new().unwrap();
        let reader = ChainEventReader::new(
            provider,
            ReaderConfig {
                contract: TEST_CONTRACT.parse().unwrap(),
                max_block_range: 50,
                max_parallel_requests: 2,
                max_retry_attempts: 2,
                initial_retry_delay: Duration::from_millis(10),
                max_retry_delay: Duration::from_millis(20),
            },
            metrics.clone(),
        );
        ReconciliationEngine::new(
            store,
            reader,
            config,
            Arc::new(crate::report::TracingReporter),
            metrics,
        )
    }

    fn ticket(token: u64) -> TicketId {
        TicketId::new(format!("0x{:x}", token))
    }

    fn record(store: &MemoryStore, token: u64) -> TicketRecord {
        store.get(&ticket(token)).unwrap()
    }

    /// Store that loses the first `conflicts` races, or fails writes outright
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        conflicts: AtomicU32,
        broken: AtomicBool,
    }

    impl TicketStore for FlakyStore {
        fn get(&self, ticket_id: &TicketId) -> ticket_ledger::Result<TicketRecord> {
            self.inner.get(ticket_id)
        }

        fn conditional_update(
            &self,
            ticket_id: &TicketId,
            expected_block: Option<u64>,
            new_record: &TicketRecord,
        ) -> ticket_ledger::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(ticket_ledger::Error::Storage("disk full".to_string()));
            }
            let lose = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Err(ticket_ledger::Error::Conflict {
                    ticket_id: ticket_id.to_string(),
                    expected: expected_block,
                    actual: Some(u64::MAX),
                });
            }
            self.inner.conditional_update(ticket_id, expected_block, new_record)
        }

        fn list_by_owner(&self, owner: &Address) -> ticket_ledger::Result<Vec<TicketRecord>> {
            self.inner.list_by_owner(owner)
        }

        fn load_cursor(&self) -> ticket_ledger::Result<Option<SyncCursor>> {
            self.inner.load_cursor()
        }

        fn store_cursor(&self, cursor: SyncCursor) -> ticket_ledger::Result<()> {
            self.inner.store_cursor(cursor)
        }
    }

    #[tokio::test]
    async fn test_mint_transfer_redeem_in_order() {
        let provider = Arc::new(ScriptedProvider::new(20));
        // Pushed out of order; the reader sorts
        provider.push_log(transfer_log(2, 0, 5, 15, 0));
        provider.push_log(transfer_log(0, 1, 5, 10, 0));
        provider.push_log(transfer_log(1, 2, 5, 12, 0));

        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), provider, sync_config());
        let outcome = engine.sync().await.unwrap();

        assert_eq!(outcome.confirmed_block, 20);
        assert_eq!(outcome.applied, 3);
        assert!(outcome.inconsistencies.is_empty());

        let r = record(&store, 5);
        assert_eq!(r.owner, address(2));
        assert_eq!(r.status, TicketStatus::Redeemed);
        assert_eq!(r.last_applied_block, 15);
        assert_eq!(store.load_cursor().unwrap(), Some(SyncCursor::new(20)));
        assert_eq!(engine.metrics().confirmed_block.get(), 20);
    }

    #[tokio::test]
    async fn test_events_in_one_block_all_apply() {
        let provider = Arc::new(ScriptedProvider::new(10));
        provider.push_log(transfer_log(0, 1, 3, 10, 0));
        provider.push_log(transfer_log(1, 2, 3, 10, 1));
        provider.push_log(transfer_log(2, 4, 3, 10, 2));

        let store = Arc::new(MemoryStore::new());
        engine(store.clone(), provider, sync_config()).sync().await.unwrap();

        let r = record(&store, 3);
        assert_eq!(r.owner, address(4));
        assert_eq!(r.last_applied_position(), (10, 2));
    }

    #[tokio::test]
    async fn test_replaying_a_range_changes_nothing() {
        let provider = Arc::new(ScriptedProvider::new(30));
        provider.push_log(transfer_log(0, 1, 1, 10, 0));
        provider.push_log(transfer_log(1, 2, 1, 12, 0));
        provider.push_log(transfer_log(0, 3, 2, 14, 0));

        let first = Arc::new(MemoryStore::new());
        engine(first.clone(), provider.clone(), sync_config()).sync().await.unwrap();

        // Records written but the cursor lost, as after a crash mid-pass
        let second = Arc::new(MemoryStore::new());
        for r in first.records() {
            second.conditional_update(&r.ticket_id, None, &r).unwrap();
        }
        let outcome = engine(second.clone(), provider, sync_config()).sync().await.unwrap();

        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.skipped, 3);
        assert_eq!(second.records(), first.records());
    }

    #[tokio::test]
    async fn test_reorg_inside_confirmation_depth() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(0, 1, 8, 10, 0));
        provider.push_log(transfer_log(1, 2, 8, 18, 0));

        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            confirmation_depth: 5,
            ..sync_config()
        };
        let engine = engine(store.clone(), provider.clone(), config);

        let outcome = engine.sync().await.unwrap();
        assert_eq!(outcome.confirmed_block, 15);
        assert_eq!(record(&store, 8).owner, address(1));

        // Block 18 is orphaned; the canonical chain moves the ticket elsewhere
        provider.replace_logs(vec![
            transfer_log(0, 1, 8, 10, 0),
            transfer_log(1, 3, 8, 17, 0),
        ]);
        provider.set_head(25);

        let outcome = engine.sync().await.unwrap();
        assert_eq!(outcome.confirmed_block, 20);
        assert_eq!(record(&store, 8).owner, address(3));
        assert_eq!(record(&store, 8).last_applied_block, 17);
    }

    #[tokio::test]
    async fn test_inconsistent_event_does_not_stop_the_pass() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(0, 1, 1, 10, 0));
        provider.push_log(transfer_log(0, 2, 2, 11, 0));
        provider.push_log(transfer_log(0, 4, 1, 12, 0));
        provider.push_log(transfer_log(1, 2, 1, 13, 0));
        provider.push_log(transfer_log(2, 3, 2, 14, 0));

        let store = Arc::new(MemoryStore::new());
        let (reporter, mut reports) = ChannelReporter::new(16);
        let mut engine = engine(store.clone(), provider, sync_config());
        engine.reporter = Arc::new(reporter);

        let outcome = engine.sync().await.unwrap();
        assert_eq!(outcome.applied, 4);
        assert_eq!(outcome.inconsistencies.len(), 1);
        assert_eq!(outcome.inconsistencies[0].kind, InconsistencyKind::DuplicateMint);
        assert_eq!(outcome.inconsistencies[0].event.block_number, 12);
        assert_eq!(outcome.confirmed_block, 20);

        assert_eq!(record(&store, 1).owner, address(2));
        assert_eq!(record(&store, 2).owner, address(3));

        let reported = reports.try_recv().unwrap();
        assert_eq!(reported.id, outcome.inconsistencies[0].id);
        assert_eq!(
            engine
                .metrics()
                .inconsistencies
                .with_label_values(&["duplicate_mint"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_reported_and_dropped() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(1, 2, 9, 11, 0));
        provider.push_log(transfer_log(2, 0, 9, 12, 0));

        let store = Arc::new(MemoryStore::new());
        let outcome = engine(store.clone(), provider, sync_config()).sync().await.unwrap();

        assert_eq!(outcome.inconsistencies.len(), 2);
        assert!(outcome
            .inconsistencies
            .iter()
            .all(|i| i.kind == InconsistencyKind::UnknownTicket));
        assert!(store.is_empty());
        assert_eq!(outcome.confirmed_block, 20);
    }

    #[tokio::test]
    async fn test_transfer_before_mint_reported_regardless_of_batching() {
        let mut outcomes = Vec::new();
        for batch_blocks in [100, 5] {
            let provider = Arc::new(ScriptedProvider::new(20));
            provider.push_log(transfer_log(1, 2, 9, 4, 0));
            provider.push_log(transfer_log(0, 1, 9, 8, 0));

            let store = Arc::new(MemoryStore::new());
            let config = SyncConfig {
                batch_blocks,
                ..sync_config()
            };
            let outcome = engine(store.clone(), provider, config).sync().await.unwrap();
            assert_eq!(record(&store, 9).owner, address(1));
            outcomes.push(outcome);
        }

        for outcome in &outcomes {
            assert_eq!(outcome.applied, 1);
            assert_eq!(outcome.skipped, 0);
            let kinds: Vec<_> = outcome.inconsistencies.iter().map(|i| i.kind).collect();
            assert_eq!(kinds, vec![InconsistencyKind::UnknownTicket]);
            assert_eq!(outcome.inconsistencies[0].event.block_number, 4);
        }
    }

    #[test]
    fn test_plan_defers_unknown_ticket() {
        let event = ChainEvent {
            ticket_id: ticket(9),
            kind: EventKind::Transfer,
            from: Some(address(1)),
            to: address(2),
            block_number: 11,
            log_index: 0,
            tx_hash: ticket_ledger::TxHash::from_bytes([0u8; 32]),
        };
        assert_eq!(plan(&event, None), Step::Defer);
    }

    #[tokio::test]
    async fn test_redeem_is_idempotent_and_remint_reactivates() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(0, 1, 6, 10, 0));
        provider.push_log(transfer_log(1, 0, 6, 12, 0));
        provider.push_log(transfer_log(1, 0, 6, 14, 0));

        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), provider.clone(), sync_config());
        engine.sync().await.unwrap();

        let r = record(&store, 6);
        assert_eq!(r.status, TicketStatus::Redeemed);
        assert_eq!(r.owner, address(1));
        assert_eq!(r.last_applied_block, 14);

        provider.push_log(transfer_log(0, 5, 6, 22, 0));
        provider.set_head(25);
        let outcome = engine.sync().await.unwrap();
        assert!(outcome.inconsistencies.is_empty());

        let r = record(&store, 6);
        assert_eq!(r.status, TicketStatus::Active);
        assert_eq!(r.owner, address(5));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(0, 1, 1, 10, 0));

        let store = Arc::new(FlakyStore::default());
        store.conflicts.store(2, Ordering::SeqCst);
        let outcome = engine(store.clone(), provider, sync_config()).sync().await.unwrap();

        assert_eq!(outcome.applied, 1);
        assert!(outcome.inconsistencies.is_empty());
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_conflicts_are_reported() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(0, 1, 1, 10, 0));
        provider.push_log(transfer_log(0, 1, 2, 11, 0));

        let store = Arc::new(FlakyStore::default());
        // Retries for the first mint (1 + conflict_retries attempts) all lose
        store.conflicts.store(3, Ordering::SeqCst);
        let outcome = engine(store.clone(), provider, sync_config()).sync().await.unwrap();

        assert_eq!(outcome.inconsistencies.len(), 1);
        assert_eq!(outcome.inconsistencies[0].kind, InconsistencyKind::ConflictExhausted);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.confirmed_block, 20);
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(0, 1, 1, 10, 0));

        let store = Arc::new(FlakyStore::default());
        store.broken.store(true, Ordering::SeqCst);
        let result = engine(store.clone(), provider, sync_config()).sync().await;

        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(store.load_cursor().unwrap(), Some(SyncCursor::new(0)));
    }

    #[tokio::test]
    async fn test_nothing_to_do_below_confirmation_depth() {
        let provider = Arc::new(ScriptedProvider::new(5));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            confirmation_depth: 12,
            ..sync_config()
        };

        let outcome = engine(store, provider.clone(), config).sync().await.unwrap();
        assert_eq!(outcome, SyncOutcome::default());
        assert_eq!(provider.get_logs_calls(), 0);
    }

    #[tokio::test]
    async fn test_cursor_initialised_to_start_block() {
        let provider = Arc::new(ScriptedProvider::new(90));
        provider.push_log(transfer_log(0, 1, 1, 50, 0));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            start_block: 100,
            ..sync_config()
        };

        let outcome = engine(store.clone(), provider.clone(), config).sync().await.unwrap();
        assert_eq!(outcome.confirmed_block, 100);
        assert_eq!(store.load_cursor().unwrap(), Some(SyncCursor::new(100)));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_outage_keeps_completed_sub_batches() {
        let provider = Arc::new(ScriptedProvider::new(35));
        provider.push_log(transfer_log(0, 1, 1, 5, 0));
        provider.push_log(transfer_log(1, 2, 1, 25, 0));
        provider.set_unavailable_from(21);

        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            batch_blocks: 10,
            ..sync_config()
        };
        let engine = engine(store.clone(), provider.clone(), config);

        assert!(matches!(engine.sync().await, Err(Error::ProviderUnavailable(_))));
        assert_eq!(store.load_cursor().unwrap(), Some(SyncCursor::new(20)));
        assert_eq!(record(&store, 1).owner, address(1));
        assert_eq!(
            engine.metrics().sync_passes.with_label_values(&["provider_error"]).get(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_leaves_cursor_untouched() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.push_log(transfer_log(0, 1, 1, 10, 0));
        provider.set_latency(Duration::from_secs(10));

        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), provider, sync_config());

        let result = engine.sync_with_deadline(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Timeout(1000))));
        assert_eq!(store.load_cursor().unwrap(), Some(SyncCursor::new(0)));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_sync_refuses_concurrent_pass() {
        let provider = Arc::new(ScriptedProvider::new(20));
        provider.set_latency(Duration::from_secs(1));
        let engine = engine(Arc::new(MemoryStore::new()), provider, sync_config());

        let running = engine.sync();
        tokio::pin!(running);
        tokio::select! {
            biased;
            _ = &mut running => panic!("pass finished before it was observed"),
            _ = tokio::task::yield_now() => {}
        }

        assert!(matches!(engine.try_sync().await, Err(Error::SyncInProgress)));
        assert_eq!(running.await.unwrap().confirmed_block, 20);
        assert_eq!(engine.try_sync().await.unwrap().confirmed_block, 20);
    }
}
