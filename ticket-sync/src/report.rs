//! Inconsistency reporting
//!
//! Data inconsistencies never fail a sync pass. They are handed to an
//! [`InconsistencyReporter`] (the operator channel) and returned in the
//! pass outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ticket_ledger::ChainEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Kind of data inconsistency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// Mint for a ticket that is already active
    DuplicateMint,
    /// Transfer or redeem for a ticket that was never minted
    UnknownTicket,
    /// Conditional update kept conflicting
    ConflictExhausted,
}

impl InconsistencyKind {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            InconsistencyKind::DuplicateMint => "duplicate_mint",
            InconsistencyKind::UnknownTicket => "unknown_ticket",
            InconsistencyKind::ConflictExhausted => "conflict_exhausted",
        }
    }
}

impl fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reported inconsistency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inconsistency {
    /// Report ID
    pub id: Uuid,

    /// What went wrong
    pub kind: InconsistencyKind,

    /// Event that could not be applied
    pub event: ChainEvent,

    /// Human-readable detail
    pub detail: String,

    /// Detection time
    pub detected_at: DateTime<Utc>,
}

impl Inconsistency {
    /// New report for `event`
    pub fn new(kind: InconsistencyKind, event: ChainEvent, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            event,
            detail: detail.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Operator channel for inconsistencies
pub trait InconsistencyReporter: Send + Sync {
    /// Deliver one report. Must not block.
    fn report(&self, inconsistency: &Inconsistency);
}

/// Reports through structured `warn!` logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl InconsistencyReporter for TracingReporter {
    fn report(&self, inconsistency: &Inconsistency) {
        let event = &inconsistency.event;
        warn!(
            report_id = %inconsistency.id,
            kind = %inconsistency.kind,
            ticket_id = %event.ticket_id,
            event_kind = %event.kind,
            block = event.block_number,
            log_index = event.log_index,
            tx_hash = %event.tx_hash,
            detail = %inconsistency.detail,
            "Ticket data inconsistency"
        );
    }
}

/// Forwards reports to an operator task over a bounded queue
///
/// When the queue is full or the operator task is gone, the report goes to
/// the log instead.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::Sender<Inconsistency>,
}

impl ChannelReporter {
    /// Reporter plus the receiving end for the operator task
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Inconsistency>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl InconsistencyReporter for ChannelReporter {
    fn report(&self, inconsistency: &Inconsistency) {
        match self.sender.try_send(inconsistency.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(report_id = %inconsistency.id, "Operator queue full");
                TracingReporter.report(inconsistency);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                TracingReporter.report(inconsistency);
            }
        }
    }
}
