//! Ticket Ledger Store contract
//!
//! All operations are point operations. Reconciliation applies one event at a
//! time, conditioning each write on the block the record was last read at, so
//! no cross-ticket transaction is needed.
//!
//! Implementations must guarantee read-after-write visibility for a completed
//! [`TicketStore::conditional_update`], and must never expose a record
//! half-written to a concurrent reader.

use crate::{
    error::{Error, Result},
    types::{Address, SyncCursor, TicketId, TicketRecord},
};

/// Persistent mapping from ticket id to ownership record, plus the sync cursor
pub trait TicketStore: Send + Sync {
    /// Get a record, or [`Error::NotFound`]
    fn get(&self, ticket_id: &TicketId) -> Result<TicketRecord>;

    /// Compare-and-swap write of a record.
    ///
    /// `expected_block` is `None` when the caller expects the ticket to be
    /// absent, otherwise the `last_applied_block` the caller read. Returns
    /// [`Error::Conflict`] when the stored state differs, or when the new
    /// record does not move past the stored `(block, log_index)` position.
    fn conditional_update(
        &self,
        ticket_id: &TicketId,
        expected_block: Option<u64>,
        new_record: &TicketRecord,
    ) -> Result<()>;

    /// All records currently held by `owner`, ordered by ticket id
    fn list_by_owner(&self, owner: &Address) -> Result<Vec<TicketRecord>>;

    /// Load the persisted sync cursor, if any
    fn load_cursor(&self) -> Result<Option<SyncCursor>>;

    /// Persist the sync cursor. Regressing the cursor is rejected.
    fn store_cursor(&self, cursor: SyncCursor) -> Result<()>;

    /// Get a record, mapping [`Error::NotFound`] to `None`
    fn find(&self, ticket_id: &TicketId) -> Result<Option<TicketRecord>> {
        match self.get(ticket_id) {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Validate a compare-and-swap against the currently stored record.
///
/// Shared by every store so the conflict and monotonicity rules are identical.
pub(crate) fn check_update(
    ticket_id: &TicketId,
    current: Option<&TicketRecord>,
    expected_block: Option<u64>,
    new_record: &TicketRecord,
) -> Result<()> {
    if &new_record.ticket_id != ticket_id {
        return Err(Error::InvariantViolation(format!(
            "record for {} written under key {}",
            new_record.ticket_id, ticket_id
        )));
    }

    let actual = current.map(|r| r.last_applied_block);
    if actual != expected_block {
        return Err(Error::Conflict {
            ticket_id: ticket_id.to_string(),
            expected: expected_block,
            actual,
        });
    }

    if let Some(current) = current {
        if new_record.last_applied_block < current.last_applied_block {
            return Err(Error::InvariantViolation(format!(
                "ticket {} block would regress from {} to {}",
                ticket_id, current.last_applied_block, new_record.last_applied_block
            )));
        }

        // Same block, but another writer already got to this log index
        if new_record.last_applied_position() <= current.last_applied_position() {
            return Err(Error::Conflict {
                ticket_id: ticket_id.to_string(),
                expected: expected_block,
                actual,
            });
        }
    }

    Ok(())
}

/// Reject cursor regression
pub(crate) fn check_cursor(current: Option<SyncCursor>, next: SyncCursor) -> Result<()> {
    match current {
        Some(current) if next.last_confirmed_block < current.last_confirmed_block => {
            Err(Error::InvariantViolation(format!(
                "sync cursor would regress from {} to {}",
                current.last_confirmed_block, next.last_confirmed_block
            )))
        }
        _ => Ok(()),
    }
}
