//! In-memory ticket store
//!
//! Same contract as the RocksDB [`Storage`](crate::Storage), without
//! durability. Each record is replaced whole under the lock, so readers observe
//! either the old or the new version.

use crate::{
    error::{Error, Result},
    store::{check_cursor, check_update, TicketStore},
    types::{Address, SyncCursor, TicketId, TicketRecord},
};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Inner {
    tickets: BTreeMap<TicketId, TicketRecord>,
    cursor: Option<SyncCursor>,
}

/// Process-local ticket store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets
    pub fn len(&self) -> usize {
        self.inner.read().tickets.len()
    }

    /// Whether no ticket has been stored
    pub fn is_empty(&self) -> bool {
        self.inner.read().tickets.is_empty()
    }

    /// Every stored record, ordered by ticket id
    pub fn records(&self) -> Vec<TicketRecord> {
        self.inner.read().tickets.values().cloned().collect()
    }
}

impl TicketStore for MemoryStore {
    fn get(&self, ticket_id: &TicketId) -> Result<TicketRecord> {
        self.inner
            .read()
            .tickets
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(ticket_id.to_string()))
    }

    fn conditional_update(
        &self,
        ticket_id: &TicketId,
        expected_block: Option<u64>,
        new_record: &TicketRecord,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        check_update(
            ticket_id,
            inner.tickets.get(ticket_id),
            expected_block,
            new_record,
        )?;
        inner.tickets.insert(ticket_id.clone(), new_record.clone());
        Ok(())
    }

    fn list_by_owner(&self, owner: &Address) -> Result<Vec<TicketRecord>> {
        Ok(self
            .inner
            .read()
            .tickets
            .values()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect())
    }

    fn load_cursor(&self) -> Result<Option<SyncCursor>> {
        Ok(self.inner.read().cursor)
    }

    fn store_cursor(&self, cursor: SyncCursor) -> Result<()> {
        let mut inner = self.inner.write();
        check_cursor(inner.cursor, cursor)?;
        inner.cursor = Some(cursor);
        Ok(())
    }
}
