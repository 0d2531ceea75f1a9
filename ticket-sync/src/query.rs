//! Ticket Query Handler
//!
//! Read-only view of the ledger for upstream callers. Queries never wait for
//! or depend on a sync pass; they see each record either before or after its
//! latest update.

use crate::{Error, Result};
use std::sync::Arc;
use ticket_ledger::{Address, SyncCursor, TicketId, TicketRecord, TicketStore};
use tracing::debug;

/// Answers ownership queries from the ledger store
#[derive(Debug)]
pub struct TicketQueryHandler<S> {
    store: Arc<S>,
}

impl<S> Clone for TicketQueryHandler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn parse_owner(owner: &str) -> Result<Address> {
    owner
        .parse()
        .map_err(|_| Error::InvalidAddress(owner.to_string()))
}

impl<S: TicketStore> TicketQueryHandler<S> {
    /// Create handler over `store`
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every ticket record held by `owner`, active and redeemed, ordered by ticket id.
    ///
    /// `owner` is a hex address; case and the `0x` prefix do not matter.
    pub fn get_tickets_for_user(&self, owner: &str) -> Result<Vec<TicketRecord>> {
        let owner = parse_owner(owner)?;
        let records = self.store.list_by_owner(&owner)?;
        debug!(%owner, tickets = records.len(), "Listed tickets for user");
        Ok(records)
    }

    /// Single ticket by id
    pub fn get_ticket(&self, ticket_id: &TicketId) -> Result<Option<TicketRecord>> {
        Ok(self.store.find(ticket_id)?)
    }

    /// Number of active (unredeemed) tickets held by `owner`
    pub fn active_ticket_count(&self, owner: &str) -> Result<usize> {
        let owner = parse_owner(owner)?;
        let records = self.store.list_by_owner(&owner)?;
        Ok(records.iter().filter(|r| r.is_active()).count())
    }

    /// Last block the ledger reflects, `None` before the first sync
    pub fn sync_status(&self) -> Result<Option<SyncCursor>> {
        Ok(self.store.load_cursor()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_ledger::{MemoryStore, TicketStatus};

    fn seeded() -> TicketQueryHandler<MemoryStore> {
        let store = MemoryStore::new();
        let holder = Address::from_bytes([0xab; 20]);
        let seeds = [
            (1, TicketStatus::Active),
            (2, TicketStatus::Redeemed),
            (3, TicketStatus::Active),
        ];
        for (n, status) in seeds {
            let record = TicketRecord {
                ticket_id: TicketId::new(format!("0x{}", n)),
                owner: holder,
                status,
                last_applied_block: 10 + n,
                last_applied_log_index: 0,
            };
            store.conditional_update(&record.ticket_id, None, &record).unwrap();
        }
        TicketQueryHandler::new(Arc::new(store))
    }

    #[test]
    fn test_get_tickets_for_user_normalises_owner() {
        let handler = seeded();
        let lower = handler
            .get_tickets_for_user("0xabababababababababababababababababababab")
            .unwrap();
        let upper = handler
            .get_tickets_for_user("ABABABABABABABABABABABABABABABABABABABAB")
            .unwrap();

        assert_eq!(lower.len(), 3);
        assert_eq!(lower, upper);
        assert_eq!(lower[0].ticket_id.as_str(), "0x1");
    }

    #[test]
    fn test_unknown_owner_has_no_tickets() {
        let handler = seeded();
        let records = handler
            .get_tickets_for_user("0x0000000000000000000000000000000000000001")
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_malformed_owner() {
        let handler = seeded();
        assert!(matches!(
            handler.get_tickets_for_user("0x1234"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            handler.active_ticket_count("not an address"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_active_count_and_lookup() {
        let handler = seeded();
        assert_eq!(
            handler
                .active_ticket_count("0xabababababababababababababababababababab")
                .unwrap(),
            2
        );

        let redeemed = handler.get_ticket(&TicketId::new("0x2")).unwrap().unwrap();
        assert_eq!(redeemed.status, TicketStatus::Redeemed);
        assert!(handler.get_ticket(&TicketId::new("0x99")).unwrap().is_none());
        assert_eq!(handler.sync_status().unwrap(), None);
    }
}
