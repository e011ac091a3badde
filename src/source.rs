// 🔌 Deal Record Source - where deals come from and where status writes go
//
// The dashboard core only needs three calls from its data layer:
//   fetch_deals               → the whole collection, joined names included
//   lookup_status_id_by_name  → destination column name → status id
//   update_deal_status        → write that id onto one deal
//
// `db::SqliteDealStore` is the production implementation. `InMemoryDealSource`
// keeps everything in memory and can be told to fail, which is what the
// Kanban tests and demos run against.

use crate::db::{Deal, NamedRef};
use crate::entities::{Status, StatusRegistry};
use crate::error::{FetchError, PersistenceError, StatusLookupError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

#[async_trait]
pub trait DealSource: Send + Sync {
    /// Full deal collection with status/company/person names joined in.
    async fn fetch_deals(&self) -> Result<Vec<Deal>, FetchError>;

    /// Status id for an exact status name; `Ok(None)` when no status has that name.
    async fn lookup_status_id_by_name(&self, name: &str) -> Result<Option<String>, StatusLookupError>;

    /// Point one deal at a status id.
    async fn update_deal_status(&self, deal_id: &str, status_id: &str) -> Result<(), PersistenceError>;
}

// ============================================================================
// IN-MEMORY SOURCE
// ============================================================================

/// Call counters, useful for asserting which collaborators a flow touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCalls {
    pub fetches: usize,
    pub lookups: usize,
    pub updates: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryDealSource {
    deals: RwLock<Vec<Deal>>,
    statuses: StatusRegistry,
    fail_fetch: AtomicBool,
    fail_lookup: AtomicBool,
    fail_update: AtomicBool,
    fetches: AtomicUsize,
    lookups: AtomicUsize,
    updates: AtomicUsize,
}

impl InMemoryDealSource {
    /// Source holding `deals`; every status name they mention becomes a
    /// registered status.
    pub fn new(deals: Vec<Deal>) -> Self {
        let statuses = StatusRegistry::new();
        for deal in &deals {
            if let Some(status) = &deal.status {
                if statuses.find_by_name(&status.name).is_none() {
                    statuses.register(Status::named(&status.name));
                }
            }
        }

        InMemoryDealSource {
            deals: RwLock::new(deals),
            statuses,
            ..Default::default()
        }
    }

    /// Register an extra status (e.g. an empty column)
    pub fn with_status(self, name: &str) -> Self {
        if self.statuses.find_by_name(name).is_none() {
            self.statuses.register(Status::named(name));
        }
        self
    }

    pub fn statuses(&self) -> &StatusRegistry {
        &self.statuses
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> SourceCalls {
        SourceCalls {
            fetches: self.fetches.load(Ordering::SeqCst),
            lookups: self.lookups.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
        }
    }

    /// Current stored status name of a deal (bypasses call counting)
    pub fn status_of(&self, deal_id: &str) -> Option<String> {
        self.deals
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|deal| deal.id == deal_id)
            .and_then(|deal| deal.status.as_ref().map(|s| s.name.clone()))
    }
}

#[async_trait]
impl DealSource for InMemoryDealSource {
    async fn fetch_deals(&self) -> Result<Vec<Deal>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FetchError::Storage("deal source offline".to_string()));
        }

        Ok(self
            .deals
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn lookup_status_id_by_name(&self, name: &str) -> Result<Option<String>, StatusLookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(StatusLookupError::Storage("status lookup unavailable".to_string()));
        }

        Ok(self.statuses.get_id(name))
    }

    async fn update_deal_status(&self, deal_id: &str, status_id: &str) -> Result<(), PersistenceError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(PersistenceError::Storage("write rejected".to_string()));
        }

        let status = self
            .statuses
            .find_by_id(status_id)
            .ok_or_else(|| PersistenceError::Storage(format!("unknown status id '{}'", status_id)))?;

        let mut deals = self
            .deals
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let deal = deals
            .iter_mut()
            .find(|deal| deal.id == deal_id)
            .ok_or_else(|| PersistenceError::DealNotFound(deal_id.to_string()))?;

        deal.status = Some(NamedRef::new(status.name));
        Ok(())
    }
}
