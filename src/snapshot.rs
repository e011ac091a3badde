// 📸 Deal Snapshots - the collection every view reads from
//
// "A snapshot is a value. Reconciliation replaces the value; nobody edits it."
//
// The cache holds at most one `Arc<DealSnapshot>`. Views clone the Arc and
// read without locks; a reconciliation installs a brand-new snapshot with a
// higher generation number. Nothing ever mutates a deal inside a snapshot,
// which is what keeps the Kanban board pessimistic: the only way a card moves
// is a fresh fetch after a confirmed write.
//
// Invalidation bumps an epoch. A fetch that started before the latest
// invalidation may predate the write that caused it, so its result is thrown
// away and the fetch is repeated.

use crate::db::Deal;
use crate::error::FetchError;
use crate::shaping::ShapeReport;
use crate::source::DealSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Fetches repeated at most this many times when invalidations keep racing them
const MAX_FETCH_ATTEMPTS: usize = 3;

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DealSnapshot {
    /// Monotonically increasing per cache
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
    /// SHA-256 over the deal content, hex encoded
    pub fingerprint: String,
    #[serde(skip)]
    deals: Vec<Deal>,
}

impl DealSnapshot {
    pub fn new(generation: u64, deals: Vec<Deal>) -> Self {
        DealSnapshot {
            generation,
            fetched_at: Utc::now(),
            fingerprint: fingerprint(&deals),
            deals,
        }
    }

    pub fn deals(&self) -> &[Deal] {
        &self.deals
    }

    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }

    pub fn find(&self, deal_id: &str) -> Option<&Deal> {
        self.deals.iter().find(|deal| deal.id == deal_id)
    }

    /// Two snapshots with the same fingerprint render identically
    pub fn same_content(&self, other: &DealSnapshot) -> bool {
        self.fingerprint == other.fingerprint
    }
}

fn fingerprint(deals: &[Deal]) -> String {
    let mut hasher = Sha256::new();
    for deal in deals {
        hasher.update(format!(
            "{}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}\n",
            deal.id,
            deal.status,
            deal.value.map(f64::to_bits),
            deal.created_at,
            deal.closed_at,
            deal.company,
            deal.person,
            deal.deal_code,
        ));
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug)]
struct CacheState {
    current: Option<Arc<DealSnapshot>>,
    stale: bool,
    epoch: u64,
    next_generation: u64,
    last_error: Option<FetchError>,
}

/// Holder of the current deal snapshot.
#[derive(Debug)]
pub struct DealCache {
    state: RwLock<CacheState>,
}

impl DealCache {
    pub fn new() -> Self {
        DealCache {
            state: RwLock::new(CacheState {
                current: None,
                stale: true,
                epoch: 0,
                next_generation: 1,
                last_error: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last successfully fetched snapshot, even if it has been invalidated since
    pub fn current(&self) -> Option<Arc<DealSnapshot>> {
        self.read().current.clone()
    }

    /// Current snapshot only if nothing invalidated it
    pub fn fresh(&self) -> Option<Arc<DealSnapshot>> {
        let state = self.read();
        if state.stale {
            None
        } else {
            state.current.clone()
        }
    }

    pub fn is_stale(&self) -> bool {
        self.read().stale
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Error of the most recent failed fetch, cleared by the next success
    pub fn last_error(&self) -> Option<FetchError> {
        self.read().last_error.clone()
    }

    /// Mark the collection out of date; the next `load` refetches.
    pub fn invalidate(&self) {
        let mut state = self.write();
        state.epoch += 1;
        state.stale = true;
        tracing::debug!(epoch = state.epoch, "deal collection invalidated");
    }

    /// Install a collection as the new snapshot unconditionally.
    pub fn replace(&self, deals: Vec<Deal>) -> Arc<DealSnapshot> {
        let mut state = self.write();
        let epoch = state.epoch;
        Self::install_locked(&mut state, epoch, deals)
    }

    fn install_locked(state: &mut CacheState, fetch_epoch: u64, deals: Vec<Deal>) -> Arc<DealSnapshot> {
        let report = ShapeReport::inspect(&deals);
        let snapshot = Arc::new(DealSnapshot::new(state.next_generation, deals));
        state.next_generation += 1;
        state.current = Some(Arc::clone(&snapshot));
        state.stale = state.epoch != fetch_epoch;
        state.last_error = None;

        tracing::debug!(
            generation = snapshot.generation,
            deals = snapshot.len(),
            anomalies = report.anomaly_count(),
            "installed deal snapshot"
        );
        if !report.is_clean() {
            tracing::debug!("data shape: {}", report.summary());
        }

        snapshot
    }

    /// Install a fetch result unless an invalidation raced it.
    /// `None` means the result was discarded.
    fn install(&self, fetch_epoch: u64, deals: Vec<Deal>, last_attempt: bool) -> Option<Arc<DealSnapshot>> {
        let mut state = self.write();
        if state.epoch != fetch_epoch && !last_attempt {
            tracing::debug!(
                fetch_epoch,
                epoch = state.epoch,
                "discarding fetch that raced an invalidation"
            );
            return None;
        }
        Some(Self::install_locked(&mut state, fetch_epoch, deals))
    }

    fn record_error(&self, err: &FetchError) {
        self.write().last_error = Some(err.clone());
        tracing::warn!(error = %err, "deal fetch failed");
    }

    /// Fresh snapshot, fetching only when the cache is empty or invalidated.
    pub async fn load<S: DealSource + ?Sized>(&self, source: &S) -> Result<Arc<DealSnapshot>, FetchError> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }
        self.refresh(source).await
    }

    /// Fetch and install a new snapshot regardless of staleness.
    ///
    /// On failure the previous snapshot stays in place (see `current`) and the
    /// error is returned; the two are never merged.
    pub async fn refresh<S: DealSource + ?Sized>(&self, source: &S) -> Result<Arc<DealSnapshot>, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let epoch = self.epoch();

            let deals = match source.fetch_deals().await {
                Ok(deals) => deals,
                Err(err) => {
                    self.record_error(&err);
                    return Err(err);
                }
            };

            if let Some(snapshot) = self.install(epoch, deals, attempt >= MAX_FETCH_ATTEMPTS) {
                return Ok(snapshot);
            }
        }
    }
}

impl Default for DealCache {
    fn default() -> Self {
        Self::new()
    }
}
