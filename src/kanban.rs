// 🗂️ Kanban Transition State Machine - moving a card between status columns
//
// "The board never moves a card. It asks storage to, and then re-reads."
//
// Two layers:
//   step()                 → pure: (state, event) → (state, effects)
//   TransitionCoordinator  → runs the effects against the deal source,
//                            the deal cache and the notifier
//
// Lifecycle of one move:
//
//   Idle ──Dropped──> Resolving ──StatusResolved──> Persisting ──DealUpdated──> Reconciling ──Reconciled──> Idle
//                        │                              │
//                        └─ StatusNotFound/LookupFailed ┴─ UpdateFailed ──> Idle (one failure notification)
//
// A drop onto the column the card came from never leaves Idle and produces no
// effects at all.

use crate::error::TransitionError;
use crate::notify::Notifier;
use crate::snapshot::DealCache;
use crate::source::DealSource;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// STATES, EVENTS, EFFECTS
// ============================================================================

/// A card dropped from `source` onto `destination` (status display names)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRequest {
    pub deal_id: String,
    pub source: String,
    pub destination: String,
}

impl TransitionRequest {
    pub fn new(deal_id: &str, source: &str, destination: &str) -> Self {
        TransitionRequest {
            deal_id: deal_id.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }

    pub fn is_same_column(&self) -> bool {
        self.source == self.destination
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransitionState {
    Idle,
    Resolving { request: TransitionRequest },
    Persisting { request: TransitionRequest, status_id: String },
    Reconciling { request: TransitionRequest, status_id: String },
}

impl TransitionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TransitionState::Idle)
    }

    pub fn request(&self) -> Option<&TransitionRequest> {
        match self {
            TransitionState::Idle => None,
            TransitionState::Resolving { request }
            | TransitionState::Persisting { request, .. }
            | TransitionState::Reconciling { request, .. } => Some(request),
        }
    }

    /// Short label for status bars
    pub fn label(&self) -> &'static str {
        match self {
            TransitionState::Idle => "idle",
            TransitionState::Resolving { .. } => "resolving",
            TransitionState::Persisting { .. } => "saving",
            TransitionState::Reconciling { .. } => "refreshing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    Dropped(TransitionRequest),
    StatusResolved(String),
    StatusNotFound,
    LookupFailed(String),
    DealUpdated,
    UpdateFailed(String),
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    LookupStatusId { name: String },
    UpdateDealStatus { deal_id: String, status_id: String },
    InvalidateDeals,
    NotifySuccess { destination: String },
    NotifyFailure { reason: String },
}

/// Advance the machine by one event.
///
/// Events that make no sense in the current state are ignored: the state is
/// returned unchanged with no effects.
pub fn step(state: TransitionState, event: TransitionEvent) -> (TransitionState, Vec<Effect>) {
    use TransitionEvent::*;
    use TransitionState::*;

    match (state, event) {
        (Idle, Dropped(request)) => {
            if request.is_same_column() {
                return (Idle, vec![]);
            }
            let name = request.destination.clone();
            (Resolving { request }, vec![Effect::LookupStatusId { name }])
        }

        (Resolving { request }, StatusResolved(status_id)) => {
            let effect = Effect::UpdateDealStatus {
                deal_id: request.deal_id.clone(),
                status_id: status_id.clone(),
            };
            (Persisting { request, status_id }, vec![effect])
        }

        (Resolving { request }, StatusNotFound) => {
            let reason = TransitionError::StatusNotFound {
                name: request.destination,
            }
            .reason();
            (Idle, vec![Effect::NotifyFailure { reason }])
        }

        (Resolving { .. }, LookupFailed(reason)) | (Persisting { .. }, UpdateFailed(reason)) => {
            (Idle, vec![Effect::NotifyFailure { reason }])
        }

        (Persisting { request, status_id }, DealUpdated) => {
            let destination = request.destination.clone();
            (
                Reconciling { request, status_id },
                vec![Effect::InvalidateDeals, Effect::NotifySuccess { destination }],
            )
        }

        (Reconciling { .. }, Reconciled) => (Idle, vec![]),

        (state, _) => (state, vec![]),
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// Storage confirmed the write and the deal cache was invalidated
    Applied {
        deal_id: String,
        destination: String,
        status_id: String,
    },
    /// Dropped on its own column
    Unchanged,
}

/// Runs transitions, at most one in flight per deal.
pub struct TransitionCoordinator<S: ?Sized, N: ?Sized> {
    source: Arc<S>,
    notifier: Arc<N>,
    cache: Arc<DealCache>,
    in_flight: Mutex<HashMap<String, TransitionState>>,
}

/// Releases a deal's in-flight slot when the transition ends or is dropped
struct InFlightSlot<'a> {
    in_flight: &'a Mutex<HashMap<String, TransitionState>>,
    deal_id: String,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.deal_id);
    }
}

impl<S, N> TransitionCoordinator<S, N>
where
    S: DealSource + ?Sized,
    N: Notifier + ?Sized,
{
    pub fn new(source: Arc<S>, notifier: Arc<N>, cache: Arc<DealCache>) -> Self {
        TransitionCoordinator {
            source,
            notifier,
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<DealCache> {
        &self.cache
    }

    /// Where a deal's move currently is; `None` when nothing is in flight
    pub fn state_of(&self, deal_id: &str) -> Option<TransitionState> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(deal_id)
            .cloned()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn claim(&self, deal_id: &str, state: &TransitionState) -> Result<InFlightSlot<'_>, TransitionError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if in_flight.contains_key(deal_id) {
            return Err(TransitionError::AlreadyInProgress {
                deal_id: deal_id.to_string(),
            });
        }
        in_flight.insert(deal_id.to_string(), state.clone());

        Ok(InFlightSlot {
            in_flight: &self.in_flight,
            deal_id: deal_id.to_string(),
        })
    }

    fn record(&self, deal_id: &str, state: &TransitionState) {
        if let Some(slot) = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(deal_id)
        {
            *slot = state.clone();
        }
    }

    /// Move a deal from `source_status` to `destination_status`.
    ///
    /// Exactly one notification is emitted unless the move is a same-column
    /// drop or is rejected because the deal already has a move in flight.
    pub async fn on_transition(
        &self,
        deal_id: &str,
        source_status: &str,
        destination_status: &str,
    ) -> Result<TransitionOutcome, TransitionError> {
        let request = TransitionRequest::new(deal_id, source_status, destination_status);
        let (mut state, mut effects) = step(TransitionState::Idle, TransitionEvent::Dropped(request));

        if state.is_idle() {
            tracing::debug!(deal_id, column = source_status, "card dropped on its own column");
            return Ok(TransitionOutcome::Unchanged);
        }

        let _slot = self.claim(deal_id, &state)?;
        tracing::debug!(deal_id, from = source_status, to = destination_status, "transition started");

        let mut failure: Option<TransitionError> = None;
        let mut applied_status: Option<String> = None;

        loop {
            let mut next = None;
            for effect in effects {
                if let Some(event) = self.execute(effect, &mut failure).await {
                    next = Some(event);
                }
            }

            let Some(event) = next else { break };
            if let TransitionState::Persisting { status_id, .. } = &state {
                if event == TransitionEvent::DealUpdated {
                    applied_status = Some(status_id.clone());
                }
            }

            let (next_state, next_effects) = step(state, event);
            state = next_state;
            effects = next_effects;
            self.record(deal_id, &state);
        }

        if let Some(err) = failure {
            tracing::warn!(deal_id, error = %err, "transition aborted");
            return Err(err);
        }

        match applied_status {
            Some(status_id) => {
                tracing::info!(deal_id, destination = destination_status, "transition applied");
                Ok(TransitionOutcome::Applied {
                    deal_id: deal_id.to_string(),
                    destination: destination_status.to_string(),
                    status_id,
                })
            }
            None => Ok(TransitionOutcome::Unchanged),
        }
    }

    /// Perform one effect; returns the event it produced, if any.
    async fn execute(&self, effect: Effect, failure: &mut Option<TransitionError>) -> Option<TransitionEvent> {
        match effect {
            Effect::LookupStatusId { name } => match self.source.lookup_status_id_by_name(&name).await {
                Ok(Some(status_id)) => Some(TransitionEvent::StatusResolved(status_id)),
                Ok(None) => {
                    *failure = Some(TransitionError::StatusNotFound { name });
                    Some(TransitionEvent::StatusNotFound)
                }
                Err(err) => {
                    let err = TransitionError::from(err);
                    let reason = err.reason();
                    *failure = Some(err);
                    Some(TransitionEvent::LookupFailed(reason))
                }
            },

            Effect::UpdateDealStatus { deal_id, status_id } => {
                match self.source.update_deal_status(&deal_id, &status_id).await {
                    Ok(()) => Some(TransitionEvent::DealUpdated),
                    Err(err) => {
                        let err = TransitionError::from(err);
                        let reason = err.reason();
                        *failure = Some(err);
                        Some(TransitionEvent::UpdateFailed(reason))
                    }
                }
            }

            Effect::InvalidateDeals => {
                self.cache.invalidate();
                None
            }

            Effect::NotifySuccess { destination } => {
                self.notifier.notify_success(&destination);
                Some(TransitionEvent::Reconciled)
            }

            Effect::NotifyFailure { reason } => {
                self.notifier.notify_failure(&reason);
                None
            }
        }
    }
}
