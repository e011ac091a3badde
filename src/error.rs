// ⚠️ Error taxonomy
//
// Data-shape anomalies (missing values, timestamps, references) are NOT errors:
// they are absorbed by the coercion rules in `shaping`. Everything here is a
// failure of a collaborator that the caller has to surface.

use thiserror::Error;

/// The deal collection could not be retrieved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("deal storage unavailable: {0}")]
    Storage(String),
}

/// The destination status name could not be turned into a status id.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatusLookupError {
    #[error("status lookup failed: {0}")]
    Storage(String),
}

/// Writing the new status onto a deal failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistenceError {
    #[error("deal '{0}' does not exist")]
    DealNotFound(String),

    #[error("status update failed: {0}")]
    Storage(String),
}

/// Why a Kanban transition did not apply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("transition already in progress for deal '{deal_id}'")]
    AlreadyInProgress { deal_id: String },

    #[error("no status named '{name}'")]
    StatusNotFound { name: String },

    #[error(transparent)]
    Lookup(#[from] StatusLookupError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl TransitionError {
    /// Message shown in the failure notification.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<rusqlite::Error> for FetchError {
    fn from(err: rusqlite::Error) -> Self {
        FetchError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for StatusLookupError {
    fn from(err: rusqlite::Error) -> Self {
        StatusLookupError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}
