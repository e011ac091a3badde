// 🏷️ Status Entity - pipeline stage with stable identity
//
// "Status name is what users see and drag to, status id is what deals store."
//
// The set of statuses is data-driven: nothing here enumerates them. The
// Kanban board resolves the name of the column a card is dropped on to an id
// before writing it onto the deal.

use crate::shaping::normalize_name;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Stable identity - what deals reference
    pub id: String,

    /// Display label - what columns are keyed by
    pub name: String,
}

impl Status {
    pub fn new(id: String, name: String) -> Self {
        Status { id, name }
    }

    /// Create a status with a fresh UUID
    pub fn named(name: &str) -> Self {
        Status {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        }
    }
}

// ============================================================================
// STATUS REGISTRY
// ============================================================================

/// In-memory name → id lookup for statuses.
///
/// Names are matched case-sensitively after `shaping::normalize_name`, the
/// same way `db::get_status_id_by_name` behaves. An exact match wins over a
/// normalized one.
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    statuses: Arc<RwLock<Vec<Status>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the given names, each getting a fresh id
    pub fn with_names(names: &[&str]) -> Self {
        let registry = Self::new();
        for name in names {
            registry.register(Status::named(name));
        }
        registry
    }

    /// Register a status. A status with the same name replaces the old one.
    pub fn register(&self, status: Status) {
        let mut statuses = self
            .statuses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        statuses.retain(|s| s.name != status.name);
        statuses.push(status);
    }

    pub fn find_by_name(&self, name: &str) -> Option<Status> {
        let statuses = self
            .statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        statuses
            .iter()
            .find(|s| s.name == name)
            .or_else(|| {
                let wanted = normalize_name(name);
                statuses.iter().find(|s| normalize_name(&s.name) == wanted)
            })
            .cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Status> {
        let statuses = self
            .statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        statuses.iter().find(|s| s.id == id).cloned()
    }

    /// Status id for a display name
    pub fn get_id(&self, name: &str) -> Option<String> {
        self.find_by_name(name).map(|status| status.id)
    }

    /// All statuses in registration order
    pub fn all(&self) -> Vec<Status> {
        self.statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.all().len()
    }
}
