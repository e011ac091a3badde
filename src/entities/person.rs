use serde::{Deserialize, Serialize};

/// Sales rep owning a deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
}

impl Person {
    pub fn new(id: String, name: String) -> Self {
        Person { id, name }
    }
}
