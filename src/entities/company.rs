use serde::{Deserialize, Serialize};

/// Company a deal belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
}

impl Company {
    pub fn new(id: String, name: String) -> Self {
        Company { id, name }
    }
}
