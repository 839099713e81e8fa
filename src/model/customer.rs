use crate::framework::EntityId;
use serde::{Deserialize, Serialize};

/// A registered customer. Root of the shop's ownership graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub entity_id: EntityId,
    pub name: String,
    pub email: Option<String>,
}

impl Customer {
    pub fn new(entity_id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}
