use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum InteractionError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// One logged event of a learner engaging with an item.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct InteractionLog {
    pub id: i64,
    pub learner_id: i64,
    pub item_id: i64,
    pub kind: String,
}

/// Interaction awaiting persistence; the store assigns `id`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewInteraction {
    pub learner_id: i64,
    pub item_id: i64,
    pub kind: String,
}

impl NewInteraction {
    /// Validate fields before the interaction is written.
    ///
    /// # Errors
    /// Returns [`InteractionError::Validation`] when `kind` is blank.
    pub fn validate(&self) -> Result<(), InteractionError> {
        if self.kind.trim().is_empty() {
            return Err(InteractionError::Validation("kind must not be empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn into_log(self, id: i64) -> InteractionLog {
        InteractionLog { id, learner_id: self.learner_id, item_id: self.item_id, kind: self.kind }
    }
}

/// Keep only the interactions concerning `item_id`, preserving input order.
///
/// With no `item_id` the input is returned untouched. Only `item_id` is
/// compared; `learner_id` and `kind` never affect the result.
#[must_use]
pub fn filter_by_item_id(records: Vec<InteractionLog>, item_id: Option<i64>) -> Vec<InteractionLog> {
    let Some(item_id) = item_id else {
        return records;
    };
    records.into_iter().filter(|record| record.item_id == item_id).collect()
}
