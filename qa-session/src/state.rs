//! Conversation state and user identifiers.

use serde::{Deserialize, Serialize};

/// Opaque per-user conversation state.
///
/// The cache never looks inside; only the QA capability interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QaState(serde_json::Value);

impl QaState {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for QaState {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Reject missing or blank identifiers. The id itself is passed through untouched.
pub fn require_field(raw: Option<&str>) -> Option<&str> {
    raw.filter(|value| !value.trim().is_empty())
}
