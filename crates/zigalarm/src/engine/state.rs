use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// Canonical "active" reading of a binary sensor (door open, motion seen...)
pub const STATE_ON: &str = "on";

/// Canonical "inactive" reading
pub const STATE_OFF: &str = "off";

/// Last known reading of an entity: a state label plus free-form attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    /// State label, e.g. `on`, `off`, `unavailable`, or a keypad action
    pub state: String,

    /// Attributes such as `brightness`, `rgb_color` or `action_code`
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl EntityState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// Whether the reading equals the canonical active value.
    pub fn is_on(&self) -> bool {
        self.state == STATE_ON
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }
}

/// Centralized snapshot of every known entity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: HashMap<String, EntityState>,
}

impl State {
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }
}
