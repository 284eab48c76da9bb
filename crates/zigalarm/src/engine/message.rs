//! Type-safe message system for the engine
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use serde::Serialize;

use super::state::EntityState;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
    },

    /// An entity was removed (device unplugged, etc.)
    EntityRemoved { entity_id: String },

    /// An entity reported a new reading
    StateChanged {
        entity_id: String,
        state: EntityState,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone)]
pub enum ToIntegrationMessage {
    /// Invoke a service (`turn_on`, `turn_off`...) on entities owned by the integration
    ServiceCall(ServiceCall),
}

/// A request to act on one or more output entities.
///
/// Mirrors a Home Assistant service call: `light.turn_on` with
/// `{"entity_id": [...], "brightness": 255}` becomes
/// `ServiceCall { domain: "light", service: "turn_on", entity_ids, data }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub entity_ids: Vec<String>,
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ServiceCall {
    pub fn new(domain: &str, service: &str, entity_ids: Vec<String>) -> Self {
        Self {
            domain: domain.to_string(),
            service: service.to_string(),
            entity_ids,
            data: serde_json::Map::new(),
        }
    }

    pub fn turn_on(domain: &str, entity_id: &str) -> Self {
        Self::new(domain, "turn_on", vec![entity_id.to_string()])
    }

    pub fn turn_off(domain: &str, entity_id: &str) -> Self {
        Self::new(domain, "turn_off", vec![entity_id.to_string()])
    }

    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// The same call restricted to a subset of its targets.
    pub fn retarget(&self, entity_ids: Vec<String>) -> Self {
        Self {
            entity_ids,
            ..self.clone()
        }
    }
}
