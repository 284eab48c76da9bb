//! The narrow interface an alarm panel needs from the outside world.
//!
//! Panels never talk to MQTT, HTTP or the engine directly. They read entity
//! states, watch them for changes, dispatch service calls and emit
//! notifications through [`Host`]. The engine is the production
//! implementation; tests use [`mock::MockHost`].

use serde_json::json;

pub use crate::engine::BusEvent;
pub use crate::engine::EntityState;
pub use crate::engine::Event;
pub use crate::engine::ServiceCall;
pub use crate::engine::StateChangeHandler;
pub use crate::engine::Subscription;

/// Collaborator interface between a panel and its runtime.
pub trait Host: Send + Sync + 'static {
    /// Last known reading of an entity, if any.
    fn reading(&self, entity_id: &str) -> Option<EntityState>;

    /// Watch `entity_ids`; `handler` is called for every change until the
    /// returned guard is dropped.
    fn subscribe(&self, entity_ids: &[String], handler: StateChangeHandler) -> Subscription;

    /// Dispatch a service call without waiting for it to complete.
    fn call_service(&self, call: ServiceCall) -> Result<(), HostError>;

    /// Publish a notification. Observability only; never read back.
    fn emit(&self, event_type: &str, data: serde_json::Value);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("No integration found for entity: {0}")]
    NoRoute(String),

    #[error("Integration channel closed: {0}")]
    ChannelClosed(String),
}

/// Notifications emitted by a panel.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// An arm request was refused because sensors are open
    ArmBlocked {
        entity_id: String,
        mode: &'static str,
        open_sensors: Vec<String>,
    },

    /// A keypad disarm carried the wrong PIN
    KeypadDenied {
        entity_id: String,
        keypad: String,
        action: String,
    },

    /// An always-trigger sensor fired the alarm
    AlwaysTriggered { entity_id: String, sensor: String },

    StateChanged {
        entity_id: String,
        from: String,
        to: String,
    },
}

impl PanelEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PanelEvent::ArmBlocked { .. } => "zigalarm_arm_blocked",
            PanelEvent::KeypadDenied { .. } => "zigalarm_keypad_denied",
            PanelEvent::AlwaysTriggered { .. } => "zigalarm_always_triggered",
            PanelEvent::StateChanged { .. } => "zigalarm_state_changed",
        }
    }

    pub fn data(&self) -> serde_json::Value {
        match self {
            PanelEvent::ArmBlocked {
                entity_id,
                mode,
                open_sensors,
            } => json!({
                "entity_id": entity_id,
                "mode": mode,
                "open_sensors": open_sensors,
            }),
            PanelEvent::KeypadDenied {
                entity_id,
                keypad,
                action,
            } => json!({
                "entity_id": entity_id,
                "keypad": keypad,
                "action": action,
            }),
            PanelEvent::AlwaysTriggered { entity_id, sensor } => json!({
                "entity_id": entity_id,
                "sensor": sensor,
            }),
            PanelEvent::StateChanged { entity_id, from, to } => json!({
                "entity_id": entity_id,
                "from": from,
                "to": to,
            }),
        }
    }

    pub fn emit(&self, host: &dyn Host) {
        host.emit(self.event_type(), self.data());
    }
}
