use std::sync::Arc;

use serde::Serialize;

use super::state::EntityState;

/// Entity-level events delivered to subscribers.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary.
#[derive(Debug, Clone)]
pub enum Event {
    StateChanged {
        entity_id: String,
        old_state: Option<EntityState>,
        new_state: EntityState,
    },
}

impl Event {
    pub fn entity_id(&self) -> &str {
        match self {
            Event::StateChanged { entity_id, .. } => entity_id,
        }
    }
}

/// Callback invoked for every state change of a watched entity.
///
/// Handlers run on the engine task and must not block; forwarding into a
/// channel is the expected implementation.
pub type StateChangeHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// A named notification on the event bus (`zigalarm_arm_blocked`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Guard for a state-change subscription; dropping it unsubscribes.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A subscription with nothing to release.
    pub fn empty() -> Self {
        Self { unsubscribe: None }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}
