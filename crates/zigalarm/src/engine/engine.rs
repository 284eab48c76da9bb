use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::event::BusEvent;
use super::event::Event;
use super::event::StateChangeHandler;
use super::event::Subscription;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ServiceCall;
use super::message::ToIntegrationMessage;
use super::state::EntityState;
use super::state::State;
use crate::alarm::Host;
use crate::alarm::HostError;

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Capacity of the notification bus; slow receivers lag rather than block panels
const EVENT_BUS_CAPACITY: usize = 256;

struct Listener {
    entity_ids: HashSet<String>,
    handler: StateChangeHandler,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<u64, Listener>,
}

/// zigalarm engine
///
/// This structure handles the flow of events from integrations, maintains a
/// view of the world with State, notifies subscribers of state changes and
/// routes service calls to the integration owning each entity.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Integration that receives calls for entities nobody has announced
    fallback_integration: Option<String>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// State-change subscribers, shared with their `Subscription` guards
    listeners: Arc<std::sync::Mutex<Listeners>>,

    /// Notification bus
    bus: broadcast::Sender<BusEvent>,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: HashMap::new(),
            fallback_integration: None,
            message_rx: Mutex::new(message_rx),
            message_tx,
            listeners: Arc::default(),
            bus,
            integration_handles: Vec::new(),
        }
    }

    /// Register integrations from configuration
    ///
    /// Every factory in the integration registry is offered the config; those
    /// that return an integration are started.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        for integration in super::integration::build_all(&IntegrationContext::new(cfg)) {
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        if integration.accepts_unannounced() && self.fallback_integration.is_none() {
            info!("Integration '{}' handles unannounced entities", name);
            self.fallback_integration = Some(name.clone());
        }

        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    /// Sender integrations (and tests) use to feed the engine.
    pub fn sender(&self) -> FromIntegrationSender {
        self.message_tx.clone()
    }

    /// Subscribe to the notification bus.
    pub fn events(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.insert(entity_id, integration_name);
                }
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.entities.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.remove(&entity_id);
                }
            }
            FromIntegrationMessage::StateChanged { entity_id, state } => {
                debug!("State changed: {} -> {}", entity_id, state.state);

                let old_state = {
                    let mut snapshot = State::clone(&self.state.load());
                    let old = snapshot.entities.insert(entity_id.clone(), state.clone());
                    self.state.store(Arc::new(snapshot));
                    old
                };

                let event = Event::StateChanged {
                    entity_id,
                    old_state,
                    new_state: state,
                };
                self.notify(&event);
            }
        }
    }

    /// Call every handler watching the event's entity, outside the lock.
    fn notify(&self, event: &Event) {
        let handlers: Vec<StateChangeHandler> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .entries
                .values()
                .filter(|l| l.entity_ids.contains(event.entity_id()))
                .map(|l| l.handler.clone())
                .collect(),
            Err(e) => {
                error!("Listener table poisoned: {}", e);
                return;
            }
        };

        for handler in handlers {
            handler(event);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for Engine {
    fn reading(&self, entity_id: &str) -> Option<EntityState> {
        self.state.load().get(entity_id).cloned()
    }

    fn subscribe(&self, entity_ids: &[String], handler: StateChangeHandler) -> Subscription {
        let id = {
            let Ok(mut listeners) = self.listeners.lock() else {
                error!("Listener table poisoned, subscription dropped");
                return Subscription::empty();
            };
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.insert(
                id,
                Listener {
                    entity_ids: entity_ids.iter().cloned().collect(),
                    handler,
                },
            );
            id
        };

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                if let Ok(mut listeners) = listeners.lock() {
                    listeners.entries.remove(&id);
                }
            }
        })
    }

    /// Route a service call, splitting targets by owning integration.
    ///
    /// Targets no integration has announced go to the fallback integration,
    /// if one is registered. Routable targets are dispatched even when others
    /// are unknown; the unknown ones are reported as `NoRoute`.
    fn call_service(&self, call: ServiceCall) -> Result<(), HostError> {
        let mut by_integration: HashMap<String, Vec<String>> = HashMap::new();
        let mut unrouted = Vec::new();
        {
            let map = self
                .entity_integration_map
                .lock()
                .map_err(|e| HostError::ChannelClosed(e.to_string()))?;

            for entity_id in &call.entity_ids {
                match map.get(entity_id).or(self.fallback_integration.as_ref()) {
                    Some(integration_name) => by_integration
                        .entry(integration_name.clone())
                        .or_default()
                        .push(entity_id.clone()),
                    None => unrouted.push(entity_id.clone()),
                }
            }
        }

        for (integration_name, entity_ids) in by_integration {
            let tx = self
                .integration_channels
                .get(&integration_name)
                .ok_or_else(|| HostError::ChannelClosed(integration_name.clone()))?;

            tx.send(ToIntegrationMessage::ServiceCall(call.retarget(entity_ids)))
                .map_err(|_| HostError::ChannelClosed(integration_name.clone()))?;
        }

        if unrouted.is_empty() {
            Ok(())
        } else {
            Err(HostError::NoRoute(unrouted.join(", ")))
        }
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        info!("Event {}: {}", event_type, data);
        // No receivers is fine; the bus is observability only
        let _ = self.bus.send(BusEvent {
            event_type: event_type.to_string(),
            data,
        });
    }
}
