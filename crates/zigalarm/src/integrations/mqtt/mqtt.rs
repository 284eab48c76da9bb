use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::AVAILABILITY_ONLINE;
use super::client::MqttClient;
use super::client::MqttEvent;
use super::client::MqttMessage;
use super::client::availability_topic;
use crate::config::MqttConfig;
use crate::engine::EntityState;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ServiceCall;
use crate::engine::ToIntegrationMessage;
use crate::engine::state::STATE_OFF;
use crate::engine::state::STATE_ON;

const INTEGRATION_NAME: &str = "mqtt";

/// Type alias for the set of entities already announced to the engine
type KnownEntities = Arc<Mutex<HashSet<String>>>;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("State payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("JSON state payload has no \"state\" field")]
    MissingState,

    #[error("Entity id {0} has no domain")]
    BadEntityId(String),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Entity id addressed by `<base>/<domain>/<object_id>/state`.
pub fn parse_state_topic(base_topic: &str, topic: &str) -> Option<String> {
    let rest = topic.strip_prefix(base_topic)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(domain), Some(object_id), Some("state"), None)
            if !domain.is_empty() && !object_id.is_empty() =>
        {
            Some(format!("{}.{}", domain, object_id))
        }
        _ => None,
    }
}

/// Command topic for an entity: `light.porch` -> `<base>/light/porch/set`.
pub fn command_topic(base_topic: &str, entity_id: &str) -> Result<String, PayloadError> {
    match entity_id.split_once('.') {
        Some((domain, object_id)) if !domain.is_empty() && !object_id.is_empty() => {
            Ok(format!("{}/{}/{}/set", base_topic, domain, object_id))
        }
        _ => Err(PayloadError::BadEntityId(entity_id.to_string())),
    }
}

/// Decode a state payload; `None` means the entity went away.
///
/// Accepted forms: a JSON object with a `state` field (every other field
/// becomes an attribute), a JSON scalar, or bare text.
pub fn parse_state_payload(payload: &[u8]) -> Result<Option<EntityState>, PayloadError> {
    let text = std::str::from_utf8(payload)?.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => return Ok(Some(EntityState::new(text))),
    };

    let state = match value {
        Value::Object(mut fields) => {
            let state = fields
                .remove("state")
                .and_then(|v| scalar_state(&v))
                .ok_or(PayloadError::MissingState)?;
            EntityState {
                state,
                attributes: fields,
            }
        }
        other => EntityState::new(scalar_state(&other).unwrap_or_else(|| text.to_string())),
    };

    Ok(Some(state))
}

fn scalar_state(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some(STATE_ON.to_string()),
        Value::Bool(false) => Some(STATE_OFF.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `{"service": "turn_on", ...data}`
pub fn command_payload(call: &ServiceCall) -> Result<Vec<u8>, PayloadError> {
    let mut body = call.data.clone();
    body.insert("service".to_string(), Value::String(call.service.clone()));
    Ok(serde_json::to_vec(&body)?)
}

/// MQTT integration for zigalarm
///
/// Mirrors entity states published under `<base_topic>/<domain>/<object_id>/state`
/// into the engine and publishes service calls to the matching `/set` topic.
pub struct MqttIntegration<C: MqttClient> {
    client: Arc<Mutex<C>>,
    config: MqttConfig,
    known: KnownEntities,
    /// Handle to the background message processing task
    message_task: Option<JoinHandle<()>>,
}

impl<C: MqttClient> MqttIntegration<C> {
    /// Create a new MQTT integration
    pub fn new(client: C, config: &MqttConfig) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            config: config.clone(),
            known: Arc::default(),
            message_task: None,
        }
    }

    /// Mark the daemon online and subscribe to every state topic.
    ///
    /// Runs on the first connect and again after each reconnect.
    async fn announce(client: &mut C, base_topic: &str) -> Result<(), Box<dyn Error + Send>> {
        client
            .publish(
                &availability_topic(base_topic),
                AVAILABILITY_ONLINE.as_bytes(),
                true,
            )
            .await?;

        let state_topic = format!("{}/+/+/state", base_topic);
        client.subscribe(&state_topic).await?;
        info!("Subscribed to {}", state_topic);
        Ok(())
    }

    /// Process incoming MQTT messages in a background task
    ///
    /// Spawned from setup() so that handle_message() can publish commands
    /// concurrently; the client lock is only held for a bounded poll.
    async fn process_messages_task(
        client: Arc<Mutex<C>>,
        base_topic: String,
        known: KnownEntities,
        to_engine: FromIntegrationSender,
    ) {
        loop {
            let event = {
                let mut client_guard = client.lock().await;
                tokio::time::timeout(
                    std::time::Duration::from_millis(100),
                    client_guard.poll_event(),
                )
                .await
            };

            match event {
                Ok(Some(MqttEvent::Reconnected)) => {
                    let mut client_guard = client.lock().await;
                    if let Err(e) = Self::announce(&mut *client_guard, &base_topic).await {
                        warn!("Failed to resubscribe after reconnect: {}", e);
                    }
                }
                Ok(Some(MqttEvent::Message(msg))) => {
                    if let Err(e) =
                        Self::handle_state_message(&msg, &base_topic, &known, &to_engine).await
                    {
                        warn!("Error handling message on {}: {}", msg.topic, e);
                    }
                }
                Ok(None) => {
                    info!("MQTT connection closed, stopping message processing");
                    return;
                }
                Err(_) => {
                    // Poll timed out; let command publishing take the lock
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn handle_state_message(
        msg: &MqttMessage,
        base_topic: &str,
        known: &KnownEntities,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), PayloadError> {
        let Some(entity_id) = parse_state_topic(base_topic, &msg.topic) else {
            debug!("Ignoring message on unrelated topic {}", msg.topic);
            return Ok(());
        };

        let Some(state) = parse_state_payload(&msg.payload)? else {
            if known.lock().await.remove(&entity_id) {
                info!("Removed entity: {}", entity_id);
                Self::send(
                    to_engine,
                    FromIntegrationMessage::EntityRemoved { entity_id },
                )
                .await;
            }
            return Ok(());
        };

        let is_new = known.lock().await.insert(entity_id.clone());
        if is_new {
            info!("Registered entity: {}", entity_id);
            Self::send(
                to_engine,
                FromIntegrationMessage::EntityDiscovered {
                    entity_id: entity_id.clone(),
                    integration_name: INTEGRATION_NAME.to_string(),
                },
            )
            .await;
        }

        debug!("State update for {}: {}", entity_id, state.state);
        Self::send(
            to_engine,
            FromIntegrationMessage::StateChanged { entity_id, state },
        )
        .await;
        Ok(())
    }

    async fn send(to_engine: &FromIntegrationSender, msg: FromIntegrationMessage) {
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send message to engine: {}", e);
        }
    }

    /// Publish a service call to every target's command topic
    pub async fn send_service_call(&self, call: &ServiceCall) -> Result<(), Box<dyn Error + Send>> {
        let payload = command_payload(call).map_err(|e| Box::new(e) as Box<dyn Error + Send>)?;

        for entity_id in &call.entity_ids {
            let topic = match command_topic(&self.config.base_topic, entity_id) {
                Ok(topic) => topic,
                Err(e) => {
                    warn!("Skipping {}: {}", entity_id, e);
                    continue;
                }
            };

            let mut client = self.client.lock().await;
            client.publish(&topic, &payload, false).await?;
            info!("Sent {}.{} to {}", call.domain, call.service, entity_id);
        }

        Ok(())
    }
}

#[async_trait]
impl<C: MqttClient + 'static> Integration for MqttIntegration<C> {
    fn name(&self) -> &str {
        INTEGRATION_NAME
    }

    /// Command topics derive from the entity id, so outputs that never
    /// publish a state are still reachable.
    fn accepts_unannounced(&self) -> bool {
        true
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.broker, self.config.port
        );

        {
            let mut client = self.client.lock().await;
            client.connect().await?;
            Self::announce(&mut *client, &self.config.base_topic).await?;
        }

        let task = tokio::spawn(Self::process_messages_task(
            self.client.clone(),
            self.config.base_topic.clone(),
            self.known.clone(),
            tx,
        ));
        self.message_task = Some(task);

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::ServiceCall(call) => self.send_service_call(&call).await,
        }
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("MQTT integration shutting down");
        if let Some(task) = self.message_task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::integrations::mqtt::client::mock::MockMqttClient;

    fn config() -> MqttConfig {
        MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            base_topic: "zigalarm".to_string(),
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_parse_state_topic() {
        assert_eq!(
            parse_state_topic("zigalarm", "zigalarm/binary_sensor/front_door/state"),
            Some("binary_sensor.front_door".to_string())
        );
        assert_eq!(
            parse_state_topic("home/alarm", "home/alarm/light/porch/state"),
            Some("light.porch".to_string())
        );
        assert_eq!(parse_state_topic("zigalarm", "zigalarm/light/porch/set"), None);
        assert_eq!(parse_state_topic("zigalarm", "zigalarm/light/state"), None);
        assert_eq!(parse_state_topic("zigalarm", "zigalarmx/light/porch/state"), None);
        assert_eq!(parse_state_topic("zigalarm", "zigalarm/light/porch/state/x"), None);
    }

    #[test]
    fn test_parse_json_payload() {
        let state = parse_state_payload(br#"{"state": "ON", "brightness": 120, "linkquality": 87}"#)
            .unwrap()
            .unwrap();
        assert_eq!(state.state, "ON");
        assert_eq!(state.attribute("brightness"), Some(&json!(120)));
        assert!(state.attribute("state").is_none());
    }

    #[test]
    fn test_parse_scalar_payloads() {
        assert_eq!(parse_state_payload(b"on").unwrap().unwrap().state, "on");
        assert_eq!(parse_state_payload(b"\"off\"").unwrap().unwrap().state, "off");
        assert_eq!(parse_state_payload(b"true").unwrap().unwrap().state, "on");
        assert_eq!(parse_state_payload(b" 42 ").unwrap().unwrap().state, "42");
        assert!(parse_state_payload(b"").unwrap().is_none());
        assert!(matches!(
            parse_state_payload(br#"{"contact": false}"#),
            Err(PayloadError::MissingState)
        ));
    }

    #[test]
    fn test_command_payload() {
        let call = ServiceCall::turn_on("light", "light.porch")
            .with_data("rgb_color", json!([255, 0, 0]));
        let payload: Value = serde_json::from_slice(&command_payload(&call).unwrap()).unwrap();
        assert_eq!(payload, json!({"service": "turn_on", "rgb_color": [255, 0, 0]}));

        assert_eq!(
            command_topic("zigalarm", "siren.hallway").unwrap(),
            "zigalarm/siren/hallway/set"
        );
        assert!(command_topic("zigalarm", "hallway").is_err());
    }

    #[tokio::test]
    async fn test_states_are_forwarded_to_engine() {
        let (client, broker) = MockMqttClient::new();
        let mut integration = MqttIntegration::new(client, &config());
        let (tx, mut rx) = mpsc::channel(16);

        integration.setup(tx).await.unwrap();
        assert!(broker.is_connected());
        assert_eq!(broker.subscriptions(), vec!["zigalarm/+/+/state".to_string()]);
        assert_eq!(
            broker.published(),
            vec![(
                "zigalarm/availability".to_string(),
                b"online".to_vec(),
                true
            )]
        );

        broker.deliver("zigalarm/binary_sensor/door/state", r#"{"state": "on"}"#);
        broker.deliver("zigalarm/binary_sensor/door/state", "off");
        broker.deliver("zigalarm/binary_sensor/door/state", "");

        assert!(matches!(
            rx.recv().await.unwrap(),
            FromIntegrationMessage::EntityDiscovered { entity_id, integration_name }
                if entity_id == "binary_sensor.door" && integration_name == "mqtt"
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            FromIntegrationMessage::StateChanged { state, .. } if state.state == "on"
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            FromIntegrationMessage::StateChanged { state, .. } if state.state == "off"
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            FromIntegrationMessage::EntityRemoved { entity_id } if entity_id == "binary_sensor.door"
        ));

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_and_marks_online() {
        let (client, broker) = MockMqttClient::new();
        let mut integration = MqttIntegration::new(client, &config());
        let (tx, mut rx) = mpsc::channel(16);
        integration.setup(tx).await.unwrap();

        broker.reconnect();
        broker.deliver("zigalarm/binary_sensor/door/state", "on");

        assert!(matches!(
            rx.recv().await.unwrap(),
            FromIntegrationMessage::EntityDiscovered { entity_id, .. } if entity_id == "binary_sensor.door"
        ));
        assert_eq!(broker.subscriptions(), vec!["zigalarm/+/+/state".to_string()]);
        let online: Vec<_> = broker
            .published()
            .into_iter()
            .filter(|(topic, payload, retain)| {
                topic == "zigalarm/availability" && payload == b"online" && *retain
            })
            .collect();
        assert_eq!(online.len(), 2);

        integration.shutdown().await.unwrap();
    }

    #[test]
    fn test_accepts_unannounced_outputs() {
        let (client, _broker) = MockMqttClient::new();
        assert!(MqttIntegration::new(client, &config()).accepts_unannounced());
    }

    #[tokio::test]
    async fn test_service_call_is_published_per_target() {
        let (client, broker) = MockMqttClient::new();
        let mut integration = MqttIntegration::new(client, &config());

        let call = ServiceCall::new(
            "light",
            "turn_off",
            vec!["light.porch".to_string(), "light.hall".to_string()],
        );
        integration
            .handle_message(ToIntegrationMessage::ServiceCall(call))
            .await
            .unwrap();

        let topics: Vec<String> = broker.published().into_iter().map(|(t, _, _)| t).collect();
        assert_eq!(
            topics,
            vec![
                "zigalarm/light/porch/set".to_string(),
                "zigalarm/light/hall/set".to_string(),
            ]
        );
        let published = broker.published();
        let (_, payload, retain) = &published[0];
        assert!(!retain);
        assert_eq!(
            serde_json::from_slice::<Value>(payload).unwrap(),
            json!({"service": "turn_off"})
        );
    }
}
