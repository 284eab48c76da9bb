use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::LastWill;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use crate::config::MqttConfig;

/// Retained payloads on `<base_topic>/availability`
pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

/// MQTT message received from a subscription
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// What the client hands back from the connection
#[derive(Debug, Clone)]
pub enum MqttEvent {
    Message(MqttMessage),

    /// The broker accepted a new connection after the first one. It holds
    /// no subscriptions for a clean session, so they must be sent again.
    Reconnected,
}

/// Trait for MQTT client operations
///
/// This trait allows for mocking the MQTT client for testing purposes
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Connect to the MQTT broker
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>>;

    /// Subscribe to an MQTT topic
    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>>;

    /// Publish a message to an MQTT topic
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Wait for the next message or reconnect
    ///
    /// Returns None once the connection is gone for good
    async fn poll_event(&mut self) -> Option<MqttEvent>;
}

pub fn availability_topic(base_topic: &str) -> String {
    format!("{}/availability", base_topic)
}

fn not_connected() -> Box<dyn Error + Send> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "MQTT client not connected. Call connect() first.",
    ))
}

/// Real MQTT client implementation using rumqttc
pub struct RumqttcClient {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Event receiver (created in connect())
    event_rx: Option<mpsc::UnboundedReceiver<MqttEvent>>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    /// Create a new RumqttcClient from configuration
    ///
    /// The broker marks the daemon offline on `<base_topic>/availability`
    /// if the connection drops.
    pub fn new(config: &MqttConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.broker.trim().is_empty(), "MQTT broker is empty");

        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_last_will(LastWill::new(
            availability_topic(&config.base_topic),
            AVAILABILITY_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        Ok(Self {
            mqtt_options,
            client: None,
            event_rx: None,
            event_loop_task: None,
        })
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // rumqttc reconnects on the next poll after an error. The broker
        // drops subscriptions with the clean session, so every ConnAck after
        // the first is reported for the owner to subscribe again.
        let task = tokio::spawn(async move {
            let mut connected_before = false;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        };
                        if event_tx.send(MqttEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if !connected_before {
                            info!("MQTT connection established");
                            connected_before = true;
                        } else {
                            info!("MQTT connection re-established");
                            if event_tx.send(MqttEvent::Reconnected).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.event_rx = Some(event_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)?;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;
        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)?;
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<MqttEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
