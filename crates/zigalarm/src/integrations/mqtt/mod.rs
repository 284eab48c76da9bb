//! Sensors, keypads, sirens and lights bridged over an MQTT broker.
//!
//! Each entity publishes its reading on `<base>/<domain>/<object>/state`
//! and receives service calls on `<base>/<domain>/<object>/set`.

mod client;
#[allow(clippy::module_inception)]
mod mqtt;

use anyhow::Context;
use linkme::distributed_slice;
pub use mqtt::MqttIntegration;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_mqtt(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let Some(mqtt_config) = &ctx.config.mqtt else {
        return Ok(None);
    };

    let client = client::RumqttcClient::new(mqtt_config)
        .with_context(|| format!("invalid [mqtt] settings for broker '{}'", mqtt_config.broker))?;
    Ok(Some(Box::new(MqttIntegration::new(client, mqtt_config))))
}
