//! Integrations bridge the engine to the outside world. Each one registers
//! a factory in the engine's integration registry and starts when its
//! configuration section is present.

#[cfg(feature = "integration_mqtt")]
pub mod mqtt;
