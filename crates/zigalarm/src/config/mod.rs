//! Configuration file parsing and structures.
//!
//! zigalarm reads a single TOML file: daemon-wide settings (logging, API,
//! MQTT, restore file) plus one `[panels.<key>]` table per alarm panel.

#[allow(clippy::module_inception)]
mod config;
pub mod panel;

pub use config::*;
pub use panel::ConfigUpdate;
pub use panel::PanelConfig;
