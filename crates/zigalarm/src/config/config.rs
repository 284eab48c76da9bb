use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use super::panel::PanelConfig;

/// Entity domain of alarm panels
pub const PANEL_DOMAIN: &str = "alarm_control_panel";

/// Entity id of the panel configured under `[panels.<key>]`
pub fn panel_entity_id(key: &str) -> String {
    format!("{}.{}", PANEL_DOMAIN, key)
}

/// Top-level daemon configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP API; disabled when the table is absent
    #[serde(default)]
    pub api: Option<ApiConfig>,

    /// Native MQTT integration; disabled when the table is absent
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    #[serde(default)]
    pub restore: Option<RestoreConfig>,

    /// Alarm panels keyed by the object id of their entity
    #[serde(default)]
    pub panels: BTreeMap<String, PanelConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"zigalarm::integrations" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the target filter used by the fmt subscriber
    pub fn targets(&self) -> Targets {
        self.overrides
            .iter()
            .fold(
                Targets::new().with_default(LevelFilter::from(self.level)),
                |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
            )
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8565
}

/// Native HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "zigalarm".to_string()
}

fn default_base_topic() -> String {
    "zigalarm".to_string()
}

/// Configuration for the MQTT integration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address
    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Prefix for entity state and command topics
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Where panel states survive restarts
#[derive(Debug, Clone, Deserialize)]
pub struct RestoreConfig {
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::from_toml(&contents)
    }

    /// Parse, normalize and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(contents)?;
        for panel in config.panels.values_mut() {
            panel.normalize();
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panels.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [panels.<name>] table is required".to_string(),
            ));
        }

        for key in self.panels.keys() {
            if key.trim().is_empty() || key.contains('.') {
                return Err(ConfigError::Invalid(format!(
                    "panel key '{}' must be non-empty and must not contain '.'",
                    key
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [logging]
            level = "info"

            [panels.house]
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.api.is_none());
        assert!(config.mqtt.is_none());
        assert_eq!(config.panels.len(), 1);

        let house = config.panels.get("house").unwrap();
        assert_eq!(house.exit_delay, 5);
        assert_eq!(house.trigger_time, 180);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [logging]
            level = "debug"

            [logging.overrides]
            "zigalarm::api" = "warn"

            [api]
            port = 9000

            [mqtt]
            broker = "localhost"
            username = "zigalarm"

            [restore]
            path = "/var/lib/zigalarm/state.json"

            [panels.house]
            name = "House"
            perimeter_sensors = ["binary_sensor.door", " binary_sensor.door ", "binary_sensor.window"]
            motion_sensors = ["binary_sensor.hall_motion"]
            siren_entities = ["siren.hall"]
            siren_entity = "switch.outdoor_siren"
            exit_delay = 30
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides.get("zigalarm::api"),
            Some(&LogLevel::Warn)
        );

        let api = config.api.as_ref().unwrap();
        assert_eq!(api.listen, "127.0.0.1");
        assert_eq!(api.port, 9000);

        let mqtt = config.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.base_topic, "zigalarm");
        assert_eq!(mqtt.username.as_deref(), Some("zigalarm"));

        let house = config.panels.get("house").unwrap();
        assert_eq!(house.name, "House");
        assert_eq!(
            house.perimeter_sensors,
            vec!["binary_sensor.door", "binary_sensor.window"]
        );
        assert_eq!(
            house.sirens(),
            vec!["siren.hall".to_string(), "switch.outdoor_siren".to_string()]
        );
        assert_eq!(house.exit_delay, 30);
    }

    #[test]
    fn test_panel_entity_id() {
        assert_eq!(panel_entity_id("house"), "alarm_control_panel.house");
    }

    #[test]
    fn test_no_panels_is_invalid() {
        let err = Config::from_toml("[logging]\nlevel = \"info\"\n").unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"Invalid configuration: at least one [panels.<name>] table is required"
        );
    }

    #[test]
    fn test_dotted_panel_key_is_invalid() {
        let err = Config::from_toml("[panels.\"a.b\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("a.b"));
    }

    #[test]
    fn test_unknown_log_level_is_parse_error() {
        let err = Config::from_toml("[logging]\nlevel = \"loud\"\n[panels.house]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_error() {
        let result = Config::from_file("/nonexistent/zigalarm.toml");
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Failed to read config file"));
        assert!(err_msg.contains("/nonexistent/zigalarm.toml"));
    }
}
