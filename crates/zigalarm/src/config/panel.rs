//! Per-panel alarm configuration.
//!
//! Panels are configured from `[panels.<key>]` tables. Every field is
//! optional; malformed values degrade to a default instead of failing the
//! load, so a typo in a colour or a negative delay never keeps the alarm
//! from starting.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

pub const DEFAULT_NAME: &str = "ZigAlarm";
pub const DEFAULT_EXIT_DELAY: i64 = 5;
pub const DEFAULT_ENTRY_DELAY: i64 = 5;
pub const DEFAULT_TRIGGER_TIME: i64 = 180;
pub const DEFAULT_LIGHT_COLOR: &str = "#ff0000";
pub const DEFAULT_LIGHT_BRIGHTNESS: i64 = 255;
pub const DEFAULT_ARM_HOME_ACTION: &str = "arm_home";
pub const DEFAULT_ARM_AWAY_ACTION: &str = "arm_away";
pub const DEFAULT_DISARM_ACTION: &str = "disarm";

/// Deserialize a PIN that may be written as a string or an integer.
///
/// `master_pin = 1234` is a natural thing to write in TOML, and a leading
/// zero only survives the string form, so both are accepted.
fn deserialize_pin<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct Pin;

    impl<'de> de::Visitor<'de> for Pin {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string or integer")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.to_string())
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(Pin)
}

fn deserialize_optional_pin<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_pin(deserializer).map(Some)
}

/// Trim, drop blanks and de-duplicate while keeping first-seen order.
pub fn uniq_clean<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let s = item.as_ref().trim();
        if !s.is_empty() && !out.iter().any(|o| o == s) {
            out.push(s.to_string());
        }
    }
    out
}

/// Configuration of a single alarm panel
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Display name
    pub name: String,

    /// Doors and windows; block both arm modes while open
    pub perimeter_sensors: Vec<String>,

    /// Interior motion; blocks arm-away only
    pub motion_sensors: Vec<String>,

    /// Fire the alarm regardless of the arm state (smoke, panic button...)
    pub always_sensors: Vec<String>,

    pub siren_entities: Vec<String>,

    /// Legacy single-siren field, merged into `siren_entities`
    pub siren_entity: Option<String>,

    /// Lights (or switch-controlled spotlights) driven on trigger
    pub alarm_lights: Vec<String>,
    pub alarm_light_color: String,
    pub alarm_light_brightness: i64,
    pub alarm_light_effect: String,
    pub alarm_light_restore: bool,

    /// Display hints only
    pub camera_entities: Vec<String>,
    pub camera_show_only_triggered: bool,

    /// Seconds
    pub exit_delay: i64,
    pub entry_delay: i64,
    pub trigger_time: i64,

    /// Arm even when sensors are open
    pub force_arm: bool,

    pub keypad_enabled: bool,
    pub keypad_entities: Vec<String>,
    pub arm_home_action: String,
    pub arm_away_action: String,
    pub disarm_action: String,

    /// Empty disables the PIN check on disarm
    #[serde(deserialize_with = "deserialize_pin", skip_serializing)]
    pub master_pin: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            perimeter_sensors: Vec::new(),
            motion_sensors: Vec::new(),
            always_sensors: Vec::new(),
            siren_entities: Vec::new(),
            siren_entity: None,
            alarm_lights: Vec::new(),
            alarm_light_color: DEFAULT_LIGHT_COLOR.to_string(),
            alarm_light_brightness: DEFAULT_LIGHT_BRIGHTNESS,
            alarm_light_effect: String::new(),
            alarm_light_restore: true,
            camera_entities: Vec::new(),
            camera_show_only_triggered: false,
            exit_delay: DEFAULT_EXIT_DELAY,
            entry_delay: DEFAULT_ENTRY_DELAY,
            trigger_time: DEFAULT_TRIGGER_TIME,
            force_arm: false,
            keypad_enabled: false,
            keypad_entities: Vec::new(),
            arm_home_action: DEFAULT_ARM_HOME_ACTION.to_string(),
            arm_away_action: DEFAULT_ARM_AWAY_ACTION.to_string(),
            disarm_action: DEFAULT_DISARM_ACTION.to_string(),
            master_pin: String::new(),
        }
    }
}

fn label_or_default(label: &str, default: &str) -> String {
    let label = label.trim();
    if label.is_empty() {
        default.to_string()
    } else {
        label.to_string()
    }
}

impl PanelConfig {
    /// Clean identifier lists and repair out-of-range values in place.
    pub fn normalize(&mut self) {
        if self.name.trim().is_empty() {
            self.name = DEFAULT_NAME.to_string();
        }

        self.perimeter_sensors = uniq_clean(&self.perimeter_sensors);
        self.motion_sensors = uniq_clean(&self.motion_sensors);
        self.always_sensors = uniq_clean(&self.always_sensors);
        self.siren_entities = uniq_clean(&self.siren_entities);
        self.siren_entity = self
            .siren_entity
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        self.alarm_lights = uniq_clean(&self.alarm_lights);
        self.camera_entities = uniq_clean(&self.camera_entities);
        self.keypad_entities = uniq_clean(&self.keypad_entities);

        self.alarm_light_effect = self.alarm_light_effect.trim().to_string();

        self.exit_delay = self.exit_delay.max(0);
        self.entry_delay = self.entry_delay.max(0);
        self.trigger_time = self.trigger_time.max(0);

        self.arm_home_action = label_or_default(&self.arm_home_action, DEFAULT_ARM_HOME_ACTION);
        self.arm_away_action = label_or_default(&self.arm_away_action, DEFAULT_ARM_AWAY_ACTION);
        self.disarm_action = label_or_default(&self.disarm_action, DEFAULT_DISARM_ACTION);
    }

    /// Configured sirens with the legacy single siren appended.
    pub fn sirens(&self) -> Vec<String> {
        let mut sirens = uniq_clean(&self.siren_entities);
        if let Some(legacy) = self.siren_entity.as_deref().map(str::trim) {
            if !legacy.is_empty() && !sirens.iter().any(|s| s == legacy) {
                sirens.push(legacy.to_string());
            }
        }
        sirens
    }

    pub fn is_perimeter(&self, entity_id: &str) -> bool {
        self.perimeter_sensors.iter().any(|e| e == entity_id)
    }

    pub fn is_motion(&self, entity_id: &str) -> bool {
        self.motion_sensors.iter().any(|e| e == entity_id)
    }

    pub fn is_always(&self, entity_id: &str) -> bool {
        self.always_sensors.iter().any(|e| e == entity_id)
    }

    pub fn is_keypad(&self, entity_id: &str) -> bool {
        self.keypad_enabled && self.keypad_entities.iter().any(|e| e == entity_id)
    }

    /// Sensors of every role, each listed once.
    pub fn sensor_entities(&self) -> Vec<String> {
        uniq_clean(
            self.perimeter_sensors
                .iter()
                .chain(&self.motion_sensors)
                .chain(&self.always_sensors),
        )
    }

    /// Keypads to listen to; none while keypad support is off.
    pub fn watched_keypads(&self) -> &[String] {
        if self.keypad_enabled {
            &self.keypad_entities
        } else {
            &[]
        }
    }

    pub fn exit_delay(&self) -> Duration {
        Duration::from_secs(self.exit_delay.max(0) as u64)
    }

    pub fn entry_delay(&self) -> Duration {
        Duration::from_secs(self.entry_delay.max(0) as u64)
    }

    /// Siren auto-stop delay; never shorter than one second.
    pub fn trigger_time(&self) -> Duration {
        Duration::from_secs(self.trigger_time.max(1) as u64)
    }

    /// Return a copy with the fields present in `update` replaced.
    pub fn with_update(&self, update: &ConfigUpdate) -> Self {
        let mut next = self.clone();

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = &update.$field {
                        next.$field = value.clone();
                    }
                )*
            };
        }

        apply!(
            name,
            perimeter_sensors,
            motion_sensors,
            always_sensors,
            siren_entities,
            alarm_lights,
            alarm_light_color,
            alarm_light_brightness,
            alarm_light_effect,
            alarm_light_restore,
            camera_entities,
            camera_show_only_triggered,
            exit_delay,
            entry_delay,
            trigger_time,
            force_arm,
            keypad_enabled,
            keypad_entities,
            arm_home_action,
            arm_away_action,
            disarm_action,
            master_pin,
        );

        // An empty legacy siren clears it
        if let Some(siren) = &update.siren_entity {
            next.siren_entity = Some(siren.clone());
        }

        next.normalize();
        next
    }
}

/// Partial panel configuration, as sent to `set_config`.
///
/// Only the fields present are applied; everything else keeps its current
/// value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub perimeter_sensors: Option<Vec<String>>,
    pub motion_sensors: Option<Vec<String>>,
    pub always_sensors: Option<Vec<String>>,
    pub siren_entities: Option<Vec<String>>,
    pub siren_entity: Option<String>,
    pub alarm_lights: Option<Vec<String>>,
    pub alarm_light_color: Option<String>,
    pub alarm_light_brightness: Option<i64>,
    pub alarm_light_effect: Option<String>,
    pub alarm_light_restore: Option<bool>,
    pub camera_entities: Option<Vec<String>>,
    pub camera_show_only_triggered: Option<bool>,
    pub exit_delay: Option<i64>,
    pub entry_delay: Option<i64>,
    pub trigger_time: Option<i64>,
    pub force_arm: Option<bool>,
    pub keypad_enabled: Option<bool>,
    pub keypad_entities: Option<Vec<String>>,
    pub arm_home_action: Option<String>,
    pub arm_away_action: Option<String>,
    pub disarm_action: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_pin")]
    pub master_pin: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniq_clean() {
        let cleaned = uniq_clean(["b", " a ", "", "b", "  ", "a", "c"]);
        assert_eq!(cleaned, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_defaults_from_empty_table() {
        let config: PanelConfig = toml::from_str("").unwrap();
        assert_eq!(config, PanelConfig::default());
        assert_eq!(config.alarm_light_color, "#ff0000");
        assert_eq!(config.alarm_light_brightness, 255);
        assert!(config.alarm_light_restore);
        assert_eq!(config.disarm_action, "disarm");
        assert!(config.master_pin.is_empty());
    }

    #[test]
    fn test_normalize_repairs_values() {
        let mut config: PanelConfig = toml::from_str(
            r#"
            name = "  "
            exit_delay = -3
            entry_delay = -1
            trigger_time = -10
            arm_home_action = ""
            arm_away_action = "  "
            disarm_action = "unlock"
            siren_entity = "  "
            "#,
        )
        .unwrap();
        config.normalize();

        assert_eq!(config.name, "ZigAlarm");
        assert_eq!(config.exit_delay, 0);
        assert_eq!(config.entry_delay, 0);
        assert_eq!(config.trigger_time, 0);
        assert_eq!(config.arm_home_action, "arm_home");
        assert_eq!(config.arm_away_action, "arm_away");
        assert_eq!(config.disarm_action, "unlock");
        assert_eq!(config.siren_entity, None);
        assert_eq!(config.trigger_time(), Duration::from_secs(1));
    }

    #[test]
    fn test_numeric_master_pin() {
        let config: PanelConfig = toml::from_str("master_pin = 1234").unwrap();
        assert_eq!(config.master_pin, "1234");

        let config: PanelConfig = toml::from_str("master_pin = \"0042\"").unwrap();
        assert_eq!(config.master_pin, "0042");
    }

    #[test]
    fn test_sirens_merge_legacy() {
        let config = PanelConfig {
            siren_entities: vec!["siren.hall".into(), "siren.hall".into()],
            siren_entity: Some("switch.outdoor".into()),
            ..Default::default()
        };
        assert_eq!(config.sirens(), vec!["siren.hall", "switch.outdoor"]);

        let config = PanelConfig {
            siren_entities: vec!["siren.hall".into()],
            siren_entity: Some("siren.hall".into()),
            ..Default::default()
        };
        assert_eq!(config.sirens(), vec!["siren.hall"]);
    }

    #[test]
    fn test_keypads_watched_only_when_enabled() {
        let mut config = PanelConfig {
            perimeter_sensors: vec!["binary_sensor.door".into()],
            motion_sensors: vec!["binary_sensor.hall".into()],
            always_sensors: vec!["binary_sensor.smoke".into(), "binary_sensor.door".into()],
            keypad_entities: vec!["sensor.keypad".into()],
            ..Default::default()
        };
        assert_eq!(
            config.sensor_entities(),
            vec!["binary_sensor.door", "binary_sensor.hall", "binary_sensor.smoke"]
        );
        assert!(config.watched_keypads().is_empty());
        assert!(!config.is_keypad("sensor.keypad"));

        config.keypad_enabled = true;
        assert_eq!(config.watched_keypads(), ["sensor.keypad".to_string()]);
        assert!(config.is_keypad("sensor.keypad"));
    }

    #[test]
    fn test_with_update_replaces_only_present_fields() {
        let config = PanelConfig {
            perimeter_sensors: vec!["binary_sensor.door".into()],
            exit_delay: 30,
            ..Default::default()
        };

        let update: ConfigUpdate = serde_json::from_value(serde_json::json!({
            "motion_sensors": ["binary_sensor.hall", " binary_sensor.hall"],
            "entry_delay": -5,
            "master_pin": 1234,
        }))
        .unwrap();

        let next = config.with_update(&update);
        assert_eq!(next.perimeter_sensors, vec!["binary_sensor.door"]);
        assert_eq!(next.motion_sensors, vec!["binary_sensor.hall"]);
        assert_eq!(next.exit_delay, 30);
        assert_eq!(next.entry_delay, 0);
        assert_eq!(next.master_pin, "1234");
    }

    #[test]
    fn test_update_rejects_unknown_fields() {
        let result: Result<ConfigUpdate, _> =
            serde_json::from_value(serde_json::json!({ "perimeter": ["binary_sensor.door"] }));
        assert!(result.is_err());
    }
}
