//! Siren and alarm-light control.
//!
//! Every call is fire-and-forget: a failed call is logged and the sequence
//! carries on with the next entity. Lights can be snapshotted before the
//! alarm overrides them and replayed on disarm.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::host::Host;
use super::host::HostError;
use super::host::ServiceCall;
use crate::config::PanelConfig;
use crate::engine::state::STATE_OFF;

pub const DOMAIN_LIGHT: &str = "light";
pub const DOMAIN_SWITCH: &str = "switch";
pub const DOMAIN_SIREN: &str = "siren";

/// Light attributes captured by a snapshot and replayed on restore.
const SNAPSHOT_ATTRIBUTES: [&str; 6] = [
    "brightness",
    "rgb_color",
    "hs_color",
    "xy_color",
    "color_temp",
    "effect",
];

/// Domain prefix of an entity id (`light.porch` -> `light`), empty if none.
pub fn domain_of(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map(|(domain, _)| domain)
        .unwrap_or("")
}

/// Domain used to switch a siren; unknown kinds are driven as switches.
fn siren_domain(entity_id: &str) -> &'static str {
    match domain_of(entity_id) {
        DOMAIN_LIGHT => DOMAIN_LIGHT,
        DOMAIN_SIREN => DOMAIN_SIREN,
        _ => DOMAIN_SWITCH,
    }
}

/// Parse `#RRGGBB` or `#RGB` into an RGB triple.
pub fn parse_hex_color(hex: &str) -> Option<[u8; 3]> {
    let digits = hex.trim().strip_prefix('#')?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let digits = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => digits.to_string(),
        _ => return None,
    };

    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Captured state of one light.
#[derive(Debug, Clone, PartialEq)]
pub struct LightSnapshotEntry {
    pub state: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl LightSnapshotEntry {
    /// The call that puts the light back the way it was.
    fn restore_call(&self, entity_id: &str) -> ServiceCall {
        if self.state == STATE_OFF {
            return ServiceCall::turn_off(DOMAIN_LIGHT, entity_id);
        }

        self.attributes
            .iter()
            .fold(ServiceCall::turn_on(DOMAIN_LIGHT, entity_id), |call, (k, v)| {
                call.with_data(k, v.clone())
            })
    }
}

/// Outcome of a restore pass.
#[derive(Debug, Default, PartialEq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub failures: Vec<(String, HostError)>,
}

/// Drives sirens and alarm lights for one panel.
#[derive(Debug, Default)]
pub struct OutputController {
    snapshot: BTreeMap<String, LightSnapshotEntry>,
}

impl OutputController {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> &BTreeMap<String, LightSnapshotEntry> {
        &self.snapshot
    }

    pub fn sirens_on(&self, config: &PanelConfig, host: &dyn Host) {
        self.switch_sirens(config, host, "turn_on");
    }

    pub fn sirens_off(&self, config: &PanelConfig, host: &dyn Host) {
        self.switch_sirens(config, host, "turn_off");
    }

    fn switch_sirens(&self, config: &PanelConfig, host: &dyn Host, service: &str) {
        for siren in config.sirens() {
            let call = ServiceCall::new(siren_domain(&siren), service, vec![siren.clone()]);
            dispatch(host, call);
        }
    }

    /// Switch alarm lights into their alarm look.
    ///
    /// With restore enabled and `capture` set, light-domain entities are
    /// snapshotted first. Without `capture` an existing snapshot is kept,
    /// so re-firing an active alarm never records the alarm colour as the
    /// state to restore.
    pub fn alarm_lights_on(&mut self, config: &PanelConfig, host: &dyn Host, capture: bool) {
        if !config.alarm_light_restore {
            self.snapshot.clear();
        }

        let (lights, others) = split_lights(&config.alarm_lights);
        if lights.is_empty() && others.is_empty() {
            return;
        }

        if config.alarm_light_restore && capture {
            self.snapshot.clear();
            for light in &lights {
                self.capture(light, host);
            }
        }

        for other in &others {
            dispatch(host, ServiceCall::turn_on(domain_of(other), other));
        }

        if !lights.is_empty() {
            let mut call = ServiceCall::new(DOMAIN_LIGHT, "turn_on", lights);
            if let Some(rgb) = parse_hex_color(&config.alarm_light_color) {
                call = call.with_data("rgb_color", json!(rgb));
            }
            if (1..=255).contains(&config.alarm_light_brightness) {
                call = call.with_data("brightness", json!(config.alarm_light_brightness));
            }
            if !config.alarm_light_effect.is_empty() {
                call = call.with_data("effect", json!(config.alarm_light_effect));
            }
            dispatch(host, call);
        }
    }

    /// Undo `alarm_lights_on`: switch non-light outputs off and either
    /// replay the snapshot or turn the lights off.
    ///
    /// The snapshot is always empty afterwards.
    pub fn alarm_lights_restore_or_off(
        &mut self,
        config: &PanelConfig,
        host: &dyn Host,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        let snapshot = std::mem::take(&mut self.snapshot);

        let (lights, others) = split_lights(&config.alarm_lights);
        if lights.is_empty() && others.is_empty() {
            return report;
        }

        for other in &others {
            dispatch(host, ServiceCall::turn_off(domain_of(other), other));
        }

        if config.alarm_light_restore && !snapshot.is_empty() {
            for (entity_id, entry) in snapshot {
                match host.call_service(entry.restore_call(&entity_id)) {
                    Ok(()) => report.restored.push(entity_id),
                    Err(e) => {
                        warn!("Failed to restore light {}: {}", entity_id, e);
                        report.failures.push((entity_id, e));
                    }
                }
            }
            info!(
                "Restored {} light(s), {} failure(s)",
                report.restored.len(),
                report.failures.len()
            );
        } else if !lights.is_empty() {
            dispatch(host, ServiceCall::new(DOMAIN_LIGHT, "turn_off", lights));
        }

        report
    }

    fn capture(&mut self, entity_id: &str, host: &dyn Host) {
        let Some(reading) = host.reading(entity_id) else {
            debug!("No state for {}, not snapshotted", entity_id);
            return;
        };

        let attributes = SNAPSHOT_ATTRIBUTES
            .iter()
            .filter_map(|key| reading.attribute(key).map(|v| (key.to_string(), v.clone())))
            .collect();

        self.snapshot.insert(
            entity_id.to_string(),
            LightSnapshotEntry {
                state: reading.state,
                attributes,
            },
        );
    }
}

/// Split alarm outputs into light entities and switch/siren entities.
/// Other domains cannot be driven as an alarm light and are skipped.
fn split_lights(entities: &[String]) -> (Vec<String>, Vec<String>) {
    let mut lights = Vec::new();
    let mut others = Vec::new();
    for entity_id in entities {
        match domain_of(entity_id) {
            DOMAIN_LIGHT => lights.push(entity_id.clone()),
            DOMAIN_SWITCH | DOMAIN_SIREN => others.push(entity_id.clone()),
            _ => debug!("Skipping alarm output {} of unsupported domain", entity_id),
        }
    }
    (lights, others)
}

fn dispatch(host: &dyn Host, call: ServiceCall) {
    debug!(
        "{}.{} -> {:?}",
        call.domain, call.service, call.entity_ids
    );
    if let Err(e) = host.call_service(call) {
        warn!("Output call failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::host::mock::MockHost;
    use crate::engine::EntityState;

    fn config() -> PanelConfig {
        PanelConfig {
            siren_entities: vec!["siren.hall".into(), "zwave.bell".into()],
            siren_entity: Some("switch.outdoor_siren".into()),
            alarm_lights: vec![
                "light.porch".into(),
                "light.living".into(),
                "switch.camera_spotlight".into(),
                "camera.garden".into(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff0000"), Some([255, 0, 0]));
        assert_eq!(parse_hex_color("#f00"), Some([255, 0, 0]));
        assert_eq!(parse_hex_color(" #0a1B2c "), Some([10, 27, 44]));
        assert_eq!(parse_hex_color("ff0000"), None);
        assert_eq!(parse_hex_color("#zz0000"), None);
        assert_eq!(parse_hex_color("#ff00"), None);
        assert_eq!(parse_hex_color("#+f0000"), None);
        assert_eq!(parse_hex_color("#ffé000"), None);
        assert_eq!(parse_hex_color(""), None);
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("light.porch"), "light");
        assert_eq!(domain_of("porch"), "");
        assert_eq!(siren_domain("zwave.bell"), "switch");
        assert_eq!(siren_domain("siren.hall"), "siren");
    }

    #[test]
    fn test_sirens_on_infers_domains() {
        let host = MockHost::new();
        OutputController::new().sirens_on(&config(), &host);

        let calls: Vec<(String, String, Vec<String>)> = host
            .calls()
            .into_iter()
            .map(|c| (c.domain, c.service, c.entity_ids))
            .collect();
        assert_eq!(
            calls,
            vec![
                ("siren".into(), "turn_on".into(), vec!["siren.hall".into()]),
                ("switch".into(), "turn_on".into(), vec!["zwave.bell".into()]),
                ("switch".into(), "turn_on".into(), vec!["switch.outdoor_siren".into()]),
            ]
        );
    }

    #[test]
    fn test_sirens_continue_past_failures() {
        let host = MockHost::new();
        host.fail_calls_for("siren.hall");
        OutputController::new().sirens_off(&config(), &host);

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.service == "turn_off"));
    }

    #[test]
    fn test_alarm_lights_on_snapshots_and_combines_lights() {
        let host = MockHost::new();
        host.seed(
            "light.porch",
            EntityState::new("on")
                .with_attribute("brightness", json!(80))
                .with_attribute("color_temp", json!(370))
                .with_attribute("effect", serde_json::Value::Null)
                .with_attribute("friendly_name", json!("Porch")),
        );
        host.seed("light.living", EntityState::new("off"));

        let config = PanelConfig {
            alarm_light_effect: "strobe".into(),
            ..config()
        };
        let mut outputs = OutputController::new();
        outputs.alarm_lights_on(&config, &host, true);

        let snapshot = outputs.snapshot();
        assert_eq!(snapshot.len(), 2);
        let porch = &snapshot["light.porch"];
        assert_eq!(porch.state, "on");
        assert_eq!(porch.attributes.len(), 2);
        assert_eq!(porch.attributes["brightness"], json!(80));
        assert_eq!(porch.attributes["color_temp"], json!(370));
        assert_eq!(snapshot["light.living"].state, "off");

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ServiceCall::turn_on("switch", "switch.camera_spotlight"));
        assert_eq!(calls[1].domain, "light");
        assert_eq!(calls[1].entity_ids, vec!["light.porch", "light.living"]);
        assert_eq!(calls[1].data["rgb_color"], json!([255, 0, 0]));
        assert_eq!(calls[1].data["brightness"], json!(255));
        assert_eq!(calls[1].data["effect"], json!("strobe"));
    }

    #[test]
    fn test_alarm_lights_on_omits_invalid_fields() {
        let host = MockHost::new();
        let config = PanelConfig {
            alarm_lights: vec!["light.porch".into()],
            alarm_light_color: "red".into(),
            alarm_light_brightness: 300,
            alarm_light_restore: false,
            ..Default::default()
        };
        let mut outputs = OutputController::new();
        outputs.alarm_lights_on(&config, &host, true);

        assert!(outputs.snapshot().is_empty());
        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].data.is_empty());
    }

    #[test]
    fn test_refire_keeps_existing_snapshot() {
        let host = MockHost::new();
        host.seed("light.porch", EntityState::new("off"));
        let mut outputs = OutputController::new();
        outputs.alarm_lights_on(&config(), &host, true);

        host.seed(
            "light.porch",
            EntityState::new("on").with_attribute("rgb_color", json!([255, 0, 0])),
        );
        outputs.alarm_lights_on(&config(), &host, false);

        assert_eq!(outputs.snapshot()["light.porch"].state, "off");
    }

    #[test]
    fn test_restore_replays_snapshot_and_clears_it() {
        let host = MockHost::new();
        host.seed(
            "light.porch",
            EntityState::new("on").with_attribute("brightness", json!(80)),
        );
        host.seed("light.living", EntityState::new("off"));

        let mut outputs = OutputController::new();
        outputs.alarm_lights_on(&config(), &host, true);
        host.take_calls();

        let report = outputs.alarm_lights_restore_or_off(&config(), &host);
        assert_eq!(report.restored, vec!["light.living", "light.porch"]);
        assert!(report.failures.is_empty());
        assert!(outputs.snapshot().is_empty());

        let calls = host.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], ServiceCall::turn_off("switch", "switch.camera_spotlight"));
        assert_eq!(calls[1], ServiceCall::turn_off("light", "light.living"));
        assert_eq!(
            calls[2],
            ServiceCall::turn_on("light", "light.porch").with_data("brightness", json!(80))
        );
    }

    #[test]
    fn test_restore_failure_is_collected_and_skipped() {
        let host = MockHost::new();
        host.seed("light.porch", EntityState::new("on"));
        host.seed("light.living", EntityState::new("on"));

        let mut outputs = OutputController::new();
        outputs.alarm_lights_on(&config(), &host, true);
        host.take_calls();
        host.fail_calls_for("light.living");

        let report = outputs.alarm_lights_restore_or_off(&config(), &host);
        assert_eq!(report.restored, vec!["light.porch"]);
        assert_eq!(
            report.failures,
            vec![("light.living".to_string(), HostError::NoRoute("light.living".into()))]
        );
        assert!(outputs.snapshot().is_empty());
    }

    #[test]
    fn test_restore_disabled_turns_lights_off() {
        let host = MockHost::new();
        let config = PanelConfig {
            alarm_light_restore: false,
            ..config()
        };

        let mut outputs = OutputController::new();
        let report = outputs.alarm_lights_restore_or_off(&config, &host);
        assert_eq!(report, RestoreReport::default());

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].service, "turn_off");
        assert_eq!(calls[1].entity_ids, vec!["light.porch", "light.living"]);
    }
}
