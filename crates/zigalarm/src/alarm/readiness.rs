use serde::Serialize;

use super::state::ArmMode;
use crate::config::PanelConfig;

/// Which arm modes are currently permitted, and why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    /// Active perimeter and motion sensors, sorted
    pub open_sensors: Vec<String>,
    pub ready_home: bool,
    pub ready_away: bool,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            open_sensors: Vec::new(),
            ready_home: true,
            ready_away: true,
        }
    }
}

impl Readiness {
    /// Evaluate readiness from the current readings.
    ///
    /// `is_active` answers whether a sensor's last reading is the canonical
    /// active value; missing or unknown readings must answer `false`.
    pub fn compute(config: &PanelConfig, is_active: impl Fn(&str) -> bool) -> Self {
        let open_perimeter = config
            .perimeter_sensors
            .iter()
            .any(|entity_id| is_active(entity_id));

        let mut open_sensors: Vec<String> = config
            .perimeter_sensors
            .iter()
            .chain(&config.motion_sensors)
            .filter(|entity_id| is_active(entity_id))
            .cloned()
            .collect();
        open_sensors.sort();
        open_sensors.dedup();

        Self {
            ready_home: !open_perimeter,
            ready_away: open_sensors.is_empty(),
            open_sensors,
        }
    }

    pub fn is_ready(&self, mode: ArmMode) -> bool {
        match mode {
            ArmMode::Home => self.ready_home,
            ArmMode::Away => self.ready_away,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn config() -> PanelConfig {
        PanelConfig {
            perimeter_sensors: vec!["binary_sensor.front_door".into(), "binary_sensor.window".into()],
            motion_sensors: vec!["binary_sensor.hall_motion".into(), "binary_sensor.window".into()],
            always_sensors: vec!["binary_sensor.smoke".into()],
            ..Default::default()
        }
    }

    fn readiness(active: &[&str]) -> Readiness {
        let active: HashSet<&str> = active.iter().copied().collect();
        Readiness::compute(&config(), |id| active.contains(id))
    }

    #[test]
    fn test_all_closed_is_ready() {
        assert_eq!(readiness(&[]), Readiness::default());
    }

    #[test]
    fn test_open_perimeter_blocks_both_modes() {
        let r = readiness(&["binary_sensor.front_door"]);
        assert!(!r.ready_home);
        assert!(!r.ready_away);
        assert_eq!(r.open_sensors, vec!["binary_sensor.front_door"]);
    }

    #[test]
    fn test_motion_blocks_away_only() {
        let r = readiness(&["binary_sensor.hall_motion"]);
        assert!(r.ready_home);
        assert!(!r.ready_away);
        assert!(r.is_ready(ArmMode::Home));
        assert!(!r.is_ready(ArmMode::Away));
    }

    #[test]
    fn test_always_sensors_do_not_affect_readiness() {
        let r = readiness(&["binary_sensor.smoke"]);
        assert_eq!(r, Readiness::default());
    }

    #[test]
    fn test_open_sensors_sorted_and_deduplicated() {
        let r = readiness(&[
            "binary_sensor.window",
            "binary_sensor.hall_motion",
            "binary_sensor.front_door",
        ]);
        assert_eq!(
            r.open_sensors,
            vec![
                "binary_sensor.front_door",
                "binary_sensor.hall_motion",
                "binary_sensor.window",
            ]
        );
    }

    #[test]
    fn test_readiness_matches_definition_for_every_subset() {
        let sensors = [
            "binary_sensor.front_door",
            "binary_sensor.window",
            "binary_sensor.hall_motion",
            "binary_sensor.smoke",
        ];
        let config = config();

        for mask in 0u32..(1 << sensors.len()) {
            let active: Vec<&str> = sensors
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, s)| *s)
                .collect();
            let r = readiness(&active);

            let perimeter_open = config.perimeter_sensors.iter().any(|p| active.contains(&p.as_str()));
            let any_open = perimeter_open
                || config.motion_sensors.iter().any(|m| active.contains(&m.as_str()));
            assert_eq!(r.ready_home, !perimeter_open, "active={:?}", active);
            assert_eq!(r.ready_away, !any_open, "active={:?}", active);
        }
    }
}
