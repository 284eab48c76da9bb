use std::str::FromStr;

use serde::Serialize;
use strum::AsRefStr;
use strum::Display;
use strum::EnumString;

/// The six states of an alarm panel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Disarmed,
    Arming,
    ArmedHome,
    ArmedAway,
    Pending,
    Triggered,
}

/// The two armed modes a request can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmMode {
    Home,
    Away,
}

/// Which sensor roles can start the entry delay in an armed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedProfile {
    pub perimeter: bool,
    pub motion: bool,
}

impl ArmMode {
    pub fn target(self) -> AlarmState {
        match self {
            ArmMode::Home => AlarmState::ArmedHome,
            ArmMode::Away => AlarmState::ArmedAway,
        }
    }

    /// Name of the request, as used in notifications.
    pub fn action(self) -> &'static str {
        match self {
            ArmMode::Home => "arm_home",
            ArmMode::Away => "arm_away",
        }
    }
}

impl AlarmState {
    /// Parse a persisted state label; anything unknown is `Disarmed`.
    pub fn from_label(label: &str) -> Self {
        Self::from_str(label.trim()).unwrap_or_default()
    }

    /// State to resume in after a restart.
    ///
    /// An interrupted exit delay never completed, so the panel comes back
    /// disarmed. Everything else resumes as persisted.
    pub fn restored(label: &str) -> Self {
        match Self::from_label(label) {
            AlarmState::Arming => AlarmState::Disarmed,
            other => other,
        }
    }

    pub fn profile(self) -> Option<ArmedProfile> {
        match self {
            AlarmState::ArmedHome => Some(ArmedProfile {
                perimeter: true,
                motion: false,
            }),
            AlarmState::ArmedAway => Some(ArmedProfile {
                perimeter: true,
                motion: true,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip() {
        for state in [
            AlarmState::Disarmed,
            AlarmState::Arming,
            AlarmState::ArmedHome,
            AlarmState::ArmedAway,
            AlarmState::Pending,
            AlarmState::Triggered,
        ] {
            assert_eq!(AlarmState::from_label(state.as_ref()), state);
        }
        assert_eq!(AlarmState::ArmedAway.to_string(), "armed_away");
    }

    #[test]
    fn test_corrupt_label_falls_back_to_disarmed() {
        assert_eq!(AlarmState::from_label(""), AlarmState::Disarmed);
        assert_eq!(AlarmState::from_label("armed_night"), AlarmState::Disarmed);
        assert_eq!(AlarmState::from_label("ARMED_AWAY"), AlarmState::Disarmed);
        assert_eq!(AlarmState::from_label(" triggered "), AlarmState::Triggered);
    }

    #[test]
    fn test_restored_arming_is_disarmed() {
        assert_eq!(AlarmState::restored("arming"), AlarmState::Disarmed);
        assert_eq!(AlarmState::restored("pending"), AlarmState::Pending);
        assert_eq!(AlarmState::restored("armed_home"), AlarmState::ArmedHome);
    }

    #[test]
    fn test_profiles() {
        assert_eq!(
            AlarmState::ArmedHome.profile(),
            Some(ArmedProfile {
                perimeter: true,
                motion: false
            })
        );
        assert!(AlarmState::ArmedAway.profile().unwrap().motion);
        assert_eq!(AlarmState::Pending.profile(), None);
    }
}
