use tracing::debug;

use super::host::EntityState;
use crate::config::PanelConfig;

/// Attributes a keypad may carry the entered code in, by priority.
const CODE_ATTRIBUTES: [&str; 4] = ["action_code", "code", "pin", "user_code"];

/// What a keypad asked the panel to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeypadIntent {
    ArmHome,
    ArmAway,
    Disarm { code: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeypadDecision {
    /// Forward the intent to the state machine
    Authorized(KeypadIntent),

    /// Disarm with a wrong PIN
    Denied { keypad: String, action: String },

    /// The reading is not one of the configured action labels
    Ignored,
}

/// Extract the entered code from a keypad reading.
pub fn entered_code(reading: &EntityState) -> Option<String> {
    CODE_ATTRIBUTES.iter().find_map(|key| {
        let code = match reading.attribute(key)? {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!code.is_empty()).then_some(code)
    })
}

/// Map a keypad reading to a panel intent, checking the master PIN on disarm.
///
/// Labels are compared case-sensitively. Only disarm is PIN protected; arm
/// actions are authorized regardless of the code.
pub fn authorize(config: &PanelConfig, keypad: &str, reading: &EntityState) -> KeypadDecision {
    let action = reading.state.as_str();
    let code = entered_code(reading);

    if action == config.arm_home_action {
        KeypadDecision::Authorized(KeypadIntent::ArmHome)
    } else if action == config.arm_away_action {
        KeypadDecision::Authorized(KeypadIntent::ArmAway)
    } else if action == config.disarm_action {
        if !config.master_pin.is_empty() && code.as_deref() != Some(config.master_pin.as_str()) {
            return KeypadDecision::Denied {
                keypad: keypad.to_string(),
                action: action.to_string(),
            };
        }
        KeypadDecision::Authorized(KeypadIntent::Disarm { code })
    } else {
        debug!("Keypad {} reported unmapped action '{}'", keypad, action);
        KeypadDecision::Ignored
    }
}
