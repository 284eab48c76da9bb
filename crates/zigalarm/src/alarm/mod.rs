//! Alarm panels: the state machine and the pieces it is built from.

pub mod host;
pub mod keypad;
pub mod output;
pub mod panel;
pub mod readiness;
pub mod registry;
pub mod restore;
pub mod state;
pub mod timer;

pub use host::Host;
pub use host::HostError;
pub use host::PanelEvent;
pub use panel::Panel;
pub use panel::PanelCommand;
pub use panel::PanelError;
pub use panel::PanelHandle;
pub use panel::PanelStatus;
pub use readiness::Readiness;
pub use registry::Registry;
pub use registry::RegistryError;
pub use restore::RestoreError;
pub use restore::RestoreStore;
pub use state::AlarmState;
pub use state::ArmMode;
