pub mod alarm;
pub mod api;
pub mod config;
mod engine;
mod integrations;

pub use alarm::AlarmState;
pub use alarm::Host;
pub use alarm::PanelHandle;
pub use alarm::Registry;
pub use config::Config;
pub use config::LogLevel;
pub use engine::BusEvent;
pub use engine::Engine;
pub use engine::EntityState;
pub use engine::Event;
pub use engine::ServiceCall;
pub use engine::State;
