mod engine;
mod event;
mod integration;
mod message;
pub mod state;

pub use engine::Engine;
pub use event::BusEvent;
pub use event::Event;
pub use event::StateChangeHandler;
pub use event::Subscription;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::FromIntegrationMessage;
pub use message::ServiceCall;
pub use message::ToIntegrationMessage;
pub use state::EntityState;
pub use state::State;
