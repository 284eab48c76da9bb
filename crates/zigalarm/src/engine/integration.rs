use std::error::Error;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;
use tracing::error;
use tracing::info;

use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use crate::config::Config;

/// Readings and entity lifecycle flow to the engine over a bounded channel
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Service calls flow to integrations unbounded; panels never wait on outputs
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// Outcome of an integration lifecycle step
pub type IntegrationResult = Result<(), Box<dyn Error + Send>>;

/// `Ok(None)` means the integration is not configured
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

pub type IntegrationFactory = fn(&IntegrationContext) -> IntegrationFactoryResult;

/// What a factory gets to decide whether and how to start.
pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

impl<'a> IntegrationContext<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

#[distributed_slice]
pub static REGISTRY: [IntegrationFactory];

/// Run every registered factory, keeping the integrations that are
/// configured. A failing factory is logged and skipped.
pub fn build_all(ctx: &IntegrationContext) -> Vec<Box<dyn Integration>> {
    REGISTRY
        .iter()
        .filter_map(|factory| match factory(ctx) {
            Ok(Some(integration)) => {
                info!("Integration '{}' configured", integration.name());
                Some(integration)
            }
            Ok(None) => None,
            Err(e) => {
                error!("failed to setup integration: {:#}", e);
                None
            }
        })
        .collect()
}

/// A source of entity readings and a sink for service calls
#[async_trait]
pub trait Integration: Send + Sync {
    /// Name used to route service calls back to this integration
    fn name(&self) -> &str;

    /// Whether service calls for entities no integration has announced are
    /// sent here. Output-only devices (relays, sirens) never report a state.
    fn accepts_unannounced(&self) -> bool {
        false
    }

    /// Connect and start reporting. Every entity must be announced with
    /// `EntityDiscovered` before its first `StateChanged`.
    async fn setup(&mut self, tx: FromIntegrationSender) -> IntegrationResult;

    /// Carry out a service call on entities this integration owns
    async fn handle_message(&mut self, msg: ToIntegrationMessage) -> IntegrationResult;

    /// Shut down the integration gracefully
    async fn shutdown(&mut self) -> IntegrationResult;
}
