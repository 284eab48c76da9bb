//! Running panels by entity id.
//!
//! A panel is added when it starts and removed when its task ends, however
//! it ends. Lookups of unknown ids fail with [`RegistryError::NotFound`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::info;
use tracing::warn;

use super::host::Host;
use super::panel::Panel;
use super::panel::PanelError;
use super::panel::PanelHandle;
use super::panel::PanelStatus;
use super::state::AlarmState;
use crate::config::ConfigUpdate;
use crate::config::PanelConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No alarm panel with entity id {0}")]
    NotFound(String),

    #[error(transparent)]
    Panel(#[from] PanelError),
}

#[derive(Debug, Default)]
pub struct Registry {
    panels: RwLock<BTreeMap<String, PanelHandle>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn a panel and register it until its task ends.
    ///
    /// A panel already registered under the same id is shut down and
    /// replaced.
    pub fn start(
        self: &Arc<Self>,
        entity_id: &str,
        config: PanelConfig,
        host: Arc<dyn Host>,
        restored: AlarmState,
    ) -> PanelHandle {
        let (handle, task) = Panel::spawn(entity_id, config, host, restored);

        let replaced = self
            .panels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string(), handle.clone());
        if let Some(old) = replaced {
            warn!("Replacing running panel {}", entity_id);
            let _ = old.shutdown();
        }

        let registry = Arc::downgrade(self);
        let watched = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                warn!("Panel {} task failed: {}", watched.entity_id(), e);
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove_if_current(&watched);
            }
        });

        handle
    }

    fn remove_if_current(&self, handle: &PanelHandle) {
        let mut panels = self.panels.write().unwrap_or_else(PoisonError::into_inner);
        if panels
            .get(handle.entity_id())
            .is_some_and(|current| current.same_panel(handle))
        {
            panels.remove(handle.entity_id());
            info!("Panel {} unregistered", handle.entity_id());
        }
    }

    pub fn get(&self, entity_id: &str) -> Result<PanelHandle, RegistryError> {
        self.panels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(entity_id.to_string()))
    }

    /// Registered panels, ordered by entity id.
    pub fn list(&self) -> Vec<PanelHandle> {
        self.panels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn statuses(&self) -> Vec<Arc<PanelStatus>> {
        self.list().iter().map(PanelHandle::status).collect()
    }

    /// Route a partial configuration to the panel that owns `entity_id`.
    pub fn set_config(&self, entity_id: &str, update: ConfigUpdate) -> Result<(), RegistryError> {
        self.get(entity_id)?.set_config(update)?;
        Ok(())
    }

    /// Stop one panel and wait for it to go.
    pub async fn stop(&self, entity_id: &str) -> Result<(), RegistryError> {
        let handle = self.get(entity_id)?;
        handle.shutdown()?;
        handle.stopped().await;
        self.remove_if_current(&handle);
        Ok(())
    }

    /// Stop every panel and wait for all of them.
    pub async fn stop_all(&self) {
        let handles = self.list();
        for handle in &handles {
            let _ = handle.shutdown();
        }
        for handle in &handles {
            handle.stopped().await;
            self.remove_if_current(handle);
        }
    }
}
