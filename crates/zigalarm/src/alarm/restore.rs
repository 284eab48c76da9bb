//! Persisted alarm states.
//!
//! A small JSON object mapping panel entity ids to state labels. It is read
//! once at start and rewritten after every transition, through a temporary
//! file renamed over the old one so a crash never leaves half a file.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tokio::sync::broadcast;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::host::BusEvent;
use super::state::AlarmState;

/// Bus event carrying panel transitions.
const STATE_CHANGED_EVENT: &str = "zigalarm_state_changed";

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("Failed to access {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("Malformed state file {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),
}

#[derive(Debug)]
pub struct RestoreStore {
    path: PathBuf,
    labels: BTreeMap<String, String>,
}

impl RestoreStore {
    /// Load the state file; a missing file is an empty store.
    ///
    /// Entries whose value is not a string are kept as empty labels and so
    /// restore as disarmed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RestoreError> {
        let path = path.as_ref().to_path_buf();

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No state file at {}, starting fresh", path.display());
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(RestoreError::Io(path, e)),
        };

        let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(e) => return Err(RestoreError::Parse(path, e)),
        };
        let labels = raw
            .into_iter()
            .map(|(entity_id, label)| (entity_id, label.as_str().unwrap_or_default().to_string()))
            .collect();

        Ok(Self { path, labels })
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// State a panel resumes in; panels never seen before start disarmed.
    pub fn state_for(&self, entity_id: &str) -> AlarmState {
        self.labels
            .get(entity_id)
            .map(|label| AlarmState::restored(label))
            .unwrap_or_default()
    }

    /// Remember a panel's new state and persist the whole file.
    pub fn record(&mut self, entity_id: &str, state: &str) -> Result<(), RestoreError> {
        if self.labels.get(entity_id).map(String::as_str) == Some(state) {
            return Ok(());
        }
        self.labels.insert(entity_id.to_string(), state.to_string());
        self.save()
    }

    fn save(&self) -> Result<(), RestoreError> {
        let io_err = |e| RestoreError::Io(self.path.clone(), e);

        let json = serde_json::to_vec_pretty(&self.labels)
            .map_err(|e| RestoreError::Parse(self.path.clone(), e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        let tmp = self.path.with_file_name(format!(".{}.tmp", file_name));

        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!("Persisted {} panel state(s)", self.labels.len());
        Ok(())
    }

    /// Follow the event bus, persisting every panel transition until the
    /// bus closes.
    pub async fn follow(mut self, mut events: broadcast::Receiver<BusEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("State persister lagged, {} event(s) dropped", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if event.event_type != STATE_CHANGED_EVENT {
                continue;
            }

            let (Some(entity_id), Some(to)) = (
                event.data.get("entity_id").and_then(|v| v.as_str()),
                event.data.get("to").and_then(|v| v.as_str()),
            ) else {
                warn!("Ignoring malformed {} event", STATE_CHANGED_EVENT);
                continue;
            };

            if let Err(e) = self.record(entity_id, to) {
                warn!("Failed to persist state of {}: {}", entity_id, e);
            }
        }
    }
}
