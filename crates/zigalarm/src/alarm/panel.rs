//! The alarm state machine.
//!
//! Each panel runs as its own task and owns all of its mutable state. Sensor
//! and keypad changes, imperative commands, elapsed timers and
//! reconfiguration all arrive as [`PanelMessage`]s on one channel and are
//! processed to completion one at a time, so no locking is needed and
//! timers can never race a transition. The outside world holds a cloneable
//! [`PanelHandle`] and reads a [`PanelStatus`] snapshot published after every
//! message.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::host::Event;
use super::host::EntityState;
use super::host::Host;
use super::host::PanelEvent;
use super::host::StateChangeHandler;
use super::host::Subscription;
use super::keypad;
use super::keypad::KeypadDecision;
use super::keypad::KeypadIntent;
use super::output::OutputController;
use super::readiness::Readiness;
use super::state::AlarmState;
use super::state::ArmMode;
use super::timer::TimerFired;
use super::timer::TimerKind;
use super::timer::Timers;
use crate::config::ConfigUpdate;
use crate::config::PanelConfig;

pub type PanelSender = mpsc::UnboundedSender<PanelMessage>;
pub type PanelReceiver = mpsc::UnboundedReceiver<PanelMessage>;

/// The four imperative actions a panel exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    ArmHome,
    ArmAway,
    /// The code is informational; PIN checks happen at the keypad
    Disarm { code: Option<String> },
    Trigger,
}

#[derive(Debug)]
pub enum PanelMessage {
    SensorChanged {
        entity_id: String,
        reading: EntityState,
    },
    KeypadChanged {
        entity_id: String,
        reading: EntityState,
    },
    Command(PanelCommand),
    TimerElapsed(TimerFired),
    Reconfigure(Box<ConfigUpdate>),
    Shutdown,
}

impl From<TimerFired> for PanelMessage {
    fn from(fired: TimerFired) -> Self {
        PanelMessage::TimerElapsed(fired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PanelError {
    #[error("Panel {0} is not running")]
    Closed(String),
}

/// Read-only view of a panel, as served to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelStatus {
    pub entity_id: String,
    pub name: String,
    pub state: AlarmState,
    pub open_sensors: Vec<String>,
    pub ready_to_arm_home: bool,
    pub ready_to_arm_away: bool,
    pub last_trigger_entity: Option<String>,
    pub force_arm: bool,
    pub keypad_enabled: bool,
    pub camera_entities: Vec<String>,
    pub camera_show_only_triggered: bool,
    pub exit_delay: i64,
    pub entry_delay: i64,
    pub trigger_time: i64,
}

impl PanelStatus {
    fn new(
        entity_id: &str,
        config: &PanelConfig,
        state: AlarmState,
        readiness: &Readiness,
        last_trigger_entity: Option<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            name: config.name.clone(),
            state,
            open_sensors: readiness.open_sensors.clone(),
            ready_to_arm_home: readiness.ready_home,
            ready_to_arm_away: readiness.ready_away,
            last_trigger_entity,
            force_arm: config.force_arm,
            keypad_enabled: config.keypad_enabled,
            camera_entities: config.camera_entities.clone(),
            camera_show_only_triggered: config.camera_show_only_triggered,
            exit_delay: config.exit_delay,
            entry_delay: config.entry_delay,
            trigger_time: config.trigger_time,
        }
    }
}

/// Cloneable handle to a running panel.
#[derive(Clone)]
pub struct PanelHandle {
    entity_id: String,
    tx: PanelSender,
    status: Arc<ArcSwap<PanelStatus>>,
}

impl std::fmt::Debug for PanelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelHandle")
            .field("entity_id", &self.entity_id)
            .finish_non_exhaustive()
    }
}

impl PanelHandle {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Snapshot as of the last processed message.
    pub fn status(&self) -> Arc<PanelStatus> {
        self.status.load_full()
    }

    pub fn arm_home(&self) -> Result<(), PanelError> {
        self.send(PanelMessage::Command(PanelCommand::ArmHome))
    }

    pub fn arm_away(&self) -> Result<(), PanelError> {
        self.send(PanelMessage::Command(PanelCommand::ArmAway))
    }

    pub fn disarm(&self, code: Option<String>) -> Result<(), PanelError> {
        self.send(PanelMessage::Command(PanelCommand::Disarm { code }))
    }

    pub fn trigger(&self) -> Result<(), PanelError> {
        self.send(PanelMessage::Command(PanelCommand::Trigger))
    }

    pub fn set_config(&self, update: ConfigUpdate) -> Result<(), PanelError> {
        self.send(PanelMessage::Reconfigure(Box::new(update)))
    }

    /// Ask the panel to stop. Timers are cancelled and subscriptions
    /// released; outputs are left as they are.
    pub fn shutdown(&self) -> Result<(), PanelError> {
        self.send(PanelMessage::Shutdown)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Resolves once the panel task has stopped taking messages.
    pub async fn stopped(&self) {
        self.tx.closed().await
    }

    /// Whether both handles address the same running panel.
    pub fn same_panel(&self, other: &PanelHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    fn send(&self, msg: PanelMessage) -> Result<(), PanelError> {
        self.tx
            .send(msg)
            .map_err(|_| PanelError::Closed(self.entity_id.clone()))
    }
}

pub struct Panel {
    entity_id: String,
    config: PanelConfig,
    host: Arc<dyn Host>,
    state: AlarmState,
    arming_target: Option<AlarmState>,
    readiness: Readiness,
    last_trigger_entity: Option<String>,
    outputs: OutputController,
    timers: Timers<PanelMessage>,
    tx: PanelSender,
    subscriptions: Vec<Subscription>,
    status: Arc<ArcSwap<PanelStatus>>,
}

impl Panel {
    /// Start a panel task.
    ///
    /// `restored` is the state to resume in; see [`AlarmState::restored`].
    /// A restored `Pending` gets a fresh entry delay; armed and triggered
    /// states resume without re-firing outputs.
    pub fn spawn(
        entity_id: impl Into<String>,
        config: PanelConfig,
        host: Arc<dyn Host>,
        restored: AlarmState,
    ) -> (PanelHandle, JoinHandle<()>) {
        let entity_id = entity_id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let readiness = Readiness::default();
        let status = Arc::new(ArcSwap::from_pointee(PanelStatus::new(
            &entity_id,
            &config,
            AlarmState::Disarmed,
            &readiness,
            None,
        )));

        let mut panel = Panel {
            entity_id: entity_id.clone(),
            config,
            host,
            state: AlarmState::Disarmed,
            arming_target: None,
            readiness,
            last_trigger_entity: None,
            outputs: OutputController::new(),
            timers: Timers::new(tx.clone()),
            tx: tx.clone(),
            subscriptions: Vec::new(),
            status: status.clone(),
        };
        panel.resume(restored);

        let handle = PanelHandle {
            entity_id,
            tx,
            status,
        };
        (handle, tokio::spawn(panel.run(rx)))
    }

    fn resume(&mut self, restored: AlarmState) {
        self.state = match restored {
            AlarmState::Arming => AlarmState::Disarmed,
            other => other,
        };

        if self.state == AlarmState::Pending {
            self.timers
                .start(TimerKind::Pending, self.config.entry_delay());
        }

        self.install_listeners();
        self.recompute_readiness();
        self.publish_status();
        info!("Panel {} started in state {}", self.entity_id, self.state);
    }

    async fn run(mut self, mut rx: PanelReceiver) {
        while let Some(msg) = rx.recv().await {
            if matches!(msg, PanelMessage::Shutdown) {
                break;
            }
            self.handle(msg);
            self.publish_status();
        }

        rx.close();
        self.timers.cancel_all();
        self.subscriptions.clear();
        info!("Panel {} stopped", self.entity_id);
    }

    fn handle(&mut self, msg: PanelMessage) {
        match msg {
            PanelMessage::SensorChanged { entity_id, reading } => {
                self.on_sensor_change(&entity_id, &reading)
            }
            PanelMessage::KeypadChanged { entity_id, reading } => {
                self.on_keypad_change(&entity_id, &reading)
            }
            PanelMessage::Command(command) => self.on_command(command),
            PanelMessage::TimerElapsed(fired) => self.on_timer(fired),
            PanelMessage::Reconfigure(update) => self.reconfigure(&update),
            PanelMessage::Shutdown => {}
        }
    }

    fn on_command(&mut self, command: PanelCommand) {
        debug!("Panel {} command {}", self.entity_id, redact(&command));
        match command {
            PanelCommand::ArmHome => self.arm(ArmMode::Home),
            PanelCommand::ArmAway => self.arm(ArmMode::Away),
            PanelCommand::Disarm { code } => self.disarm(code.as_deref()),
            PanelCommand::Trigger => self.trigger(),
        }
    }

    fn on_sensor_change(&mut self, entity_id: &str, reading: &EntityState) {
        self.recompute_readiness();

        if !reading.is_on() {
            return;
        }

        if self.config.is_always(entity_id) {
            info!("Panel {}: always-trigger sensor {} fired", self.entity_id, entity_id);
            self.last_trigger_entity = Some(entity_id.to_string());
            PanelEvent::AlwaysTriggered {
                entity_id: self.entity_id.clone(),
                sensor: entity_id.to_string(),
            }
            .emit(self.host.as_ref());
            self.trigger();
            return;
        }

        if self.state == AlarmState::Triggered || !self.is_relevant(entity_id) {
            return;
        }

        self.last_trigger_entity = Some(entity_id.to_string());
        info!(
            "Panel {}: {} opened, entry delay {:?}",
            self.entity_id,
            entity_id,
            self.config.entry_delay()
        );
        self.timers
            .start(TimerKind::Pending, self.config.entry_delay());
        self.transition(AlarmState::Pending);
    }

    /// Whether an active perimeter or motion reading matters in the current
    /// state. Only armed states have a profile; while pending the entry
    /// delay is already running and is not restarted.
    fn is_relevant(&self, entity_id: &str) -> bool {
        match self.state.profile() {
            Some(profile) => {
                (profile.perimeter && self.config.is_perimeter(entity_id))
                    || (profile.motion && self.config.is_motion(entity_id))
            }
            None => false,
        }
    }

    fn on_keypad_change(&mut self, keypad_id: &str, reading: &EntityState) {
        self.recompute_readiness();
        if !self.config.is_keypad(keypad_id) {
            return;
        }

        match keypad::authorize(&self.config, keypad_id, reading) {
            KeypadDecision::Authorized(KeypadIntent::ArmHome) => self.arm(ArmMode::Home),
            KeypadDecision::Authorized(KeypadIntent::ArmAway) => self.arm(ArmMode::Away),
            KeypadDecision::Authorized(KeypadIntent::Disarm { code }) => {
                self.disarm(code.as_deref())
            }
            KeypadDecision::Denied { keypad, action } => {
                warn!(
                    "Panel {}: wrong PIN on keypad {}, {} refused",
                    self.entity_id, keypad, action
                );
                PanelEvent::KeypadDenied {
                    entity_id: self.entity_id.clone(),
                    keypad,
                    action,
                }
                .emit(self.host.as_ref());
            }
            KeypadDecision::Ignored => {}
        }
    }

    fn arm(&mut self, mode: ArmMode) {
        let target = mode.target();
        match self.state {
            AlarmState::Pending | AlarmState::Triggered => {
                info!(
                    "Panel {}: {} ignored while {}",
                    self.entity_id,
                    mode.action(),
                    self.state
                );
                return;
            }
            state if state == target => return,
            AlarmState::Arming if self.arming_target == Some(target) => return,
            _ => {}
        }

        self.timers.cancel_all();
        self.recompute_readiness();

        if !self.readiness.is_ready(mode) && !self.config.force_arm {
            info!(
                "Panel {}: {} blocked by open sensors {:?}",
                self.entity_id,
                mode.action(),
                self.readiness.open_sensors
            );
            PanelEvent::ArmBlocked {
                entity_id: self.entity_id.clone(),
                mode: mode.action(),
                open_sensors: self.readiness.open_sensors.clone(),
            }
            .emit(self.host.as_ref());

            // The exit delay was cancelled above; do not leave it dangling
            if self.state == AlarmState::Arming {
                self.arming_target = None;
                self.transition(AlarmState::Disarmed);
            }
            return;
        }

        self.arming_target = Some(target);
        self.timers.start(TimerKind::Arming, self.config.exit_delay());
        self.transition(AlarmState::Arming);
    }

    fn disarm(&mut self, code: Option<&str>) {
        info!(
            "Panel {}: disarm (code {})",
            self.entity_id,
            if code.is_some() { "given" } else { "absent" }
        );
        self.timers.cancel_all();
        self.arming_target = None;
        self.transition(AlarmState::Disarmed);

        let host = self.host.as_ref();
        self.outputs.sirens_off(&self.config, host);
        let report = self.outputs.alarm_lights_restore_or_off(&self.config, host);
        for (entity_id, e) in &report.failures {
            warn!("Panel {}: light {} not restored: {}", self.entity_id, entity_id, e);
        }
    }

    fn trigger(&mut self) {
        let capture = self.state != AlarmState::Triggered;
        self.timers.cancel_all();
        self.arming_target = None;
        self.transition(AlarmState::Triggered);

        let host = self.host.as_ref();
        self.outputs.alarm_lights_on(&self.config, host, capture);
        self.outputs.sirens_on(&self.config, host);

        self.timers
            .start(TimerKind::TriggerAutoStop, self.config.trigger_time());
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            return;
        }

        match (fired.kind, self.state) {
            (TimerKind::Arming, AlarmState::Arming) => {
                let target = self.arming_target.take().unwrap_or(AlarmState::Disarmed);
                self.transition(target);
            }
            (TimerKind::Pending, AlarmState::Pending) => {
                info!("Panel {}: entry delay expired", self.entity_id);
                self.trigger();
            }
            (TimerKind::TriggerAutoStop, AlarmState::Triggered) => {
                info!("Panel {}: trigger time elapsed, sirens off", self.entity_id);
                self.outputs.sirens_off(&self.config, self.host.as_ref());
            }
            (kind, state) => debug!("Timer {} does not apply in {}", kind, state),
        }
    }

    fn reconfigure(&mut self, update: &ConfigUpdate) {
        self.config = self.config.with_update(update);
        info!("Panel {} reconfigured", self.entity_id);
        self.install_listeners();
        self.recompute_readiness();
    }

    fn transition(&mut self, to: AlarmState) {
        let from = self.state;
        self.state = to;
        if from == to {
            return;
        }

        info!("Panel {}: {} -> {}", self.entity_id, from, to);
        PanelEvent::StateChanged {
            entity_id: self.entity_id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        }
        .emit(self.host.as_ref());
    }

    fn recompute_readiness(&mut self) {
        let host = self.host.as_ref();
        self.readiness = Readiness::compute(&self.config, |entity_id| {
            host.reading(entity_id).is_some_and(|r| r.is_on())
        });
    }

    fn publish_status(&self) {
        self.status.store(Arc::new(PanelStatus::new(
            &self.entity_id,
            &self.config,
            self.state,
            &self.readiness,
            self.last_trigger_entity.clone(),
        )));
    }

    /// (Re)subscribe to sensor and keypad changes for the current config.
    fn install_listeners(&mut self) {
        self.subscriptions.clear();

        let sensors = self.config.sensor_entities();
        if !sensors.is_empty() {
            let handler = self.forwarder(|entity_id, reading| PanelMessage::SensorChanged {
                entity_id,
                reading,
            });
            self.subscriptions.push(self.host.subscribe(&sensors, handler));
        }

        let keypads = self.config.watched_keypads();
        if !keypads.is_empty() {
            let handler = self.forwarder(|entity_id, reading| PanelMessage::KeypadChanged {
                entity_id,
                reading,
            });
            self.subscriptions.push(self.host.subscribe(keypads, handler));
        }

        debug!(
            "Panel {} watching {} sensor(s), {} keypad(s)",
            self.entity_id,
            sensors.len(),
            keypads.len()
        );
    }

    fn forwarder(
        &self,
        wrap: impl Fn(String, EntityState) -> PanelMessage + Send + Sync + 'static,
    ) -> StateChangeHandler {
        let tx = self.tx.clone();
        Arc::new(move |event: &Event| {
            let Event::StateChanged {
                entity_id,
                new_state,
                ..
            } = event;
            // Closed only once the panel has stopped
            let _ = tx.send(wrap(entity_id.clone(), new_state.clone()));
        })
    }
}

/// Commands as logged; never includes the entered code.
fn redact(command: &PanelCommand) -> &'static str {
    match command {
        PanelCommand::ArmHome => "arm_home",
        PanelCommand::ArmAway => "arm_away",
        PanelCommand::Disarm { .. } => "disarm",
        PanelCommand::Trigger => "trigger",
    }
}
