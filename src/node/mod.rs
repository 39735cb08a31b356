//! # Node Coordinator
//!
//! Runs one node as a set of periodic tokio tasks sharing [`SharedState`].
//!
//! | Task | Cadence | Role |
//! |------|---------|------|
//! | temperature / humidity / pH | 750 / 2000 / 2000 ms | Transmitter |
//! | input and alarm | 33 ms | both |
//! | display refresh | 150 ms | both |
//! | radio settings | on commit | both |
//! | radio | telemetry period (initiator) or 5 ms poll (responder) | both |
//!
//! Locks:
//! - display lock: every read-then-write against the display, and the
//!   settings commit that is shown on it; never held across a delay
//! - server lock: backend calls on the Receiver
//! - radio lock: the radio session, shared by the radio task and the
//!   settings task that applies committed parameters

pub mod display;
pub mod indicators;
pub mod sensors;
pub mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::link::{Classifier, Initiator, Responder};
use crate::radio::{RadioDriver, RadioSession};
use crate::settings::store::{persist_field, EepromImage};
use crate::settings::{RadioConfig, SettingField, Step};
use crate::telemetry::{Journal, Role};
use display::{render_status, saving_page, Display, Screen, StatusView};
use indicators::{AlarmTimer, Indicators};
use sensors::{spawn_sensor_tasks, SensorSource};
use state::SharedState;

/// Input handling and alarm cadence
pub const INPUT_PERIOD: Duration = Duration::from_millis(33);

/// Display refresh cadence
pub const DISPLAY_PERIOD: Duration = Duration::from_millis(150);

/// How long "Saving" stays on the display after a commit
pub const SAVING_HOLD: Duration = Duration::from_millis(1000);

/// User input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    TogglePause,
    /// Edit a setting without saving it
    Adjust(SettingField, Step),
    /// Save a setting and apply it
    Commit(SettingField),
}

impl InputEvent {
    /// Parse a console command: `p`, `+ <field>`, `- <field>`, `save <field>`
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = words.next()?;
        let field = words.next().map(SettingField::from_name);
        if words.next().is_some() {
            return None;
        }

        match (command, field) {
            ("p", None) => Some(Self::TogglePause),
            ("+", Some(Some(field))) => Some(Self::Adjust(field, Step::Up)),
            ("-", Some(Some(field))) => Some(Self::Adjust(field, Step::Down)),
            ("save", Some(Some(field))) => Some(Self::Commit(field)),
            _ => None,
        }
    }
}

/// What the radio task does
pub enum Duty {
    /// Transmitter: sample sensors and run exchange cycles
    Initiator(Arc<dyn SensorSource>),
    /// Receiver: relay inbound frames through the backend
    Responder(Arc<dyn Classifier>),
}

impl Duty {
    pub fn role(&self) -> Role {
        match self {
            Duty::Initiator(_) => Role::Initiator,
            Duty::Responder(_) => Role::Responder,
        }
    }
}

/// Shared resources of one node
pub struct Node<D: RadioDriver> {
    state: Arc<SharedState>,
    indicators: Arc<Indicators>,
    screen: Arc<Mutex<Screen>>,
    server_lock: Arc<Mutex<()>>,
    radio: Arc<Mutex<RadioSession<D>>>,
    journal: Journal,
}

impl<D: RadioDriver + 'static> Node<D> {
    pub fn new(driver: D, display: Box<dyn Display>, journal: Journal) -> Self {
        Self {
            state: Arc::new(SharedState::new()),
            indicators: Arc::new(Indicators::default()),
            screen: Arc::new(Mutex::new(Screen::new(display))),
            server_lock: Arc::new(Mutex::new(())),
            radio: Arc::new(Mutex::new(RadioSession::new(driver))),
            journal,
        }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn indicators(&self) -> &Arc<Indicators> {
        &self.indicators
    }

    pub fn screen(&self) -> &Arc<Mutex<Screen>> {
        &self.screen
    }

    pub fn radio(&self) -> &Arc<Mutex<RadioSession<D>>> {
        &self.radio
    }

    /// Apply `config` to the radio and spawn every task of the node
    ///
    /// Tasks stop when `shutdown` changes.
    pub async fn start(
        &self,
        duty: Duty,
        config: RadioConfig,
        store: Option<EepromImage>,
        inputs: mpsc::Receiver<InputEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let role = duty.role();

        if let Err(e) = self.radio.lock().await.apply_config(&config).await {
            warn!("Initial radio configuration failed: {}", e);
        }

        let (settings_tx, settings_rx) = watch::channel(config);
        let mut handles = Vec::new();

        match duty {
            Duty::Initiator(sensors) => {
                handles.extend(spawn_sensor_tasks(sensors, self.state.clone(), shutdown.clone()));

                let initiator = Initiator::new(self.state.clone(), self.indicators.clone(), self.journal.clone());
                handles.push(tokio::spawn(initiator.run(
                    self.radio.clone(),
                    settings_rx.clone(),
                    shutdown.clone(),
                )));
            }
            Duty::Responder(classifier) => {
                let responder = Responder::new(
                    classifier,
                    self.server_lock.clone(),
                    self.state.clone(),
                    self.indicators.clone(),
                    self.journal.clone(),
                );
                handles.push(tokio::spawn(responder.run(self.radio.clone(), shutdown.clone())));
            }
        }

        handles.push(tokio::spawn(apply_radio_settings(
            self.radio.clone(),
            settings_rx,
            shutdown.clone(),
        )));

        handles.push(tokio::spawn(refresh_display(
            role,
            self.state.clone(),
            self.screen.clone(),
            shutdown.clone(),
        )));

        let input = InputTask {
            state: self.state.clone(),
            indicators: self.indicators.clone(),
            screen: self.screen.clone(),
            editing: config,
            settings: settings_tx,
            store,
            alarm: AlarmTimer::new(),
        };
        handles.push(tokio::spawn(input.run(inputs, shutdown)));

        info!(?role, "Node started");
        handles
    }
}

/// Input, settings edits and the alarm output
struct InputTask {
    state: Arc<SharedState>,
    indicators: Arc<Indicators>,
    screen: Arc<Mutex<Screen>>,
    /// Edited but not yet committed values
    editing: RadioConfig,
    /// Committed values
    settings: watch::Sender<RadioConfig>,
    store: Option<EepromImage>,
    alarm: AlarmTimer,
}

impl InputTask {
    async fn run(mut self, mut inputs: mpsc::Receiver<InputEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(INPUT_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while let Ok(event) = inputs.try_recv() {
                        self.handle(event).await;
                    }

                    let on = self.alarm.update(self.state.verdict().buzzer_active, Instant::now());
                    self.indicators.buzzer.set(on);
                }

                _ = shutdown.changed() => break,
            }
        }

        self.indicators.buzzer.set(false);
    }

    async fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::TogglePause => {
                let paused = self.state.toggle_paused();
                info!(paused, "Pause toggled");
                if paused {
                    self.indicators.show_paused();
                } else {
                    self.indicators.clear_paused();
                }
            }
            InputEvent::Adjust(field, step) => {
                self.editing.step(field, step);
                info!(
                    field = field.name(),
                    value = %self.editing.describe(field),
                    "Setting edited (not saved)"
                );
            }
            InputEvent::Commit(field) => self.commit(field).await,
        }
    }

    /// Write one setting, show "Saving", then publish it
    async fn commit(&mut self, field: SettingField) {
        let mut committed = *self.settings.borrow();
        committed.copy_field(&self.editing, field);
        let value = committed.describe(field);

        let hold = {
            let mut screen = self.screen.lock().await;
            if let Some(store) = self.store.as_mut() {
                if let Err(e) = persist_field(store, &committed, field).await {
                    warn!(field = field.name(), "Failed to save setting: {}", e);
                }
            }
            screen.hold_message(saving_page(field, &value))
        };

        self.settings.send_replace(committed);
        info!(
            field = field.name(),
            value = %value,
            radio = field.is_radio_parameter(),
            "Setting saved"
        );

        // No-op if a later commit has replaced the message
        let screen = self.screen.clone();
        tokio::spawn(async move {
            sleep(SAVING_HOLD).await;
            screen.lock().await.release(hold);
        });
    }
}

/// Apply committed radio parameters under the radio lock
async fn apply_radio_settings<D: RadioDriver>(
    radio: Arc<Mutex<RadioSession<D>>>,
    mut settings: watch::Receiver<RadioConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut applied = *settings.borrow_and_update();

    loop {
        tokio::select! {
            changed = settings.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *settings.borrow_and_update();

                // The telemetry period is read by the initiator, not the radio
                let radio_changed = RadioConfig { telemetry_period_ms: 0, ..next }
                    != RadioConfig { telemetry_period_ms: 0, ..applied };
                if !radio_changed {
                    continue;
                }

                match radio.lock().await.apply_config(&next).await {
                    Ok(()) => applied = next,
                    Err(e) => warn!("Failed to apply radio settings: {}", e),
                }
            }

            _ = shutdown.changed() => break,
        }
    }
}

/// Redraw the status page
async fn refresh_display(
    role: Role,
    state: Arc<SharedState>,
    screen: Arc<Mutex<Screen>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(DISPLAY_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let view = StatusView {
                    role,
                    sensors: state.sensors(),
                    verdict: state.verdict(),
                    rssi: state.rssi(),
                    paused: state.is_paused(),
                    backend_online: state.backend_online(),
                };
                let page = render_status(&view);

                if screen.lock().await.refresh(page) {
                    debug!("Status page redrawn");
                }
            }

            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::display::TextDisplay;
    use super::*;
    use crate::frame::payload::Verdict;
    use crate::radio::driver::mocks::{DriverCall, MockRadio};
    use tempfile::TempDir;

    #[test]
    fn test_parse_input_events() {
        assert_eq!(InputEvent::parse("p"), Some(InputEvent::TogglePause));
        assert_eq!(
            InputEvent::parse("+ sf"),
            Some(InputEvent::Adjust(SettingField::SpreadingFactor, Step::Up))
        );
        assert_eq!(
            InputEvent::parse("  -   period "),
            Some(InputEvent::Adjust(SettingField::TelemetryPeriod, Step::Down))
        );
        assert_eq!(InputEvent::parse("save bw"), Some(InputEvent::Commit(SettingField::Bandwidth)));
        assert_eq!(InputEvent::parse("save"), None);
        assert_eq!(InputEvent::parse("+ volume"), None);
        assert_eq!(InputEvent::parse("p now"), None);
        assert_eq!(InputEvent::parse(""), None);
    }

    fn input_task(store: Option<EepromImage>) -> (InputTask, watch::Receiver<RadioConfig>, Arc<Mutex<Screen>>) {
        let (settings, settings_rx) = watch::channel(RadioConfig::default());
        let screen = Arc::new(Mutex::new(Screen::new(Box::new(TextDisplay::new()))));
        let task = InputTask {
            state: Arc::new(SharedState::new()),
            indicators: Arc::new(Indicators::default()),
            screen: screen.clone(),
            editing: RadioConfig::default(),
            settings,
            store,
            alarm: AlarmTimer::new(),
        };
        (task, settings_rx, screen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_saves_shows_message_then_clears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.bin");
        let store = EepromImage::open(&path).unwrap();
        let (mut task, settings_rx, screen) = input_task(Some(store));

        task.handle(InputEvent::Adjust(SettingField::SpreadingFactor, Step::Up)).await;
        task.handle(InputEvent::Adjust(SettingField::TxPower, Step::Down)).await;
        assert_eq!(settings_rx.borrow().spreading_factor, 7);

        task.handle(InputEvent::Commit(SettingField::SpreadingFactor)).await;

        // Only the committed field is published
        assert_eq!(settings_rx.borrow().spreading_factor, 8);
        assert_eq!(settings_rx.borrow().tx_power, 17);

        {
            let screen = screen.lock().await;
            assert!(screen.is_held());
            assert_eq!(screen.contents()[0], "Saving");
        }

        sleep(SAVING_HOLD + Duration::from_millis(10)).await;
        assert!(!screen.lock().await.is_held());

        let reloaded = EepromImage::open(&path).unwrap();
        let loaded = crate::settings::store::load_radio_config(&reloaded, &RadioConfig::default());
        assert_eq!(loaded.spreading_factor, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_commit_keeps_its_full_hold() {
        let (mut task, _, screen) = input_task(None);

        task.handle(InputEvent::Adjust(SettingField::TxPower, Step::Down)).await;
        task.handle(InputEvent::Commit(SettingField::TxPower)).await;
        sleep(Duration::from_millis(600)).await;

        task.handle(InputEvent::Adjust(SettingField::SpreadingFactor, Step::Up)).await;
        task.handle(InputEvent::Commit(SettingField::SpreadingFactor)).await;

        // The first commit's release is due here and must not clear the second message
        sleep(Duration::from_millis(500)).await;
        {
            let screen = screen.lock().await;
            assert!(screen.is_held());
            assert_eq!(screen.contents()[1], "sf SF8");
        }

        sleep(Duration::from_millis(510)).await;
        assert!(!screen.lock().await.is_held());
    }

    #[tokio::test]
    async fn test_toggle_pause_drives_leds() {
        let (mut task, _, _) = input_task(None);

        task.handle(InputEvent::TogglePause).await;
        assert!(task.state.is_paused());
        assert!(task.indicators.tx.is_on() && task.indicators.rx.is_on());

        task.handle(InputEvent::TogglePause).await;
        assert!(!task.state.is_paused());
        assert!(!task.indicators.tx.is_on() && !task.indicators.rx.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_follows_verdict_for_three_seconds() {
        let (task, _, _) = input_task(None);
        let state = task.state.clone();
        let indicators = task.indicators.clone();
        let (_inputs_tx, inputs_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(task.run(inputs_rx, shutdown_rx));

        state.set_verdict(Verdict::new(false, true));
        sleep(Duration::from_millis(100)).await;
        assert!(indicators.buzzer.is_on());

        sleep(Duration::from_millis(3000)).await;
        assert!(!indicators.buzzer.is_on());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_radio_parameters_reach_driver() {
        let radio = MockRadio::new();
        let node = Node::new(radio.clone(), Box::new(TextDisplay::new()), Journal::disabled());
        let (inputs_tx, inputs_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let classifier = crate::link::backend::MockClassifier::new();
        let handles = node
            .start(
                Duty::Responder(Arc::new(classifier)),
                RadioConfig::default(),
                None,
                inputs_rx,
                shutdown_rx,
            )
            .await;

        inputs_tx
            .send(InputEvent::Adjust(SettingField::CodingRate, Step::Up))
            .await
            .unwrap();
        inputs_tx.send(InputEvent::Commit(SettingField::CodingRate)).await.unwrap();
        sleep(Duration::from_millis(200)).await;

        let configured: Vec<RadioConfig> = radio
            .get_calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Configure(config) => Some(config),
                _ => None,
            })
            .collect();
        assert_eq!(configured.len(), 2);
        assert_eq!(configured[1].coding_rate_denominator, 6);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_task_renders_status() {
        let radio = MockRadio::new();
        let node = Node::new(radio, Box::new(TextDisplay::new()), Journal::disabled());
        let (_inputs_tx, inputs_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let classifier = crate::link::backend::MockClassifier::new();
        let handles = node
            .start(
                Duty::Responder(Arc::new(classifier)),
                RadioConfig::default(),
                None,
                inputs_rx,
                shutdown_rx,
            )
            .await;

        node.state().set_verdict(Verdict::new(true, false));
        sleep(DISPLAY_PERIOD * 2).await;

        assert_eq!(node.screen().lock().await.contents()[1], "L no link S-");

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
