//! # Biodry Link
//!
//! Two-node LoRa telemetry link for a biodrying monitor.
//!
//! The Transmitter samples sensors and sends them over the radio; the
//! Receiver forwards them to the classification backend and relays the
//! verdict back for local display and alarm.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use biodry_link::config::{Config, NodeRole, CONFIG_ENV_VAR};
use biodry_link::link::HttpClassifier;
use biodry_link::node::display::TextDisplay;
use biodry_link::node::sensors::FixedSensors;
use biodry_link::node::{Duty, InputEvent, Node};
use biodry_link::radio::modem::{SerialModem, DEFAULT_DEVICE_PATHS};
use biodry_link::radio::sim::SimulatedAir;
use biodry_link::settings::store::{load_radio_config, EepromImage};
use biodry_link::settings::RadioConfig;
use biodry_link::telemetry::{Journal, TelemetryLogger};

/// Queued console commands
const INPUT_QUEUE_SIZE: usize = 16;

/// Main entry point
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (argument, `BIODRY_CONFIG`, or `config/default.toml`)
///    - Set up logging (stdout, plus a daily file when configured)
///    - Load persisted radio settings over the configured defaults
///    - Open the radio modem (or the simulated air)
///
/// 2. **Run**
///    - Spawn the node tasks for the configured role
///    - Forward console commands (`p`, `+ sf`, `- period`, `save bw`, ...) to the input task
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C signals every task, each finishes its current cycle and exits
///
/// # Errors
///
/// Returns error if the config is invalid, the settings store cannot be
/// opened, no radio modem is found, or the HTTP client cannot be built.
#[tokio::main]
async fn main() -> Result<()> {
    let path = Config::resolve_path(std::env::args().nth(1), std::env::var(CONFIG_ENV_VAR).ok());
    let config = Config::load(&path).with_context(|| format!("Failed to load config {}", path.display()))?;

    let _log_guard = init_logging(&config)?;
    info!("Biodry Link v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(role = ?config.node.role, "Loaded configuration from {}", path.display());

    let journal = open_journal(&config)?;

    let store = EepromImage::open(&config.settings.path)
        .with_context(|| format!("Failed to open settings store {}", config.settings.path))?;
    let radio_config = load_radio_config(&store, &config.radio_defaults());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_QUEUE_SIZE);

    let mut handles = match config.node.role {
        NodeRole::Transmitter => {
            let modem = open_modem(&config)?;
            let node = Node::new(modem, Box::new(TextDisplay::new()), journal);
            let sensors = Arc::new(FixedSensors::new(config.sensor_reading()));
            node.start(Duty::Initiator(sensors), radio_config, Some(store), inputs_rx, shutdown_rx.clone())
                .await
        }
        NodeRole::Receiver => {
            let modem = open_modem(&config)?;
            let node = Node::new(modem, Box::new(TextDisplay::new()), journal);
            let classifier = Arc::new(classifier(&config)?);
            node.start(Duty::Responder(classifier), radio_config, Some(store), inputs_rx, shutdown_rx.clone())
                .await
        }
        NodeRole::Simulate => {
            run_simulation(&config, journal, radio_config, store, inputs_rx, shutdown_rx.clone()).await?
        }
    };

    handles.push(tokio::spawn(read_console(inputs_tx, shutdown_rx)));

    info!("Type p to pause, + <field> / - <field> to edit, save <field> to store (fields: period power sf cr bw)");
    info!("Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");
    shutdown_tx.send_replace(true);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Stdout logging filtered by `RUST_LOG` (or the configured level), plus an optional daily file
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;

    let (file_layer, guard) = if config.logging.file_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.logging.file_dir, "biodry-link.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

fn open_journal(config: &Config) -> Result<Journal> {
    if !config.telemetry.enabled {
        return Ok(Journal::disabled());
    }

    let logger = TelemetryLogger::new(
        &config.telemetry.log_dir,
        config.telemetry.max_records_per_file,
        config.telemetry.max_files_to_keep,
    )
    .with_context(|| format!("Failed to create telemetry directory {}", config.telemetry.log_dir))?;

    Ok(Journal::new(logger))
}

fn open_modem(config: &Config) -> Result<SerialModem> {
    let configured = [config.serial.port.as_str()];
    let paths: &[&str] = if config.serial.port.is_empty() {
        DEFAULT_DEVICE_PATHS
    } else {
        &configured
    };

    let modem = SerialModem::open_with_paths(
        paths,
        config.serial.baud_rate,
        Duration::from_millis(config.serial.tx_timeout_ms),
    )
    .context("Failed to open radio modem")?;
    info!("Radio modem opened at: {}", modem.device_path());
    Ok(modem)
}

fn classifier(config: &Config) -> Result<HttpClassifier> {
    let classifier = HttpClassifier::new(&config.backend.endpoint, Duration::from_millis(config.backend.timeout_ms))
        .context("Failed to create backend client")?;
    info!("Backend endpoint: {}", classifier.endpoint());
    Ok(classifier)
}

/// Both nodes in one process over a simulated radio link
///
/// Console input drives the Transmitter; the Receiver has no input.
async fn run_simulation(
    config: &Config,
    journal: Journal,
    radio_config: RadioConfig,
    store: EepromImage,
    inputs: mpsc::Receiver<InputEvent>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let (_air, transmitter_radio, receiver_radio) = SimulatedAir::pair();

    let transmitter = Node::new(transmitter_radio, Box::new(TextDisplay::new()), journal.clone());
    let receiver = Node::new(receiver_radio, Box::new(TextDisplay::new()), journal);

    // Receiver first so it is listening before the first uplink
    let (_receiver_inputs, receiver_rx) = mpsc::channel(1);
    let mut handles = receiver
        .start(
            Duty::Responder(Arc::new(classifier(config)?)),
            radio_config,
            None,
            receiver_rx,
            shutdown.clone(),
        )
        .await;
    tokio::task::yield_now().await;

    let sensors = Arc::new(FixedSensors::new(config.sensor_reading()));
    handles.extend(
        transmitter
            .start(Duty::Initiator(sensors), radio_config, Some(store), inputs, shutdown)
            .await,
    );

    info!("Simulation running: transmitter and receiver share an in-memory radio link");
    Ok(handles)
}

/// Forward console lines as input events
async fn read_console(inputs: mpsc::Sender<InputEvent>, shutdown: watch::Receiver<bool>) {
    forward_commands(BufReader::new(tokio::io::stdin()), inputs, shutdown).await;
}

/// Parse each line of `reader` and send the recognised commands
///
/// Stops at end of input, on a read error, on shutdown, or when the
/// input task is gone.
async fn forward_commands<R>(reader: R, inputs: mpsc::Sender<InputEvent>, mut shutdown: watch::Receiver<bool>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match InputEvent::parse(&line) {
                    Some(event) => {
                        if inputs.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => warn!("Unknown command: {}", line.trim()),
                }
            }

            _ = shutdown.changed() => break,
        }
    }
}
