//! # Exchange State Machine
//!
//! Initiator side of the link, run by the Transmitter once per telemetry
//! period: send the sensor snapshot, then listen for the verdict for a
//! fixed window.
//!
//! ```text
//! Idle ──CycleStarted──▶ Sending ──SendAttempted──▶ AwaitingResponse
//!  ▲                                                  │          │
//!  │                                    ResponseAccepted   DeadlinePassed
//!  │                                                  ▼          ▼
//!  └───────────────────Parked──────────────────── Completed   TimedOut
//! ```

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::frame::decoder::decode;
use crate::frame::encoder::encode;
use crate::frame::payload::{decode_downlink, encode_uplink, SensorSnapshot, Verdict};
use crate::frame::protocol::{AddressFilter, NodeAddress};
use crate::node::indicators::Indicators;
use crate::node::state::SharedState;
use crate::radio::{RadioDriver, RadioSession, RawPacket, WaitOutcome};
use crate::settings::RadioConfig;
use crate::telemetry::{ExchangeRecord, Journal, Outcome, Role};

/// Fixed response window, measured from entering receive
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Initiator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    AwaitingResponse,
    Completed,
    TimedOut,
}

/// Inputs driving [`ExchangeState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeEvent {
    CycleStarted,
    /// The transmit was attempted, successfully or not
    SendAttempted,
    ResponseAccepted,
    DeadlinePassed,
    /// Radio parked at the end of the cycle
    Parked,
}

impl ExchangeState {
    /// Next state, or `None` if `event` is not valid in this state
    pub fn on(self, event: ExchangeEvent) -> Option<ExchangeState> {
        use ExchangeEvent::*;
        use ExchangeState::*;

        match (self, event) {
            (Idle, CycleStarted) => Some(Sending),
            (Sending, SendAttempted) => Some(AwaitingResponse),
            (AwaitingResponse, ResponseAccepted) => Some(Completed),
            (AwaitingResponse, DeadlinePassed) => Some(TimedOut),
            (Completed, Parked) | (TimedOut, Parked) => Some(Idle),
            (Idle, _) | (Sending, _) | (AwaitingResponse, _) | (Completed, _) | (TimedOut, _) => None,
        }
    }
}

/// How one exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Pending,
    Completed,
    TimedOut,
}

/// Per-cycle record, dropped when the cycle ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub message_id: u8,
    /// When receive was entered
    pub start: Instant,
    pub deadline: Instant,
    pub outcome: ExchangeOutcome,
}

impl Exchange {
    pub fn begin(message_id: u8, start: Instant, window: Duration) -> Self {
        Self {
            message_id,
            start,
            deadline: start + window,
            outcome: ExchangeOutcome::Pending,
        }
    }
}

/// Result of [`Initiator::run_cycle`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub message_id: u8,
    pub outcome: ExchangeOutcome,
    /// Verdict stored by this cycle, `None` on timeout
    pub verdict: Option<Verdict>,
    pub rssi: Option<i16>,
    /// Whether the uplink left the radio
    pub sent: bool,
}

/// Transmitter side of the link
#[derive(Debug)]
pub struct Initiator {
    local: NodeAddress,
    peer: NodeAddress,
    filter: AddressFilter,
    next_message_id: u8,
    response_timeout: Duration,
    state: Arc<SharedState>,
    indicators: Arc<Indicators>,
    journal: Journal,
}

impl Initiator {
    pub fn new(state: Arc<SharedState>, indicators: Arc<Indicators>, journal: Journal) -> Self {
        Self {
            local: NodeAddress::TRANSMITTER,
            peer: NodeAddress::RECEIVER,
            filter: AddressFilter::initiator(NodeAddress::TRANSMITTER),
            next_message_id: 0,
            response_timeout: RESPONSE_TIMEOUT,
            state,
            indicators,
            journal,
        }
    }

    /// Message id the next cycle will use
    pub fn next_message_id(&self) -> u8 {
        self.next_message_id
    }

    fn advance(current: &mut ExchangeState, event: ExchangeEvent) {
        match current.on(event) {
            Some(next) => *current = next,
            None => warn!(state = ?current, ?event, "Ignoring invalid exchange transition"),
        }
    }

    /// Run one send-then-listen cycle to completion
    ///
    /// Never fails: send errors are logged and the cycle still listens,
    /// a silent window ends as `TimedOut`.
    pub async fn run_cycle<D: RadioDriver>(&mut self, session: &mut RadioSession<D>) -> CycleReport {
        let mut machine = ExchangeState::Idle;
        Self::advance(&mut machine, ExchangeEvent::CycleStarted);

        let snapshot = self.state.sensors();
        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let sent = self.send_uplink(session, message_id, &snapshot).await;
        Self::advance(&mut machine, ExchangeEvent::SendAttempted);

        let mut exchange = Exchange::begin(message_id, Instant::now(), self.response_timeout);
        let mut stored = None;

        while exchange.outcome == ExchangeOutcome::Pending {
            match session.wait_for_packet_until(exchange.deadline).await {
                Ok(WaitOutcome::Received(_)) if Instant::now() >= exchange.deadline => {
                    // Dropped frames never extend the window
                    exchange.outcome = ExchangeOutcome::TimedOut;
                    Self::advance(&mut machine, ExchangeEvent::DeadlinePassed);
                }
                Ok(WaitOutcome::Received(packet)) => {
                    if let Some(verdict) = self.accept(&packet) {
                        self.state.set_verdict(verdict);
                        session.record_rssi(packet.rssi);
                        self.state.set_rssi(Some(packet.rssi));
                        stored = Some(verdict);
                        exchange.outcome = ExchangeOutcome::Completed;
                        Self::advance(&mut machine, ExchangeEvent::ResponseAccepted);
                    }
                }
                Ok(WaitOutcome::TimedOut) => {
                    exchange.outcome = ExchangeOutcome::TimedOut;
                    Self::advance(&mut machine, ExchangeEvent::DeadlinePassed);
                }
                Err(e) => {
                    warn!("{}", LinkError::RadioBeginFailure(format!("cannot listen: {}", e)));
                    exchange.outcome = ExchangeOutcome::TimedOut;
                    Self::advance(&mut machine, ExchangeEvent::DeadlinePassed);
                }
            }
        }

        if exchange.outcome == ExchangeOutcome::TimedOut {
            // Verdict stays at its last value; only the link indicator resets
            session.clear_rssi();
            self.state.set_rssi(None);
            warn!(
                message_id,
                "{}",
                LinkError::ResponseTimeout(self.response_timeout.as_millis() as u64)
            );
        }
        self.indicators.rx.set(false);

        if let Err(e) = session.park().await {
            warn!("Failed to park radio: {}", e);
        }
        Self::advance(&mut machine, ExchangeEvent::Parked);

        let report = CycleReport {
            message_id,
            outcome: exchange.outcome,
            verdict: stored,
            rssi: session.last_rssi(),
            sent,
        };

        self.journal.record(ExchangeRecord::now(
            Role::Initiator,
            match report.outcome {
                ExchangeOutcome::Completed => Outcome::Completed,
                ExchangeOutcome::Pending | ExchangeOutcome::TimedOut => Outcome::TimedOut,
            },
            message_id,
            report.rssi,
            snapshot,
            self.state.verdict(),
        ));

        report
    }

    async fn send_uplink<D: RadioDriver>(
        &self,
        session: &mut RadioSession<D>,
        message_id: u8,
        snapshot: &SensorSnapshot,
    ) -> bool {
        let packet = match encode_uplink(snapshot)
            .map_err(LinkError::from)
            .and_then(|payload| Ok(encode(self.peer, self.local, message_id, &payload)?))
        {
            Ok(packet) => packet,
            Err(e) => {
                warn!(message_id, "Cannot build uplink: {}", e);
                return false;
            }
        };

        self.indicators.tx.set(true);
        let result = session.send(&packet).await;
        self.indicators.tx.set(false);

        match result {
            Ok(()) => {
                debug!(message_id, bytes = packet.len(), "Uplink sent");
                true
            }
            Err(e) => {
                warn!(message_id, "Uplink send failed, listening anyway: {}", e);
                false
            }
        }
    }

    /// Validate an inbound packet, returning the verdict it carries
    ///
    /// `None` means the packet is dropped and the wait continues. A valid,
    /// addressed frame with an unreadable payload yields the safe default.
    fn accept(&self, packet: &RawPacket) -> Option<Verdict> {
        let frame = match decode(&packet.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping frame: {}", LinkError::from(e));
                return None;
            }
        };

        if !self.filter.accepts(frame.destination) {
            debug!(
                "Dropping frame: {}",
                LinkError::InvalidDestinationAddress(frame.destination.value())
            );
            return None;
        }

        self.indicators.rx.set(true);
        let verdict = match decode_downlink(&frame.payload) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("{}, using safe default", LinkError::PayloadParse(e));
                Verdict::SAFE_DEFAULT
            }
        };

        info!(
            source = %frame.source,
            message_id = frame.message_id,
            rssi = packet.rssi,
            classification = verdict.classification,
            buzzer_on = verdict.buzzer_active,
            "Response received"
        );
        Some(verdict)
    }

    /// Run cycles every telemetry period until shutdown
    ///
    /// The period is measured from the start of one cycle to the start of
    /// the next. A cycle always runs to completion; pause and shutdown are
    /// only observed between cycles.
    pub async fn run<D: RadioDriver>(
        mut self,
        radio: Arc<Mutex<RadioSession<D>>>,
        mut settings: watch::Receiver<RadioConfig>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut period = Duration::from_millis(settings.borrow_and_update().telemetry_period_ms as u64);
        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_start = Instant::now();

        info!(period_ms = period.as_millis() as u64, "Initiator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state.is_paused() {
                        self.indicators.show_paused();
                        continue;
                    }
                    self.indicators.clear_paused();

                    last_start = Instant::now();
                    let mut session = radio.lock().await;
                    let report = self.run_cycle(&mut session).await;
                    debug!(?report, "Cycle finished");
                }

                changed = settings.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = Duration::from_millis(settings.borrow_and_update().telemetry_period_ms as u64);
                    if next != period {
                        period = next;
                        ticker = interval_at(last_start + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        info!(period_ms = period.as_millis() as u64, "Telemetry period changed");
                    }
                }

                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("Initiator stopped");
    }
}
