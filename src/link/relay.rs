//! # Inbound Relay
//!
//! Responder side of the link, run continuously by the Receiver: validate an
//! inbound frame, forward its readings to the backend, store the verdict and
//! send it back to the sender.
//!
//! Every failure after validation degrades to the safe default verdict, and
//! the reply is still sent so the initiator never waits out its window.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::backend::Classifier;
use crate::error::LinkError;
use crate::frame::decoder::decode;
use crate::frame::encoder::encode;
use crate::frame::payload::{decode_uplink, encode_downlink, SensorSnapshot, Verdict};
use crate::frame::protocol::{AddressFilter, Frame, FrameError, NodeAddress, REPLY_MESSAGE_ID};
use crate::node::indicators::Indicators;
use crate::node::state::SharedState;
use crate::radio::{RadioDriver, RadioMode, RadioSession, RawPacket, POLL_INTERVAL};
use crate::telemetry::{ExchangeRecord, Journal, Outcome, Role};

/// Why a frame was dropped without side effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Malformed(FrameError),
    WrongDestination(NodeAddress),
}

impl From<RejectReason> for LinkError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::Malformed(e) => LinkError::Frame(e),
            RejectReason::WrongDestination(address) => LinkError::InvalidDestinationAddress(address.value()),
        }
    }
}

/// What happened to one inbound packet
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Rejected(RejectReason),
    /// Verdict sent back (a failed transmit is logged, not retried)
    Replied(Verdict),
    /// Verdict stored but not sent: the node is paused
    ReplySuppressed(Verdict),
}

/// Per-packet processing stage
#[derive(Debug)]
enum RelayStage {
    Received(RawPacket),
    Validated { frame: Frame, rssi: i16 },
    Forwarded {
        frame: Frame,
        rssi: i16,
        reading: Option<SensorSnapshot>,
        verdict: Verdict,
    },
    Done(RelayOutcome),
}

/// Receiver side of the link
pub struct Responder {
    local: NodeAddress,
    filter: AddressFilter,
    classifier: Arc<dyn Classifier>,
    server_lock: Arc<Mutex<()>>,
    state: Arc<SharedState>,
    indicators: Arc<Indicators>,
    journal: Journal,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("local", &self.local)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl Responder {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        server_lock: Arc<Mutex<()>>,
        state: Arc<SharedState>,
        indicators: Arc<Indicators>,
        journal: Journal,
    ) -> Self {
        Self {
            local: NodeAddress::RECEIVER,
            filter: AddressFilter::responder(NodeAddress::RECEIVER),
            classifier,
            server_lock,
            state,
            indicators,
            journal,
        }
    }

    /// Process one inbound packet to completion
    pub async fn handle_packet<D: RadioDriver>(
        &self,
        session: &mut RadioSession<D>,
        packet: RawPacket,
    ) -> RelayOutcome {
        let mut stage = RelayStage::Received(packet);

        loop {
            stage = match stage {
                RelayStage::Received(packet) => self.validate(packet),
                RelayStage::Validated { frame, rssi } => self.forward(frame, rssi).await,
                RelayStage::Forwarded {
                    frame,
                    rssi,
                    reading,
                    verdict,
                } => self.respond(session, frame, rssi, reading, verdict).await,
                RelayStage::Done(outcome) => {
                    self.indicators.rx.set(false);
                    return outcome;
                }
            };
        }
    }

    fn validate(&self, packet: RawPacket) -> RelayStage {
        let frame = match decode(&packet.bytes) {
            Ok(frame) => frame,
            Err(e) => return self.reject(RejectReason::Malformed(e)),
        };

        if !self.filter.accepts(frame.destination) {
            return self.reject(RejectReason::WrongDestination(frame.destination));
        }

        self.indicators.rx.set(true);
        debug!(
            source = %frame.source,
            message_id = frame.message_id,
            rssi = packet.rssi,
            "Frame accepted"
        );
        RelayStage::Validated {
            frame,
            rssi: packet.rssi,
        }
    }

    fn reject(&self, reason: RejectReason) -> RelayStage {
        debug!("Frame rejected: {}", LinkError::from(reason.clone()));
        RelayStage::Done(RelayOutcome::Rejected(reason))
    }

    async fn forward(&self, frame: Frame, rssi: i16) -> RelayStage {
        let reading = match decode_uplink(&frame.payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("{}, replying with safe default", LinkError::PayloadParse(e));
                return RelayStage::Forwarded {
                    frame,
                    rssi,
                    reading: None,
                    verdict: Verdict::SAFE_DEFAULT,
                };
            }
        };

        let result = {
            let _server = self.server_lock.lock().await;
            self.classifier.classify(&reading).await
        };

        let verdict = match result {
            Ok(verdict) => {
                self.state.set_backend_online(true);
                verdict
            }
            Err(e) => {
                self.state.set_backend_online(false);
                warn!("Classification failed, replying with safe default: {}", e);
                Verdict::SAFE_DEFAULT
            }
        };

        RelayStage::Forwarded {
            frame,
            rssi,
            reading: Some(reading),
            verdict,
        }
    }

    async fn respond<D: RadioDriver>(
        &self,
        session: &mut RadioSession<D>,
        frame: Frame,
        rssi: i16,
        reading: Option<SensorSnapshot>,
        verdict: Verdict,
    ) -> RelayStage {
        if let Some(reading) = reading {
            self.state.set_sensors(&reading);
        }
        self.state.set_verdict(verdict);
        session.record_rssi(rssi);
        self.state.set_rssi(Some(rssi));

        let outcome = if self.state.is_paused() {
            debug!(message_id = frame.message_id, "Paused, reply suppressed");
            RelayOutcome::ReplySuppressed(verdict)
        } else {
            self.send_reply(session, frame.source, verdict).await;
            RelayOutcome::Replied(verdict)
        };

        info!(
            source = %frame.source,
            message_id = frame.message_id,
            rssi,
            classification = verdict.classification,
            buzzer_on = verdict.buzzer_active,
            replied = matches!(outcome, RelayOutcome::Replied(_)),
            "Relayed frame"
        );

        self.journal.record(ExchangeRecord::now(
            Role::Responder,
            match outcome {
                RelayOutcome::ReplySuppressed(_) => Outcome::ReplySuppressed,
                RelayOutcome::Replied(_) | RelayOutcome::Rejected(_) => Outcome::Replied,
            },
            frame.message_id,
            Some(rssi),
            reading.unwrap_or_default(),
            verdict,
        ));

        RelayStage::Done(outcome)
    }

    async fn send_reply<D: RadioDriver>(&self, session: &mut RadioSession<D>, to: NodeAddress, verdict: Verdict) {
        let packet = match encode_downlink(&verdict)
            .map_err(LinkError::from)
            .and_then(|payload| Ok(encode(to, self.local, REPLY_MESSAGE_ID, &payload)?))
        {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Cannot build reply: {}", e);
                return;
            }
        };

        self.indicators.tx.set(true);
        if let Err(e) = session.send(&packet).await {
            warn!("Reply send failed: {}", e);
        }
        self.indicators.tx.set(false);
    }

    /// Listen and relay until shutdown
    pub async fn run<D: RadioDriver>(self, radio: Arc<Mutex<RadioSession<D>>>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = radio.lock().await.listen().await {
            warn!("{}", LinkError::RadioBeginFailure(format!("cannot listen: {}", e)));
        }
        info!("Responder listening");

        loop {
            tokio::select! {
                _ = sleep(POLL_INTERVAL) => {
                    if self.state.is_paused() {
                        self.indicators.show_paused();
                    } else {
                        self.indicators.clear_paused();
                    }

                    let mut session = radio.lock().await;
                    if session.mode() != RadioMode::Listening {
                        if let Err(e) = session.listen().await {
                            warn!("{}", LinkError::RadioBeginFailure(format!("cannot listen: {}", e)));
                            continue;
                        }
                    }

                    match session.poll().await {
                        Ok(Some(packet)) => {
                            let outcome = self.handle_packet(&mut session, packet).await;
                            debug!(?outcome, "Packet handled");
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Radio poll failed: {}", e),
                    }
                }

                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("Responder stopped");
    }
}
