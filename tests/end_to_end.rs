//! Transmitter and Receiver exchanging over the simulated air interface

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use biodry_link::error::{LinkError, Result};
use biodry_link::frame::decoder::decode;
use biodry_link::frame::payload::{decode_downlink, SensorSnapshot, Verdict};
use biodry_link::frame::protocol::{NodeAddress, REPLY_MESSAGE_ID};
use biodry_link::link::{Classifier, ExchangeOutcome, Initiator, Responder, RESPONSE_TIMEOUT};
use biodry_link::node::indicators::{AlarmTimer, Indicators};
use biodry_link::node::state::SharedState;
use biodry_link::radio::sim::{Endpoint, SimRadio, SimulatedAir, DEFAULT_SIM_RSSI};
use biodry_link::radio::RadioSession;
use biodry_link::telemetry::Journal;

/// Backend stand-in returning a fixed verdict, or failing like a dropped network
struct FakeClassifier {
    verdict: Option<Verdict>,
    calls: AtomicUsize,
}

impl FakeClassifier {
    fn answering(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict: Some(verdict),
            calls: AtomicUsize::new(0),
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            verdict: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _reading: &SensorSnapshot) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict
            .ok_or_else(|| LinkError::BackendUnavailable("connection reset".to_string()))
    }
}

fn field_reading() -> SensorSnapshot {
    SensorSnapshot {
        humidity: 55.0,
        temperature: 28.3,
        ph: 6.5,
    }
}

struct Link {
    air: SimulatedAir,
    transmitter_state: Arc<SharedState>,
    transmitter_radio: RadioSession<SimRadio>,
    initiator: Initiator,
    receiver_state: Arc<SharedState>,
    responder: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Link {
    async fn start(classifier: Arc<dyn Classifier>) -> Self {
        let (air, first, second) = SimulatedAir::pair();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let receiver_state = Arc::new(SharedState::new());
        let responder = Responder::new(
            classifier,
            Arc::new(Mutex::new(())),
            receiver_state.clone(),
            Arc::new(Indicators::default()),
            Journal::disabled(),
        );
        let receiver_radio = Arc::new(Mutex::new(RadioSession::new(second)));
        let responder = tokio::spawn(responder.run(receiver_radio, shutdown_rx));

        // Let the responder enter receive mode before the first uplink
        while !air.is_listening(Endpoint::Second) {
            tokio::task::yield_now().await;
        }

        let transmitter_state = Arc::new(SharedState::new());
        transmitter_state.set_sensors(&field_reading());
        let initiator = Initiator::new(
            transmitter_state.clone(),
            Arc::new(Indicators::default()),
            Journal::disabled(),
        );

        Self {
            air,
            transmitter_state,
            transmitter_radio: RadioSession::new(first),
            initiator,
            receiver_state,
            responder,
            shutdown,
        }
    }

    async fn stop(self) {
        self.shutdown.send_replace(true);
        self.responder.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_verdict_relayed_within_window() {
    let classifier = FakeClassifier::answering(Verdict::new(true, false));
    let mut link = Link::start(classifier.clone()).await;

    let started = Instant::now();
    let report = link.initiator.run_cycle(&mut link.transmitter_radio).await;

    assert_eq!(report.outcome, ExchangeOutcome::Completed);
    assert!(started.elapsed() < RESPONSE_TIMEOUT);
    assert_eq!(report.verdict, Some(Verdict::new(true, false)));
    assert_eq!(link.transmitter_state.verdict(), Verdict::new(true, false));
    assert_eq!(link.transmitter_state.rssi(), Some(DEFAULT_SIM_RSSI));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    // Receiver kept the reading and the verdict it relayed
    assert_eq!(link.receiver_state.sensors(), field_reading());
    assert_eq!(link.receiver_state.verdict(), Verdict::new(true, false));
    assert!(link.receiver_state.backend_online());

    let mut alarm = AlarmTimer::new();
    assert!(!alarm.update(link.transmitter_state.verdict().buzzer_active, Instant::now()));

    let transmissions = link.air.transmissions();
    assert_eq!(transmissions.len(), 2);
    let (sender, reply) = &transmissions[1];
    assert_eq!(*sender, Endpoint::Second);
    let reply = decode(reply).unwrap();
    assert_eq!(reply.destination, NodeAddress::TRANSMITTER);
    assert_eq!(reply.source, NodeAddress::RECEIVER);
    assert_eq!(reply.message_id, REPLY_MESSAGE_ID);

    link.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_failure_still_answered() {
    let classifier = FakeClassifier::unreachable();
    let mut link = Link::start(classifier.clone()).await;
    link.transmitter_state.set_verdict(Verdict::new(true, true));

    let started = Instant::now();
    let report = link.initiator.run_cycle(&mut link.transmitter_radio).await;

    assert_eq!(report.outcome, ExchangeOutcome::Completed);
    assert!(started.elapsed() < RESPONSE_TIMEOUT);
    assert_eq!(report.verdict, Some(Verdict::SAFE_DEFAULT));
    assert_eq!(link.transmitter_state.verdict(), Verdict::new(false, false));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert!(!link.receiver_state.backend_online());

    let transmissions = link.air.transmissions();
    let reply = decode(&transmissions[1].1).unwrap();
    assert_eq!(decode_downlink(&reply.payload).unwrap(), Verdict::new(false, false));
    assert_eq!(
        String::from_utf8(reply.payload).unwrap(),
        r#"{"classification":false,"buzzer_on":false}"#
    );

    link.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_air_times_out() {
    let classifier = FakeClassifier::answering(Verdict::new(false, true));
    let mut link = Link::start(classifier.clone()).await;
    link.transmitter_state.set_verdict(Verdict::new(true, false));
    link.transmitter_state.set_rssi(Some(-80));
    link.air.silence(true);

    let started = Instant::now();
    let report = link.initiator.run_cycle(&mut link.transmitter_radio).await;

    assert_eq!(report.outcome, ExchangeOutcome::TimedOut);
    assert!(started.elapsed() >= RESPONSE_TIMEOUT);
    assert!(started.elapsed() < RESPONSE_TIMEOUT + Duration::from_millis(50));
    assert_eq!(report.verdict, None);
    assert_eq!(link.transmitter_state.verdict(), Verdict::new(true, false));
    assert_eq!(link.transmitter_state.rssi(), None);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);

    // The link recovers once the air clears
    link.air.silence(false);
    let report = link.initiator.run_cycle(&mut link.transmitter_radio).await;
    assert_eq!(report.outcome, ExchangeOutcome::Completed);
    assert_eq!(link.transmitter_state.verdict(), Verdict::new(false, true));
    assert_eq!(report.message_id, 1);

    link.stop().await;
}
