//! # Simulated Air Interface
//!
//! Two linked in-memory radios for tests and bench runs without hardware.
//!
//! A transmitted packet reaches the peer only if the peer is listening at
//! that moment, as with a real half-duplex radio. The air can be silenced
//! to simulate a dead link, and arbitrary packets can be injected to
//! simulate cross-talk or corrupted frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::trace;

use super::driver::{RadioDriver, RawPacket};
use crate::error::Result;
use crate::settings::RadioConfig;

/// RSSI reported for simulated packets unless overridden
pub const DEFAULT_SIM_RSSI: i16 = -72;

/// Which radio of the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    First,
    Second,
}

#[derive(Default)]
struct SimNode {
    listening: AtomicBool,
    inbox: Mutex<VecDeque<RawPacket>>,
    config: Mutex<Option<RadioConfig>>,
}

struct AirState {
    silenced: AtomicBool,
    rssi: AtomicI32,
    nodes: [Arc<SimNode>; 2],
    transmissions: Mutex<Vec<(Endpoint, Vec<u8>)>>,
}

impl AirState {
    fn node(&self, endpoint: Endpoint) -> &Arc<SimNode> {
        match endpoint {
            Endpoint::First => &self.nodes[0],
            Endpoint::Second => &self.nodes[1],
        }
    }

    fn deliver(&self, to: Endpoint, bytes: Vec<u8>) -> bool {
        let node = self.node(to);
        if !node.listening.load(Ordering::SeqCst) {
            trace!(?to, "Peer not listening, packet lost");
            return false;
        }

        let rssi = self.rssi.load(Ordering::Relaxed) as i16;
        node.inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(RawPacket { bytes, rssi });
        true
    }
}

/// Control handle for the shared air between two [`SimRadio`]s
#[derive(Clone)]
pub struct SimulatedAir {
    state: Arc<AirState>,
}

impl SimulatedAir {
    /// Create two radios sharing one air interface
    pub fn pair() -> (SimulatedAir, SimRadio, SimRadio) {
        let state = Arc::new(AirState {
            silenced: AtomicBool::new(false),
            rssi: AtomicI32::new(DEFAULT_SIM_RSSI as i32),
            nodes: [Arc::new(SimNode::default()), Arc::new(SimNode::default())],
            transmissions: Mutex::new(Vec::new()),
        });

        let first = SimRadio {
            endpoint: Endpoint::First,
            state: state.clone(),
        };
        let second = SimRadio {
            endpoint: Endpoint::Second,
            state: state.clone(),
        };

        (SimulatedAir { state }, first, second)
    }

    /// Drop every transmitted packet while `on`
    pub fn silence(&self, on: bool) {
        self.state.silenced.store(on, Ordering::SeqCst);
    }

    /// RSSI attached to delivered packets
    pub fn set_rssi(&self, rssi: i16) {
        self.state.rssi.store(rssi as i32, Ordering::Relaxed);
    }

    /// Put raw bytes on the air towards `to`, bypassing the silence switch
    ///
    /// Returns whether the radio was listening and received them.
    pub fn inject(&self, to: Endpoint, bytes: Vec<u8>) -> bool {
        self.state.deliver(to, bytes)
    }

    /// Whether the given radio is currently in receive mode
    pub fn is_listening(&self, endpoint: Endpoint) -> bool {
        self.state.node(endpoint).listening.load(Ordering::SeqCst)
    }

    /// Every packet transmitted so far, with its sender
    pub fn transmissions(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.state
            .transmissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Last configuration applied to the given radio
    pub fn applied_config(&self, endpoint: Endpoint) -> Option<RadioConfig> {
        *self
            .state
            .node(endpoint)
            .config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// One simulated radio
pub struct SimRadio {
    endpoint: Endpoint,
    state: Arc<AirState>,
}

impl SimRadio {
    fn own(&self) -> &Arc<SimNode> {
        self.state.node(self.endpoint)
    }

    fn peer(&self) -> Endpoint {
        match self.endpoint {
            Endpoint::First => Endpoint::Second,
            Endpoint::Second => Endpoint::First,
        }
    }
}

#[async_trait]
impl RadioDriver for SimRadio {
    async fn idle(&mut self) -> Result<()> {
        let own = self.own();
        own.listening.store(false, Ordering::SeqCst);
        own.inbox.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    async fn start_receive(&mut self) -> Result<()> {
        self.own().listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn transmit(&mut self, packet: &[u8]) -> Result<()> {
        self.state
            .transmissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.endpoint, packet.to_vec()));

        if self.state.silenced.load(Ordering::SeqCst) {
            trace!(from = ?self.endpoint, "Air silenced, packet lost");
            return Ok(());
        }

        self.state.deliver(self.peer(), packet.to_vec());
        Ok(())
    }

    async fn poll_packet(&mut self) -> Result<Option<RawPacket>> {
        let own = self.own();
        if !own.listening.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(own.inbox.lock().unwrap_or_else(|e| e.into_inner()).pop_front())
    }

    async fn configure(&mut self, config: &RadioConfig) -> Result<()> {
        *self.own().config.lock().unwrap_or_else(|e| e.into_inner()) = Some(*config);
        Ok(())
    }
}
