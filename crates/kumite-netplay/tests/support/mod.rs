//! Shared test fixtures: a minimal deterministic fighting simulation and a
//! latency/loss-shaping in-process link.

use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use kumite_core::{FrameInputs, FrameOutcome, PlayerSide, SimError, Simulation};
use kumite_netplay::{ConnectionState, PeerTransport, TransportError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelState {
    pub frame: u32,
    pub positions: [i32; 2],
    pub health: [i32; 2],
}

impl Default for DuelState {
    fn default() -> Self {
        Self {
            frame: 0,
            positions: [-100, 100],
            health: [100, 100],
        }
    }
}

/// Directions move, attack bits chip the opponent, a player wins when the
/// opponent's health reaches zero. Pure function of (state, inputs).
#[derive(Debug, Default)]
pub struct DuelSim {
    state: DuelState,
}

impl DuelSim {
    /// A sim whose starting state diverges from the default, for forcing
    /// checksum mismatches.
    pub fn with_health(health: i32) -> Self {
        Self {
            state: DuelState {
                health: [health, health],
                ..Default::default()
            },
        }
    }
}

impl Simulation for DuelSim {
    fn advance(&mut self, inputs: &FrameInputs) -> FrameOutcome {
        let bits = [inputs.p1, inputs.p2];
        for (i, b) in bits.iter().enumerate() {
            if b & 0x04 != 0 {
                self.state.positions[i] -= 2;
            }
            if b & 0x08 != 0 {
                self.state.positions[i] += 2;
            }
            let damage = (b >> 4).count_ones() as i32;
            self.state.health[1 - i] -= damage;
        }
        self.state.frame += 1;
        let victory = if self.state.health[1] <= 0 {
            Some(PlayerSide::P1)
        } else if self.state.health[0] <= 0 {
            Some(PlayerSide::P2)
        } else {
            None
        };
        FrameOutcome { victory }
    }

    fn save_state(&self) -> Result<Vec<u8>, SimError> {
        postcard::to_stdvec(&self.state).map_err(|e| SimError::Serialize(e.to_string()))
    }

    fn load_state(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        self.state =
            postcard::from_bytes(bytes).map_err(|e| SimError::Deserialize(e.to_string()))?;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = DuelState::default();
    }
}

/// Shaping knobs for one direction of the link.
#[derive(Debug, Clone, Copy)]
pub struct LinkShape {
    /// Pump steps a datagram spends in flight.
    pub delay: u64,
    /// Deliver every datagram twice.
    pub duplicate: bool,
    /// Deliver each pump batch in reverse order.
    pub reorder: bool,
}

impl LinkShape {
    pub fn delay(delay: u64) -> Self {
        Self {
            delay,
            duplicate: false,
            reorder: false,
        }
    }
}

type FlightQueue = Arc<Mutex<VecDeque<(u64, Bytes)>>>;

/// One endpoint of a shaped in-process link.
pub struct LaggyEnd {
    outbound: FlightQueue,
    delay: Arc<AtomicU64>,
    duplicate: bool,
    clock: Arc<AtomicU64>,
    incoming_rx: Receiver<Bytes>,
    closed: Arc<AtomicBool>,
}

impl PeerTransport for LaggyEnd {
    fn send(&self, datagram: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        let now = self.clock.load(Ordering::Acquire);
        let delay = self.delay.load(Ordering::Acquire);
        let mut queue = self.outbound.lock();
        queue.push_back((now + delay, datagram.clone()));
        if self.duplicate {
            queue.push_back((now + delay + 1, datagram));
        }
        Ok(())
    }

    fn incoming(&self) -> &Receiver<Bytes> {
        &self.incoming_rx
    }

    fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }

    fn restart(&self) -> Result<(), TransportError> {
        self.closed.store(false, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// The pump moving in-flight datagrams toward their destination; the test
/// advances it one step per simulated tick.
pub struct LaggyLink {
    clock: Arc<AtomicU64>,
    directions: [(FlightQueue, Sender<Bytes>, bool); 2],
    delays: [Arc<AtomicU64>; 2],
}

impl LaggyLink {
    pub fn pair(a_to_b: LinkShape, b_to_a: LinkShape) -> (Arc<LaggyEnd>, Arc<LaggyEnd>, Self) {
        let clock = Arc::new(AtomicU64::new(0));
        let (a_in_tx, a_in_rx) = bounded(512);
        let (b_in_tx, b_in_rx) = bounded(512);
        let a_out: FlightQueue = Arc::new(Mutex::new(VecDeque::new()));
        let b_out: FlightQueue = Arc::new(Mutex::new(VecDeque::new()));
        let a_delay = Arc::new(AtomicU64::new(a_to_b.delay));
        let b_delay = Arc::new(AtomicU64::new(b_to_a.delay));

        let a = Arc::new(LaggyEnd {
            outbound: a_out.clone(),
            delay: a_delay.clone(),
            duplicate: a_to_b.duplicate,
            clock: clock.clone(),
            incoming_rx: a_in_rx,
            closed: Arc::new(AtomicBool::new(false)),
        });
        let b = Arc::new(LaggyEnd {
            outbound: b_out.clone(),
            delay: b_delay.clone(),
            duplicate: b_to_a.duplicate,
            clock: clock.clone(),
            incoming_rx: b_in_rx,
            closed: Arc::new(AtomicBool::new(false)),
        });
        let link = Self {
            clock,
            directions: [
                (a_out, b_in_tx, a_to_b.reorder),
                (b_out, a_in_tx, b_to_a.reorder),
            ],
            delays: [a_delay, b_delay],
        };
        (a, b, link)
    }

    /// Change the in-flight delay of one direction (0 = a->b, 1 = b->a)
    /// for datagrams sent from now on.
    pub fn set_delay(&self, direction: usize, delay: u64) {
        self.delays[direction].store(delay, Ordering::Release);
    }

    /// Advance the link one step, delivering whatever became due.
    pub fn pump(&self) {
        let now = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
        for (flight, sink, reorder) in &self.directions {
            let mut due = Vec::new();
            {
                let mut queue = flight.lock();
                while queue.front().is_some_and(|(at, _)| *at <= now) {
                    if let Some((_, datagram)) = queue.pop_front() {
                        due.push(datagram);
                    }
                }
            }
            if *reorder {
                due.reverse();
            }
            for datagram in due {
                let _ = sink.try_send(datagram);
            }
        }
    }
}
