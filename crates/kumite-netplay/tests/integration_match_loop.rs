//! Two full match sessions over a shaped in-process link, driven
//! tick-by-tick with synthetic time: latency, duplication, reordering,
//! desync detection and full-state resync recovery.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use kumite_netplay::{
    ConnectionState, MatchConfig, MatchEvent, MatchRunner, MatchSession, PeerSession,
    SharedTuning, transport::memory::MemoryTransport,
};
use support::{DuelSim, LaggyEnd, LaggyLink, LinkShape};

const STEP: Duration = Duration::from_nanos(16_666_667);
const SESSION_CODE: u32 = 42;

/// Deterministic movement-only input pattern (no opposing directions, so
/// SOCD never cancels; no attack bits, so nobody wins mid-test). Varies
/// often enough that hold-last prediction is frequently wrong.
fn raw_bits(side: usize, tick: u64) -> u16 {
    match (tick / 3 + side as u64 * 2) % 4 {
        0 => 0x04,
        1 => 0x08,
        2 => 0x01,
        _ => 0,
    }
}

struct Peer {
    session: MatchSession<DuelSim>,
    events: Receiver<MatchEvent>,
    confirmed: BTreeMap<u32, u64>,
    desyncs: Vec<u32>,
    resyncs: Vec<u32>,
    connections: Vec<ConnectionState>,
}

impl Peer {
    fn new(
        local_id: u32,
        remote_id: u32,
        transport: Arc<LaggyEnd>,
        sim: DuelSim,
        config: MatchConfig,
        base: Instant,
    ) -> Self {
        let peer_session = PeerSession::new(SESSION_CODE, local_id, remote_id, base);
        let (session, events) =
            MatchSession::new(peer_session, transport, sim, SharedTuning::default(), config)
                .expect("session");
        Self {
            session,
            events,
            confirmed: BTreeMap::new(),
            desyncs: Vec::new(),
            resyncs: Vec::new(),
            connections: Vec::new(),
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                MatchEvent::ConfirmedFrame {
                    frame, checksum, ..
                } => {
                    let previous = self.confirmed.insert(frame, checksum);
                    assert!(
                        previous.is_none(),
                        "frame {frame} published more than once"
                    );
                }
                MatchEvent::Desync { frame, .. } => self.desyncs.push(frame),
                MatchEvent::Resync { frame } => self.resyncs.push(frame),
                MatchEvent::Connection(state) => self.connections.push(state),
                _ => {}
            }
        }
    }
}

struct Harness {
    a: Peer,
    b: Peer,
    link: LaggyLink,
    base: Instant,
    tick: u64,
}

impl Harness {
    fn new(a_to_b: LinkShape, b_to_a: LinkShape, sims: (DuelSim, DuelSim), config: MatchConfig) -> Self {
        let (ta, tb, link) = LaggyLink::pair(a_to_b, b_to_a);
        let base = Instant::now();
        // Peer 1 has the lower id: host, P1.
        let a = Peer::new(1, 2, ta, sims.0, config, base);
        let b = Peer::new(2, 1, tb, sims.1, config, base);
        Self {
            a,
            b,
            link,
            base,
            tick: 0,
        }
    }

    fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick += 1;
            let now = self.base + STEP * self.tick as u32;
            self.link.pump();
            self.a
                .session
                .tick(now, raw_bits(0, self.tick))
                .expect("peer A tick");
            self.b
                .session
                .tick(now, raw_bits(1, self.tick))
                .expect("peer B tick");
            self.a.drain_events();
            self.b.drain_events();
        }
    }

    /// Every frame both sides confirmed must have identical checksums.
    fn assert_confirmed_frames_match(&self, at_least: usize) {
        let common: Vec<u32> = self
            .a
            .confirmed
            .keys()
            .filter(|f| self.b.confirmed.contains_key(f))
            .copied()
            .collect();
        assert!(
            common.len() >= at_least,
            "only {} common confirmed frames",
            common.len()
        );
        for frame in common {
            assert_eq!(
                self.a.confirmed[&frame], self.b.confirmed[&frame],
                "checksum mismatch at frame {frame}"
            );
        }
    }
}

#[test]
fn peers_converge_across_a_laggy_link() {
    // RTT of 4 frames, jitter window 1 (the default): every remote input
    // is first simulated against a prediction, then confirmed late.
    let mut h = Harness::new(
        LinkShape::delay(2),
        LinkShape::delay(2),
        (DuelSim::default(), DuelSim::default()),
        MatchConfig::default(),
    );
    h.run(240);

    h.assert_confirmed_frames_match(150);
    assert!(h.a.desyncs.is_empty(), "desyncs: {:?}", h.a.desyncs);
    assert!(h.b.desyncs.is_empty(), "desyncs: {:?}", h.b.desyncs);
    assert!(h.a.resyncs.is_empty() && h.b.resyncs.is_empty());
}

#[test]
fn duplicates_and_reordering_are_tolerated() {
    let shape_ab = LinkShape {
        delay: 3,
        duplicate: true,
        reorder: true,
    };
    let shape_ba = LinkShape {
        delay: 1,
        duplicate: true,
        reorder: true,
    };
    let mut h = Harness::new(
        shape_ab,
        shape_ba,
        (DuelSim::default(), DuelSim::default()),
        MatchConfig::default(),
    );
    h.run(240);

    h.assert_confirmed_frames_match(150);
    assert!(h.a.desyncs.is_empty() && h.b.desyncs.is_empty());
}

#[test]
fn divergent_simulations_report_desync_once() {
    // The two sims disagree from frame zero; inputs are identical, so the
    // checksum exchange must catch it and report exactly one mismatch.
    let mut h = Harness::new(
        LinkShape::delay(1),
        LinkShape::delay(1),
        (DuelSim::default(), DuelSim::with_health(90)),
        MatchConfig::default(),
    );
    h.run(120);

    let total = h.a.desyncs.len() + h.b.desyncs.len();
    assert!(total >= 1, "no desync detected");
    assert!(h.a.desyncs.len() <= 1, "desync reported more than once");
    assert!(h.b.desyncs.len() <= 1, "desync reported more than once");
}

#[test]
fn rtt_spike_forces_resync_and_recovery() {
    let config = MatchConfig {
        snapshot_capacity: 16,
        ..Default::default()
    };
    let mut h = Harness::new(
        LinkShape::delay(2),
        LinkShape::delay(2),
        (DuelSim::default(), DuelSim::default()),
        config,
    );

    // Settle, then stall the B->A direction far past the rollback window.
    h.run(100);
    h.link.set_delay(1, 30);
    h.run(60);
    h.link.set_delay(1, 2);
    h.run(300);

    assert!(
        !h.a.resyncs.is_empty(),
        "the starved peer never resynchronized"
    );
    // Resync is telemetry, not a desync.
    assert!(h.a.desyncs.is_empty(), "desyncs: {:?}", h.a.desyncs);
    assert!(h.b.desyncs.is_empty(), "desyncs: {:?}", h.b.desyncs);

    // After the last rebase both timelines agree and keep advancing.
    let last_resync = h.a.resyncs.iter().chain(&h.b.resyncs).copied().max();
    let floor = last_resync.unwrap_or(0);
    let late_common: Vec<u32> = h
        .a
        .confirmed
        .keys()
        .filter(|&&f| f > floor && h.b.confirmed.contains_key(&f))
        .copied()
        .collect();
    assert!(
        late_common.len() >= 100,
        "only {} confirmed frames after the resync",
        late_common.len()
    );
    for frame in late_common {
        assert_eq!(h.a.confirmed[&frame], h.b.confirmed[&frame]);
    }
}

#[test]
fn runner_threads_drive_a_memory_pair() {
    let (ta, tb) = MemoryTransport::pair();
    let base = Instant::now();
    let (session_a, events_a) = MatchSession::new(
        PeerSession::new(SESSION_CODE, 1, 2, base),
        Arc::new(ta),
        DuelSim::default(),
        SharedTuning::default(),
        MatchConfig::default(),
    )
    .expect("session A");
    let (session_b, events_b) = MatchSession::new(
        PeerSession::new(SESSION_CODE, 2, 1, base),
        Arc::new(tb),
        DuelSim::default(),
        SharedTuning::default(),
        MatchConfig::default(),
    )
    .expect("session B");

    let runner_a = MatchRunner::spawn(session_a, events_a);
    let runner_b = MatchRunner::spawn(session_b, events_b);
    runner_a.set_local_input(0x04);
    runner_b.set_local_input(0x08);

    std::thread::sleep(Duration::from_millis(500));

    let mut confirmed = 0usize;
    let mut connected = false;
    while let Ok(event) = runner_a.events().try_recv() {
        match event {
            MatchEvent::ConfirmedFrame { .. } => confirmed += 1,
            MatchEvent::Connection(ConnectionState::Connected) => connected = true,
            MatchEvent::Desync { frame, .. } => panic!("desync at {frame}"),
            _ => {}
        }
    }
    assert!(connected);
    assert!(confirmed > 5, "only {confirmed} frames confirmed in 500ms");
    while runner_b.events().try_recv().is_ok() {}

    runner_a.teardown();
    runner_b.teardown();
}

#[test]
fn silent_link_trips_liveness_and_pauses_the_loop() {
    let mut h = Harness::new(
        LinkShape::delay(1),
        LinkShape::delay(1),
        (DuelSim::default(), DuelSim::default()),
        MatchConfig::default(),
    );
    h.run(60);
    assert!(h.a.connections.contains(&ConnectionState::Connected));

    // Total silence on the wire: no pump, nothing arrives. After the
    // liveness timeout both ends declare the connection dead and the loop
    // pauses instead of predicting indefinitely.
    let silent_ticks = (Duration::from_secs(6).as_nanos() / STEP.as_nanos()) as u64;
    for _ in 0..silent_ticks {
        h.tick += 1;
        let now = h.base + STEP * h.tick as u32;
        h.a.session.tick(now, 0).expect("peer A tick");
        h.b.session.tick(now, 0).expect("peer B tick");
        h.a.drain_events();
        h.b.drain_events();
    }

    assert!(
        h.a.connections.contains(&ConnectionState::Disconnected),
        "liveness timeout never tripped: {:?}",
        h.a.connections
    );
    assert!(h.b.connections.contains(&ConnectionState::Disconnected));
}
