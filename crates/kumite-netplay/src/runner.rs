//! The match loop: transport on one side, the deterministic core on the
//! other.
//!
//! [`MatchSession`] owns every core piece exclusively (input source,
//! rollback coordinator, validator, round machine, clock) plus the
//! transport handle, jitter buffer and resync assembly; it is driven from
//! exactly one thread. [`MatchRunner`] wraps it in a dedicated thread with
//! a crossbeam control channel and an atomic local-input mask.
//!
//! Outbound facts flow through a single bounded event channel that
//! consumers poll; the core never calls into UI code.

use std::sync::{
    Arc,
    atomic::{AtomicU16, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info, warn};

use kumite_core::{
    ClockConfig, DeterminismValidator, FixedSimulationClock, InputFrame, InputSource,
    RollbackCoordinator, RollbackError, RoundPhase, RoundStateMachine, Simulation,
    snapshot::DEFAULT_SNAPSHOT_CAPACITY,
};
use kumite_netproto::{
    codec_dgram::{decode_datagram, encode_datagram},
    header::Header,
    messages::{
        Message,
        input::{FrameChecksum, InputBurst, MAX_BURST_FRAMES},
        resync::{ResyncReason, ResyncRequest, StateFrag},
        signal::Bye,
        sync::{Ping, Pong},
    },
    msg_id::MsgId,
    packet::PacketView,
};

use crate::{
    config::{MAX_JITTER_WINDOW, SharedTuning},
    error::NetplayError,
    jitter::JitterBuffer,
    resync::{ResyncAssembly, fragment_state},
    session::PeerSession,
    stats::{SharedStats, StatsTracker},
    transport::{ConnectionState, PeerTransport},
};

/// Ping cadence in simulation steps (once per second at 60 Hz).
const PING_INTERVAL_TICKS: u64 = 60;
/// Fast-forward when the peer's newest frame leads ours by more than this.
const CATCHUP_LEAD_THRESHOLD: u32 = 6;
/// Extra catch-up steps allowed per host tick, on top of the clock's own.
const MAX_CATCHUP_STEPS: u32 = 3;
/// How long to wait before repeating an unanswered resync request.
const RESYNC_RETRY_TICKS: u64 = 120;
/// How long the runner thread sleeps per control poll.
const TICK_POLL: std::time::Duration = std::time::Duration::from_millis(1);
const PAUSED_POLL: std::time::Duration = std::time::Duration::from_millis(10);

/// Facts published by the match loop, exactly once each.
#[derive(Debug, Clone)]
pub enum MatchEvent {
    /// Connection quality state changed (edge-triggered).
    Connection(ConnectionState),
    /// A frame became final: both inputs confirmed, any resimulation done.
    /// Published exactly once per frame, never during resimulation.
    ConfirmedFrame {
        frame: u32,
        state: Bytes,
        checksum: u64,
    },
    /// The round machine transitioned.
    RoundPhase {
        phase: RoundPhase,
        rounds_won: [u8; 2],
    },
    /// Checksum mismatch: the simulation diverged despite identical
    /// inputs. Reported once; never auto-corrected.
    Desync { frame: u32, local: u64, remote: u64 },
    /// A full-state resynchronization rebased the timeline (telemetry, not
    /// an error).
    Resync { frame: u32 },
    /// The peer said goodbye.
    PeerBye { reason_code: u8 },
}

#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    pub clock: ClockConfig,
    pub snapshot_capacity: usize,
    pub rounds_to_win: u8,
    pub event_queue_depth: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            rounds_to_win: 2,
            event_queue_depth: 1024,
        }
    }
}

/// One peer's entire match: must be driven by a single thread.
pub struct MatchSession<S: Simulation> {
    session: PeerSession,
    transport: Arc<dyn PeerTransport>,
    inbound: Receiver<Bytes>,
    tuning: SharedTuning,
    events_tx: Sender<MatchEvent>,

    clock: FixedSimulationClock,
    input_source: InputSource,
    coordinator: RollbackCoordinator<S>,
    validator: DeterminismValidator,
    rounds: RoundStateMachine,
    jitter: JitterBuffer,
    stats: StatsTracker,

    seq: u32,
    /// Local inputs the peer has not yet acknowledged, re-sent in every
    /// burst.
    sent_inputs: std::collections::BTreeMap<u32, u16>,
    /// The peer's in-order receive frontier, from its last burst.
    peer_next_wanted: u32,
    /// Newest frame the peer has reported input for; drives catch-up when
    /// this end has fallen behind (after a stall or a resync rewind).
    highest_remote_seen: Option<u32>,
    /// Highest frame already published as `ConfirmedFrame`.
    published_through: Option<u32>,
    tick_count: u64,
    resync_requested_tick: Option<u64>,
    next_resync_id: u32,
    assembly: Option<ResyncAssembly>,
    last_reported: Option<ConnectionState>,
    peer_closed: bool,
    started: bool,
    epoch: Instant,
}

impl<S: Simulation> MatchSession<S> {
    pub fn new(
        session: PeerSession,
        transport: Arc<dyn PeerTransport>,
        sim: S,
        tuning: SharedTuning,
        config: MatchConfig,
    ) -> Result<(Self, Receiver<MatchEvent>), NetplayError> {
        let local_side = session.local_side();
        let coordinator = RollbackCoordinator::new(sim, local_side, config.snapshot_capacity)?;
        let (events_tx, events_rx) = bounded(config.event_queue_depth);
        let inbound = transport.incoming().clone();
        let jitter_window = tuning.get().jitter_window_frames.min(MAX_JITTER_WINDOW);
        Ok((
            Self {
                session,
                transport,
                inbound,
                tuning,
                events_tx,
                clock: FixedSimulationClock::new(config.clock),
                input_source: InputSource::new(),
                coordinator,
                validator: DeterminismValidator::new(),
                rounds: RoundStateMachine::new(config.rounds_to_win),
                jitter: JitterBuffer::new(jitter_window),
                stats: StatsTracker::new(SharedStats::new()),
                seq: 1,
                sent_inputs: std::collections::BTreeMap::new(),
                peer_next_wanted: 0,
                highest_remote_seen: None,
                published_through: None,
                tick_count: 0,
                resync_requested_tick: None,
                next_resync_id: 1,
                assembly: None,
                last_reported: None,
                peer_closed: false,
                started: false,
                epoch: Instant::now(),
            },
            events_rx,
        ))
    }

    pub fn stats_handle(&self) -> Arc<SharedStats> {
        self.stats.shared()
    }

    pub fn tuning_handle(&self) -> SharedTuning {
        self.tuning.clone()
    }

    /// Re-anchor the clock after an externally imposed pause.
    pub fn reanchor(&mut self, now: Instant) {
        self.clock.reanchor(now);
    }

    /// One host tick: drain the network, then run however many fixed steps
    /// are due. The simulation step itself never blocks on I/O.
    pub fn tick(&mut self, now: Instant, local_raw: u16) -> Result<(), NetplayError> {
        self.drain_inbound(now);

        let effective = self.effective_connection(now);
        if self.last_reported != Some(effective) {
            self.emit(MatchEvent::Connection(effective));
            self.last_reported = Some(effective);
        }
        if effective != ConnectionState::Connected {
            // Frame numbers stop advancing while disconnected; predicting
            // indefinitely would only grow the eventual rollback.
            self.clock.reanchor(now);
            return Ok(());
        }

        let steps = self.clock.tick(now);
        for _ in 0..steps {
            self.step(now, local_raw)?;
        }
        // Fast-forward when the peer has pulled ahead (a stall or a resync
        // rewind on this end); bounded so a burst of catch-up cannot hitch
        // the host.
        let mut extra = 0;
        while extra < MAX_CATCHUP_STEPS && self.remote_lead() > CATCHUP_LEAD_THRESHOLD {
            self.step(now, local_raw)?;
            extra += 1;
        }
        Ok(())
    }

    fn remote_lead(&self) -> u32 {
        self.highest_remote_seen
            .map_or(0, |h| h.saturating_sub(self.coordinator.current_frame()))
    }

    /// Orderly shutdown: goodbye, close, clear. Nothing fires afterwards.
    pub fn teardown(&mut self) {
        self.send_datagram(&Bye { reason_code: 0 });
        self.transport.close();
        if let Err(e) = self.coordinator.clear() {
            warn!(error = %e, "simulation reset failed during teardown");
        }
        self.rounds.reset_rounds();
        self.jitter.reset(0);
        self.sent_inputs.clear();
        self.validator.clear();
        info!("match session torn down");
    }

    fn step(&mut self, now: Instant, local_raw: u16) -> Result<(), NetplayError> {
        self.tick_count += 1;

        // Tuning is re-read every step so changes land on the next tick.
        let tuning = self.tuning.get();
        self.jitter
            .set_window(tuning.jitter_window_frames.min(MAX_JITTER_WINDOW));

        for input in self.jitter.pull_due(self.tick_count) {
            self.coordinator.on_remote_input(input);
        }

        if !self.started {
            self.started = true;
            self.rounds.start();
            self.emit(MatchEvent::RoundPhase {
                phase: self.rounds.phase(),
                rounds_won: self.rounds.rounds_won(),
            });
        }

        let current = self.coordinator.current_frame();
        let local = if self.input_source.next_frame() <= current {
            self.input_source.advance_to(current);
            self.input_source.capture(local_raw, now, &tuning.shaping())
        } else {
            // A resync rewound the timeline below the capture counter:
            // replay the input already captured (and sent) for this frame.
            let bits = self.coordinator.confirmed_local(current).unwrap_or_else(|| {
                warn!(frame = current, "stored local input missing during catch-up");
                0
            });
            InputFrame::new(current, bits)
        };

        // Recorded at capture time so the value survives a failed advance
        // (the frame may be replayed after a resync rebase).
        self.coordinator.record_local(local);
        self.sent_inputs.insert(local.frame, local.bits);
        self.send_input_burst();
        if self.tick_count.is_multiple_of(PING_INTERVAL_TICKS) {
            self.send_ping(now);
        }

        match self.coordinator.advance(local) {
            Ok(_) => {
                self.resync_requested_tick = None;
                self.publish_final_frames();
                Ok(())
            }
            Err(RollbackError::DepthExceeded { frame }) => {
                self.request_resync(frame);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn drain_inbound(&mut self, now: Instant) {
        while let Ok(datagram) = self.inbound.try_recv() {
            let view = match decode_datagram(&datagram) {
                Ok(view) => view,
                Err(e) => {
                    debug!(error = %e, "dropping undecodable datagram");
                    continue;
                }
            };
            self.stats.on_packet(view.header.seq);
            self.session.note_inbound(now);
            self.dispatch(view, now);
        }
    }

    fn dispatch(&mut self, view: PacketView<'_>, now: Instant) {
        match view.msg_id {
            MsgId::InputBurst => {
                let Some(burst) = decode_or_drop::<InputBurst>(&view) else {
                    return;
                };
                self.on_input_burst(burst);
            }
            MsgId::Ping => {
                let Some(ping) = decode_or_drop::<Ping>(&view) else {
                    return;
                };
                self.send_datagram(&Pong { t_ms: ping.t_ms });
            }
            MsgId::Pong => {
                let Some(pong) = decode_or_drop::<Pong>(&view) else {
                    return;
                };
                let now_ms = self.elapsed_ms(now);
                self.stats.on_pong(now_ms.wrapping_sub(pong.t_ms) as f32);
            }
            MsgId::ResyncRequest => {
                let Some(request) = decode_or_drop::<ResyncRequest>(&view) else {
                    return;
                };
                info!(
                    from_frame = request.from_frame,
                    reason = ?request.reason,
                    "peer requested full-state resync"
                );
                self.serve_resync();
            }
            MsgId::StateFrag => {
                let Some(frag) = decode_or_drop::<StateFrag>(&view) else {
                    return;
                };
                self.on_state_frag(frag);
            }
            MsgId::Bye => {
                let reason_code = decode_or_drop::<Bye>(&view).map_or(0, |b| b.reason_code);
                info!(reason_code, "peer closed the session");
                self.peer_closed = true;
                self.emit(MatchEvent::PeerBye { reason_code });
            }
            other => {
                debug!(?other, "ignoring signaling message on the match channel");
            }
        }
    }

    fn on_input_burst(&mut self, burst: InputBurst) {
        for (i, bits) in burst.bits.iter().enumerate() {
            let frame = burst.start_frame.wrapping_add(i as u32);
            self.jitter
                .push(InputFrame::new(frame, *bits), self.tick_count);
            if self.highest_remote_seen.is_none_or(|h| frame > h) {
                self.highest_remote_seen = Some(frame);
            }
        }
        if burst.ack_frame > self.peer_next_wanted {
            self.peer_next_wanted = burst.ack_frame;
            let acked = self.peer_next_wanted;
            self.sent_inputs.retain(|&frame, _| frame >= acked);
        }
        if let Some(FrameChecksum { frame, sum }) = burst.checksum
            && let Some(report) = self.validator.record_remote_checksum(frame, sum)
        {
            self.emit(MatchEvent::Desync {
                frame: report.frame,
                local: report.local,
                remote: report.remote,
            });
        }
    }

    fn send_input_burst(&mut self) {
        let Some((&oldest, _)) = self.sent_inputs.first_key_value() else {
            return;
        };
        let bits: Vec<u16> = self
            .sent_inputs
            .range(oldest..)
            .take(MAX_BURST_FRAMES)
            .map(|(_, &bits)| bits)
            .collect();
        let burst = InputBurst {
            start_frame: oldest,
            bits,
            ack_frame: self.jitter.next_release(),
            checksum: self
                .coordinator
                .latest_confirmed_checksum()
                .map(|(frame, sum)| FrameChecksum { frame, sum }),
        };
        self.send_datagram(&burst);
    }

    fn send_ping(&mut self, now: Instant) {
        let t_ms = self.elapsed_ms(now);
        self.send_datagram(&Ping { t_ms });
    }

    /// Publish every newly final frame, exactly once, after any
    /// resimulation for it has completed.
    fn publish_final_frames(&mut self) {
        let Some(frontier) = self.coordinator.confirmed_frontier() else {
            return;
        };
        let from = self.published_through.map_or(0, |p| p + 1);
        for frame in from..=frontier {
            let (state, checksum) = match self.coordinator.snapshot(frame) {
                Ok(snapshot) => (Bytes::copy_from_slice(&snapshot.state), snapshot.checksum),
                Err(e) => {
                    warn!(frame, error = %e, "final frame left the window unpublished");
                    continue;
                }
            };
            if let Some(report) = self.validator.record_local_checksum(frame, checksum) {
                self.emit(MatchEvent::Desync {
                    frame: report.frame,
                    local: report.local,
                    remote: report.remote,
                });
            }
            self.emit(MatchEvent::ConfirmedFrame {
                frame,
                state,
                checksum,
            });
            if let Some(victory) = self.coordinator.outcome(frame).and_then(|o| o.victory) {
                let phase = self.rounds.on_victory(victory);
                self.emit(MatchEvent::RoundPhase {
                    phase,
                    rounds_won: self.rounds.rounds_won(),
                });
            }
        }
        self.published_through = Some(frontier);
        self.stats.set_validation(
            self.validator.last_validated_frame(),
            self.validator.last_mismatch_frame(),
        );
    }

    fn request_resync(&mut self, frame: u32) {
        let due = self
            .resync_requested_tick
            .is_none_or(|t| self.tick_count.saturating_sub(t) >= RESYNC_RETRY_TICKS);
        if !due {
            return;
        }
        warn!(frame, "rollback depth exceeded; requesting full-state resync");
        self.resync_requested_tick = Some(self.tick_count);
        self.send_datagram(&ResyncRequest {
            from_frame: frame,
            reason: ResyncReason::DepthExceeded,
        });
    }

    /// The serving side: snapshot the newest confirmed frame (so the
    /// restored state can never itself roll back), ship it, and rebase the
    /// local window to it.
    fn serve_resync(&mut self) {
        let Some((frame, _)) = self.coordinator.latest_confirmed_checksum() else {
            warn!("resync requested before any confirmed frame exists");
            return;
        };
        let state = match self.coordinator.snapshot(frame) {
            Ok(snapshot) => snapshot.state.clone(),
            Err(e) => {
                warn!(frame, error = %e, "confirmed snapshot unavailable for resync");
                return;
            }
        };
        let resync_id = self.next_resync_id;
        self.next_resync_id = self.next_resync_id.wrapping_add(1);
        let frags = fragment_state(resync_id, frame, &state);
        info!(frame, fragments = frags.len(), "serving full-state resync");
        for frag in &frags {
            self.send_datagram(frag);
        }
        self.coordinator.rebase_window(frame);
        self.validator.prune_before(frame + 1);
        self.published_through = self.published_through.max(Some(frame));
        self.emit(MatchEvent::Resync { frame });
    }

    fn on_state_frag(&mut self, frag: StateFrag) {
        if self
            .assembly
            .as_ref()
            .is_some_and(|a| a.resync_id() != frag.resync_id)
        {
            self.assembly = None;
        }
        let frame = frag.frame;
        let result = self
            .assembly
            .get_or_insert_with(|| ResyncAssembly::new(&frag))
            .accept(frag);
        match result {
            Ok(None) => {}
            Ok(Some(state)) => {
                self.assembly = None;
                if let Err(e) = self.apply_resync_state(frame, state) {
                    error!(frame, error = %e, "failed to adopt resync state");
                }
            }
            Err(e) => {
                warn!(error = %e, "resync reassembly failed; waiting for a retry");
                self.assembly = None;
            }
        }
    }

    /// The requesting side: adopt the peer's state wholesale and restart
    /// the timeline just past it.
    fn apply_resync_state(&mut self, frame: u32, state: Vec<u8>) -> Result<(), NetplayError> {
        self.coordinator.reset_to(frame, state)?;
        self.validator.prune_before(frame + 1);
        self.jitter.reset(frame + 1);
        self.input_source.advance_to(frame + 1);
        self.sent_inputs = self.sent_inputs.split_off(&(frame + 1));
        // Never regress: frames already published stay published once even
        // if a crossing resync rebased below them.
        self.published_through = self.published_through.max(Some(frame));
        self.resync_requested_tick = None;
        info!(frame, "adopted resync state; timeline rebased");
        self.emit(MatchEvent::Resync { frame });
        Ok(())
    }

    fn effective_connection(&self, now: Instant) -> ConnectionState {
        if self.peer_closed {
            return ConnectionState::Disconnected;
        }
        let state = self.transport.state();
        if state == ConnectionState::Connected && !self.session.is_alive(now) {
            return ConnectionState::Disconnected;
        }
        state
    }

    fn send_datagram<T: Message>(&mut self, payload: &T) {
        let mut header = Header::new(T::msg_id() as u8);
        header.session_id = self.session.session_code;
        header.peer_id = self.session.local_id;
        header.seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        match encode_datagram(header, payload) {
            Ok(bytes) => {
                if let Err(e) = self.transport.send(Bytes::from(bytes)) {
                    debug!(error = %e, "datagram send failed");
                }
            }
            Err(e) => warn!(error = %e, "datagram encode failed"),
        }
    }

    fn emit(&self, event: MatchEvent) {
        if self.events_tx.try_send(event).is_err() {
            warn!("match event queue full; dropping event");
        }
    }

    fn elapsed_ms(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.epoch).as_millis() as u32
    }
}

fn decode_or_drop<T: serde::de::DeserializeOwned>(view: &PacketView<'_>) -> Option<T> {
    match view.decode_payload() {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(msg_id = ?view.msg_id, error = %e, "dropping undecodable payload");
            None
        }
    }
}

enum ControlMessage {
    Stop,
    Pause(bool),
}

/// Dedicated simulation thread around a [`MatchSession`].
///
/// Local input crosses the thread boundary as an atomic bitmask sampled at
/// the start of each step; control crosses as a crossbeam channel. After
/// [`MatchRunner::teardown`] returns, no timer or queued callback fires.
pub struct MatchRunner {
    ctrl_tx: Sender<ControlMessage>,
    local_input: Arc<AtomicU16>,
    events_rx: Receiver<MatchEvent>,
    stats: Arc<SharedStats>,
    tuning: SharedTuning,
    thread: Option<JoinHandle<()>>,
}

impl MatchRunner {
    pub fn spawn<S: Simulation + Send + 'static>(
        session: MatchSession<S>,
        events_rx: Receiver<MatchEvent>,
    ) -> Self {
        let stats = session.stats_handle();
        let tuning = session.tuning_handle();
        let local_input = Arc::new(AtomicU16::new(0));
        let (ctrl_tx, ctrl_rx) = bounded(32);

        let input = Arc::clone(&local_input);
        let thread = thread::Builder::new()
            .name("kumite-match".to_string())
            .spawn(move || run_loop(session, ctrl_rx, input))
            .expect("spawn match thread");

        Self {
            ctrl_tx,
            local_input,
            events_rx,
            stats,
            tuning,
            thread: Some(thread),
        }
    }

    /// Latest local input sample; picked up at the next simulation step.
    pub fn set_local_input(&self, bits: u16) {
        self.local_input.store(bits, Ordering::Release);
    }

    pub fn pause(&self, paused: bool) {
        let _ = self.ctrl_tx.send(ControlMessage::Pause(paused));
    }

    /// The outbound event channel; poll or block as the consumer prefers.
    pub fn events(&self) -> &Receiver<MatchEvent> {
        &self.events_rx
    }

    pub fn stats(&self) -> &Arc<SharedStats> {
        &self.stats
    }

    pub fn tuning(&self) -> &SharedTuning {
        &self.tuning
    }

    /// Stop the loop, say goodbye to the peer, and join the thread.
    pub fn teardown(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.ctrl_tx.send(ControlMessage::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MatchRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<S: Simulation>(
    mut session: MatchSession<S>,
    ctrl_rx: Receiver<ControlMessage>,
    local_input: Arc<AtomicU16>,
) {
    let mut paused = false;
    loop {
        let poll = if paused { PAUSED_POLL } else { TICK_POLL };
        match ctrl_rx.recv_timeout(poll) {
            Ok(ControlMessage::Stop) => break,
            Ok(ControlMessage::Pause(p)) => {
                paused = p;
                if !paused {
                    session.reanchor(Instant::now());
                }
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if paused {
            continue;
        }
        let raw = local_input.load(Ordering::Acquire);
        if let Err(e) = session.tick(Instant::now(), raw) {
            error!(error = %e, "match loop failed; stopping");
            break;
        }
    }
    session.teardown();
}
