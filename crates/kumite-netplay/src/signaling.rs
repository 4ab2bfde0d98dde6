//! Signaling client: session bootstrap over the out-of-band TCP channel.
//!
//! Connects to `kumite-signald`, joins a session code, learns the peer's
//! id (which fixes roles: lower id hosts), and exchanges the
//! offer/answer/candidate messages that carry the QUIC endpoint
//! descriptor. Signaling completes before the session reports `Connected`;
//! the match loop does not advance frames until then.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use kumite_netproto::{
    codec_tcp::{encode_tcp_frame, try_decode_tcp_frames},
    header::Header,
    messages::{
        Message,
        signal::{Answer, Bye, Candidate, ErrorCode, Join, JoinAck, Offer},
    },
    msg_id::MsgId,
    packet::PacketView,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, info, trace, warn};

use crate::{
    error::NetplayError,
    session::PeerSession,
    transport::{EndpointDescriptor, PeerTransport, quic::QuicPeerTransport},
};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Events surfaced by the signaling connection.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Joined {
        peer_id: u32,
        session_code: u32,
        peer_count: u8,
    },
    PeerJoined {
        peer_id: u32,
    },
    PeerLeft {
        peer_id: u32,
    },
    Offer {
        descriptor: EndpointDescriptor,
        nonce: u32,
    },
    Answer {
        addrs: Vec<SocketAddr>,
        nonce: u32,
    },
    Candidate {
        addr: SocketAddr,
    },
    ServerError {
        code: ErrorCode,
    },
    Disconnected {
        reason: String,
    },
}

pub struct SignalingClient {
    writer_tx: mpsc::Sender<Bytes>,
    events_rx: mpsc::Receiver<SignalingEvent>,
    /// Events that arrived while waiting for a specific one.
    pending: VecDeque<SignalingEvent>,
    peer_id: u32,
    session_code: u32,
    peer_count: u8,
    seq: u32,
}

impl SignalingClient {
    /// Connect and join a session code. Resolves once the server has
    /// acknowledged the join and assigned a peer id.
    pub async fn connect(addr: SocketAddr, session_code: u32) -> Result<Self, NetplayError> {
        info!(%addr, session_code, "connecting to signaling server");
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (writer_tx, writer_rx) = mpsc::channel::<Bytes>(64);
        let (events_tx, events_rx) = mpsc::channel::<SignalingEvent>(64);

        tokio::spawn(writer_loop(write_half, writer_rx));
        tokio::spawn(reader_loop(read_half, events_tx));

        let mut client = Self {
            writer_tx,
            events_rx,
            pending: VecDeque::new(),
            peer_id: 0,
            session_code,
            peer_count: 0,
            seq: 1,
        };

        let join = Join {
            session_code,
            nonce: time_nonce(),
        };
        client.send_message(&join).await?;

        let joined = timeout(JOIN_TIMEOUT, client.wait_for(|event| {
            matches!(
                event,
                SignalingEvent::Joined { .. } | SignalingEvent::ServerError { .. }
            )
        }))
        .await
        .map_err(|_| NetplayError::Signaling("join timed out".to_string()))??;

        match joined {
            SignalingEvent::Joined {
                peer_id,
                peer_count,
                ..
            } => {
                client.peer_id = peer_id;
                client.peer_count = peer_count;
                info!(peer_id, peer_count, "joined signaling session");
                Ok(client)
            }
            SignalingEvent::ServerError { code } => Err(NetplayError::Signaling(format!(
                "server rejected join: {code:?}"
            ))),
            _ => Err(NetplayError::Signaling("unexpected join response".into())),
        }
    }

    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    pub fn session_code(&self) -> u32 {
        self.session_code
    }

    /// Peers in the session at join time (including this one).
    pub fn peer_count_at_join(&self) -> u8 {
        self.peer_count
    }

    pub async fn send_offer(
        &mut self,
        descriptor: &EndpointDescriptor,
        nonce: u32,
    ) -> Result<(), NetplayError> {
        self.send_message(&Offer {
            addrs: descriptor.addrs.clone(),
            cert_sha256: descriptor.cert_sha256.clone(),
            server_name: descriptor.server_name.clone(),
            nonce,
        })
        .await
    }

    pub async fn send_answer(
        &mut self,
        addrs: Vec<SocketAddr>,
        nonce: u32,
    ) -> Result<(), NetplayError> {
        self.send_message(&Answer { addrs, nonce }).await
    }

    pub async fn send_candidate(&mut self, addr: SocketAddr) -> Result<(), NetplayError> {
        self.send_message(&Candidate { addr }).await
    }

    pub async fn send_bye(&mut self, reason_code: u8) -> Result<(), NetplayError> {
        self.send_message(&Bye { reason_code }).await
    }

    /// Next signaling event (buffered events first).
    pub async fn next_event(&mut self) -> Option<SignalingEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        self.events_rx.recv().await
    }

    /// Wait for an event matching `want`, buffering everything else.
    pub async fn wait_for(
        &mut self,
        want: impl Fn(&SignalingEvent) -> bool,
    ) -> Result<SignalingEvent, NetplayError> {
        let mut skipped = VecDeque::new();
        loop {
            // Scan already-buffered events first.
            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => self
                    .events_rx
                    .recv()
                    .await
                    .ok_or(NetplayError::ChannelClosed)?,
            };
            if want(&event) {
                // Preserve the arrival order of everything we skipped.
                while let Some(back) = skipped.pop_back() {
                    self.pending.push_front(back);
                }
                return Ok(event);
            }
            if let SignalingEvent::Disconnected { reason } = &event {
                return Err(NetplayError::Signaling(format!(
                    "signaling lost: {reason}"
                )));
            }
            skipped.push_back(event);
        }
    }

    async fn send_message<T: Message>(&mut self, payload: &T) -> Result<(), NetplayError> {
        let mut header = Header::new(T::msg_id() as u8);
        header.session_id = self.session_code;
        header.peer_id = self.peer_id;
        header.seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let frame = encode_tcp_frame(header, payload)?;
        self.writer_tx
            .send(Bytes::from(frame))
            .await
            .map_err(|_| NetplayError::ChannelClosed)
    }
}

/// A fully bootstrapped peer link: session identity, the connected (or
/// connecting) transport, and the still-open signaling connection for
/// restarts and candidates.
pub struct PeerLink {
    pub session: PeerSession,
    pub transport: Arc<QuicPeerTransport>,
    pub signaling: SignalingClient,
    /// Host only: the published endpoint descriptor.
    pub descriptor: Option<EndpointDescriptor>,
}

impl PeerLink {
    /// ICE-restart analog: re-arm the transport and (on the host side)
    /// re-publish the endpoint descriptor with a fresh nonce, without
    /// tearing down match state.
    pub async fn restart_ice(&mut self) -> Result<(), NetplayError> {
        self.transport.restart()?;
        if let Some(descriptor) = self.descriptor.clone() {
            self.signaling.send_offer(&descriptor, time_nonce()).await?;
        }
        Ok(())
    }
}

/// Full session bootstrap: join the code, learn the peer, decide roles,
/// and run the offer/answer exchange until a transport exists.
pub async fn establish(
    signal_addr: SocketAddr,
    session_code: u32,
    quic_bind: SocketAddr,
    pair_timeout: Duration,
) -> Result<PeerLink, NetplayError> {
    let mut signaling = SignalingClient::connect(signal_addr, session_code).await?;

    let peer_joined = timeout(
        pair_timeout,
        signaling.wait_for(|e| matches!(e, SignalingEvent::PeerJoined { .. })),
    )
    .await
    .map_err(|_| NetplayError::Signaling("timed out waiting for a peer".to_string()))??;
    let SignalingEvent::PeerJoined { peer_id: remote_id } = peer_joined else {
        return Err(NetplayError::Signaling("unexpected pairing event".into()));
    };

    let session = PeerSession::new(
        session_code,
        signaling.peer_id(),
        remote_id,
        Instant::now(),
    );
    debug!(
        local_id = session.local_id,
        remote_id = session.remote_id,
        role = ?session.role,
        "peer paired"
    );

    match session.role {
        crate::session::PeerRole::Host => {
            let (transport, descriptor) = QuicPeerTransport::host(quic_bind).await?;
            signaling.send_offer(&descriptor, time_nonce()).await?;
            Ok(PeerLink {
                session,
                transport: Arc::new(transport),
                signaling,
                descriptor: Some(descriptor),
            })
        }
        crate::session::PeerRole::Guest => {
            let offer = timeout(
                pair_timeout,
                signaling.wait_for(|e| matches!(e, SignalingEvent::Offer { .. })),
            )
            .await
            .map_err(|_| NetplayError::Signaling("timed out waiting for an offer".to_string()))??;
            let SignalingEvent::Offer { descriptor, nonce } = offer else {
                return Err(NetplayError::Signaling("unexpected offer event".into()));
            };
            let transport = QuicPeerTransport::connect(&descriptor).await?;
            signaling.send_answer(Vec::new(), nonce).await?;
            Ok(PeerLink {
                session,
                transport: Arc::new(transport),
                signaling,
                descriptor: None,
            })
        }
    }
}

async fn writer_loop(mut write: impl AsyncWrite + Unpin, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        trace!(len = frame.len(), "signaling write");
        if let Err(e) = write.write_all(&frame).await {
            warn!(error = %e, "signaling write failed");
            break;
        }
    }
    let _ = write.shutdown().await;
}

async fn reader_loop(mut read: impl AsyncRead + Unpin, events_tx: mpsc::Sender<SignalingEvent>) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        buf.reserve(4096);
        match read.read_buf(&mut buf).await {
            Ok(0) => {
                let _ = events_tx
                    .send(SignalingEvent::Disconnected {
                        reason: "server closed connection".to_string(),
                    })
                    .await;
                return;
            }
            Ok(_) => {
                let (events, consumed) = match try_decode_tcp_frames(&buf) {
                    Ok((packets, consumed)) => {
                        let events: Vec<_> =
                            packets.iter().filter_map(packet_to_event).collect();
                        (events, consumed)
                    }
                    Err(e) => {
                        warn!(error = %e, "signaling protocol error");
                        let _ = events_tx
                            .send(SignalingEvent::Disconnected {
                                reason: format!("protocol error: {e}"),
                            })
                            .await;
                        return;
                    }
                };
                buf.advance(consumed);
                for event in events {
                    if events_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = events_tx
                    .send(SignalingEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

fn packet_to_event(packet: &PacketView<'_>) -> Option<SignalingEvent> {
    let event = match packet.msg_id {
        MsgId::JoinAck => {
            let ack: JoinAck = decode_or_skip(packet)?;
            if !ack.ok {
                return None; // The accompanying ErrorMsg carries the code.
            }
            SignalingEvent::Joined {
                peer_id: ack.peer_id,
                session_code: ack.session_code,
                peer_count: ack.peer_count,
            }
        }
        MsgId::PeerJoined => {
            let msg: kumite_netproto::messages::signal::PeerJoined = decode_or_skip(packet)?;
            SignalingEvent::PeerJoined {
                peer_id: msg.peer_id,
            }
        }
        MsgId::PeerLeft => {
            let msg: kumite_netproto::messages::signal::PeerLeft = decode_or_skip(packet)?;
            SignalingEvent::PeerLeft {
                peer_id: msg.peer_id,
            }
        }
        MsgId::Offer => {
            let offer: Offer = decode_or_skip(packet)?;
            SignalingEvent::Offer {
                descriptor: EndpointDescriptor {
                    addrs: offer.addrs,
                    cert_sha256: offer.cert_sha256,
                    server_name: offer.server_name,
                },
                nonce: offer.nonce,
            }
        }
        MsgId::Answer => {
            let answer: Answer = decode_or_skip(packet)?;
            SignalingEvent::Answer {
                addrs: answer.addrs,
                nonce: answer.nonce,
            }
        }
        MsgId::Candidate => {
            let candidate: Candidate = decode_or_skip(packet)?;
            SignalingEvent::Candidate {
                addr: candidate.addr,
            }
        }
        MsgId::Error => {
            let msg: kumite_netproto::messages::signal::ErrorMsg = decode_or_skip(packet)?;
            SignalingEvent::ServerError { code: msg.code }
        }
        other => {
            debug!(?other, "ignoring message on the signaling channel");
            return None;
        }
    };
    Some(event)
}

fn decode_or_skip<T: serde::de::DeserializeOwned>(packet: &PacketView<'_>) -> Option<T> {
    match packet.decode_payload() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(msg_id = ?packet.msg_id, error = %e, "undecodable signaling payload");
            None
        }
    }
}

/// Time-derived nonce; collision odds are irrelevant for its use (matching
/// an answer to the offer generation that prompted it).
fn time_nonce() -> u32 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_nanos() as u32) ^ (now.as_secs() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumite_netproto::codec_tcp::encode_tcp_frame;

    fn first_event(frame: &[u8]) -> Option<SignalingEvent> {
        let (packets, _) = try_decode_tcp_frames(frame).expect("decode");
        packets.first().and_then(packet_to_event)
    }

    #[test]
    fn join_ack_maps_to_joined() {
        let frame = encode_tcp_frame(
            Header::new(0),
            &JoinAck {
                ok: true,
                peer_id: 7,
                session_code: 99,
                peer_count: 2,
            },
        )
        .expect("encode");
        assert!(matches!(
            first_event(&frame),
            Some(SignalingEvent::Joined {
                peer_id: 7,
                session_code: 99,
                peer_count: 2
            })
        ));
    }

    #[test]
    fn failed_join_ack_maps_to_nothing() {
        let frame = encode_tcp_frame(
            Header::new(0),
            &JoinAck {
                ok: false,
                peer_id: 0,
                session_code: 99,
                peer_count: 2,
            },
        )
        .expect("encode");
        assert!(first_event(&frame).is_none());
    }

    #[test]
    fn offer_maps_to_descriptor() {
        let frame = encode_tcp_frame(
            Header::new(0),
            &Offer {
                addrs: vec!["127.0.0.1:4000".parse().expect("addr")],
                cert_sha256: "abc".to_string(),
                server_name: "kumite-peer".to_string(),
                nonce: 5,
            },
        )
        .expect("encode");
        match first_event(&frame) {
            Some(SignalingEvent::Offer { descriptor, nonce }) => {
                assert_eq!(descriptor.server_name, "kumite-peer");
                assert_eq!(descriptor.addrs.len(), 1);
                assert_eq!(nonce, 5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
