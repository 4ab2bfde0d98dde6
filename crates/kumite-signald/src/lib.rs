//! Signaling daemon: pairs the two peers of a session code and relays
//! offer/answer/candidate messages between them.
//!
//! The server loop is extracted here, driven by an inbound event channel,
//! so tests can run it against an ephemeral listener. It never touches
//! match traffic: once the peers hold each other's endpoint descriptors
//! they talk QUIC directly.

pub mod net;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use kumite_netproto::{
    codec_tcp::encode_tcp_frame,
    header::Header,
    messages::{
        Message,
        signal::{ErrorCode, ErrorMsg, Join, JoinAck, PeerJoined, PeerLeft},
    },
    msg_id::MsgId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::net::{ConnId, InboundEvent, OutboundTx, PacketOwned};

static NEXT_PEER_ID: AtomicU32 = AtomicU32::new(1);

/// Peers per session; a fighting game match is strictly two.
const SESSION_CAPACITY: usize = 2;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Connections silent for longer than this are reaped.
    pub idle_timeout: Duration,
    /// How often to check for idle connections.
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

/// Per-connection server-side context.
struct ConnCtx {
    outbound: OutboundTx,
    peer: SocketAddr,
    /// 0 until the first Join.
    peer_id: u32,
    session_code: Option<u32>,
    last_activity: Instant,
}

/// Run the server main loop until the inbound channel closes.
pub async fn run_server(
    mut rx: mpsc::Receiver<InboundEvent>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let mut conns: HashMap<ConnId, ConnCtx> = HashMap::new();
    // session code -> peer ids, in join order.
    let mut sessions: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut peer_to_conn: HashMap<u32, ConnId> = HashMap::new();

    let mut cleanup = tokio::time::interval(config.cleanup_interval);
    info!("signaling server loop started");

    loop {
        tokio::select! {
            ev = rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    InboundEvent::Connected { conn_id, peer, outbound } => {
                        debug!(conn_id, %peer, "peer connected");
                        conns.insert(conn_id, ConnCtx {
                            outbound,
                            peer,
                            peer_id: 0,
                            session_code: None,
                            last_activity: Instant::now(),
                        });
                    }
                    InboundEvent::Packet { conn_id, packet, .. } => {
                        if let Some(ctx) = conns.get_mut(&conn_id) {
                            ctx.last_activity = Instant::now();
                        }
                        handle_packet(&mut conns, &mut sessions, &mut peer_to_conn, conn_id, packet).await;
                    }
                    InboundEvent::Disconnected { conn_id, peer, reason } => {
                        debug!(conn_id, %peer, reason, "peer disconnected");
                        drop_connection(&mut conns, &mut sessions, &mut peer_to_conn, conn_id).await;
                    }
                }
            }
            _ = cleanup.tick() => {
                let now = Instant::now();
                let idle: Vec<(ConnId, SocketAddr)> = conns
                    .iter()
                    .filter(|(_, ctx)| now.duration_since(ctx.last_activity) > config.idle_timeout)
                    .map(|(&id, ctx)| (id, ctx.peer))
                    .collect();
                for (conn_id, peer) in idle {
                    info!(conn_id, %peer, "reaping idle connection");
                    drop_connection(&mut conns, &mut sessions, &mut peer_to_conn, conn_id).await;
                }
            }
        }
    }

    Ok(())
}

async fn handle_packet(
    conns: &mut HashMap<ConnId, ConnCtx>,
    sessions: &mut HashMap<u32, Vec<u32>>,
    peer_to_conn: &mut HashMap<u32, ConnId>,
    conn_id: ConnId,
    packet: PacketOwned,
) {
    match packet.msg_id {
        MsgId::Join => {
            let join: Join = match postcard::from_bytes(&packet.payload) {
                Ok(join) => join,
                Err(e) => {
                    warn!(conn_id, error = %e, "undecodable Join");
                    send_error(conns, conn_id, ErrorCode::BadMessage).await;
                    return;
                }
            };
            handle_join(conns, sessions, peer_to_conn, conn_id, join).await;
        }
        MsgId::Offer | MsgId::Answer | MsgId::Candidate => {
            relay_to_other_peer(conns, sessions, peer_to_conn, conn_id, &packet).await;
        }
        MsgId::Bye => {
            drop_connection(conns, sessions, peer_to_conn, conn_id).await;
        }
        other => {
            debug!(conn_id, ?other, "ignoring message");
        }
    }
}

async fn handle_join(
    conns: &mut HashMap<ConnId, ConnCtx>,
    sessions: &mut HashMap<u32, Vec<u32>>,
    peer_to_conn: &mut HashMap<u32, ConnId>,
    conn_id: ConnId,
    join: Join,
) {
    let Some(already_joined) = conns.get(&conn_id).map(|ctx| ctx.session_code.is_some()) else {
        return;
    };
    if already_joined {
        send_error(conns, conn_id, ErrorCode::InvalidState).await;
        return;
    }

    {
        let members = sessions.entry(join.session_code).or_default();
        if members.len() >= SESSION_CAPACITY {
            warn!(
                conn_id,
                session_code = join.session_code,
                "join rejected: session full"
            );
            let ack = JoinAck {
                ok: false,
                peer_id: 0,
                session_code: join.session_code,
                peer_count: SESSION_CAPACITY as u8,
            };
            send_to_conn(conns, conn_id, &ack).await;
            send_error(conns, conn_id, ErrorCode::SessionFull).await;
            return;
        }
    }

    let peer_id = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
    let (peer_count, other) = {
        let members = sessions.entry(join.session_code).or_default();
        members.push(peer_id);
        (
            members.len() as u8,
            members.iter().copied().find(|&id| id != peer_id),
        )
    };

    if let Some(ctx) = conns.get_mut(&conn_id) {
        ctx.peer_id = peer_id;
        ctx.session_code = Some(join.session_code);
    }
    peer_to_conn.insert(peer_id, conn_id);

    info!(
        conn_id,
        peer_id,
        session_code = join.session_code,
        peer_count,
        "peer joined session"
    );

    let ack = JoinAck {
        ok: true,
        peer_id,
        session_code: join.session_code,
        peer_count,
    };
    send_to_conn(conns, conn_id, &ack).await;

    // Introduce the peers to each other; ids decide who hosts.
    if let Some(other_id) = other {
        send_to_peer(conns, peer_to_conn, other_id, &PeerJoined { peer_id }).await;
        send_to_conn(conns, conn_id, &PeerJoined { peer_id: other_id }).await;
    }
}

async fn relay_to_other_peer(
    conns: &HashMap<ConnId, ConnCtx>,
    sessions: &HashMap<u32, Vec<u32>>,
    peer_to_conn: &HashMap<u32, ConnId>,
    conn_id: ConnId,
    packet: &PacketOwned,
) {
    let Some(ctx) = conns.get(&conn_id) else {
        return;
    };
    let peer_id = ctx.peer_id;
    let Some(session_code) = ctx.session_code else {
        send_error(conns, conn_id, ErrorCode::NotInSession).await;
        return;
    };
    let other = sessions
        .get(&session_code)
        .and_then(|members| members.iter().copied().find(|&id| id != peer_id));
    let Some(other_id) = other else {
        debug!(conn_id, msg_id = ?packet.msg_id, "no peer to relay to yet");
        return;
    };
    let Some(&other_conn) = peer_to_conn.get(&other_id) else {
        return;
    };
    if let Some(other_ctx) = conns.get(&other_conn) {
        let _ = other_ctx.outbound.send(packet.reframe()).await;
    }
}

async fn drop_connection(
    conns: &mut HashMap<ConnId, ConnCtx>,
    sessions: &mut HashMap<u32, Vec<u32>>,
    peer_to_conn: &mut HashMap<u32, ConnId>,
    conn_id: ConnId,
) {
    let Some(ctx) = conns.remove(&conn_id) else {
        return;
    };
    if ctx.peer_id != 0 {
        peer_to_conn.remove(&ctx.peer_id);
    }
    let Some(session_code) = ctx.session_code else {
        return;
    };
    let remaining: Vec<u32> = {
        let Some(members) = sessions.get_mut(&session_code) else {
            return;
        };
        members.retain(|&id| id != ctx.peer_id);
        members.clone()
    };
    info!(
        peer_id = ctx.peer_id,
        session_code, "peer left session"
    );
    if remaining.is_empty() {
        sessions.remove(&session_code);
        return;
    }
    for &peer in &remaining {
        send_to_peer(
            conns,
            peer_to_conn,
            peer,
            &PeerLeft {
                peer_id: ctx.peer_id,
            },
        )
        .await;
    }
}

async fn send_error(conns: &HashMap<ConnId, ConnCtx>, conn_id: ConnId, code: ErrorCode) {
    send_to_conn(conns, conn_id, &ErrorMsg { code }).await;
}

async fn send_to_conn<T: Message>(conns: &HashMap<ConnId, ConnCtx>, conn_id: ConnId, payload: &T) {
    let Some(ctx) = conns.get(&conn_id) else {
        return;
    };
    let mut header = Header::new(T::msg_id() as u8);
    header.session_id = ctx.session_code.unwrap_or(0);
    match encode_tcp_frame(header, payload) {
        Ok(frame) => {
            let _ = ctx.outbound.send(bytes::Bytes::from(frame)).await;
        }
        Err(e) => warn!(conn_id, error = %e, "encode failed"),
    }
}

async fn send_to_peer<T: Message>(
    conns: &HashMap<ConnId, ConnCtx>,
    peer_to_conn: &HashMap<u32, ConnId>,
    peer_id: u32,
    payload: &T,
) {
    if let Some(&conn_id) = peer_to_conn.get(&peer_id) {
        send_to_conn(conns, conn_id, payload).await;
    }
}
