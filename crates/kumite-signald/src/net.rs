//! TCP plumbing: accept loop, per-connection reader/writer tasks, and the
//! inbound event stream the server loop consumes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, Bytes, BytesMut};
use kumite_netproto::{
    codec_tcp::try_decode_tcp_frames,
    constants::{HEADER_LEN, TCP_LEN_PREFIX},
    header::Header,
    msg_id::MsgId,
    packet::PacketView,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tracing::{debug, trace, warn};

/// Unique connection identifier assigned by the server.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Sender used by the server loop to write framed bytes to a connection.
pub type OutboundTx = mpsc::Sender<Bytes>;

/// A decoded packet with owned payload data.
#[derive(Debug, Clone)]
pub struct PacketOwned {
    pub header: Header,
    pub msg_id: MsgId,
    pub payload: Bytes,
}

impl<'a> From<PacketView<'a>> for PacketOwned {
    fn from(view: PacketView<'a>) -> Self {
        Self {
            header: view.header,
            msg_id: view.msg_id,
            payload: Bytes::copy_from_slice(view.payload),
        }
    }
}

impl PacketOwned {
    /// Re-frame the packet byte-for-byte for verbatim relay to the other
    /// peer.
    pub fn reframe(&self) -> Bytes {
        let frame_len = HEADER_LEN + self.payload.len();
        let mut out = Vec::with_capacity(TCP_LEN_PREFIX + frame_len);
        out.extend_from_slice(&(frame_len as u32).to_le_bytes());
        let mut hbuf = [0u8; HEADER_LEN];
        self.header.encode_into(&mut hbuf);
        out.extend_from_slice(&hbuf);
        out.extend_from_slice(&self.payload);
        Bytes::from(out)
    }
}

/// Inbound events produced by the network layer.
///
/// `Connected` is emitted once per accepted connection with an
/// `OutboundTx` the server loop uses to write back; `Packet` once per
/// decoded packet; `Disconnected` when the connection handler exits.
#[derive(Debug)]
pub enum InboundEvent {
    Connected {
        conn_id: ConnId,
        peer: SocketAddr,
        outbound: OutboundTx,
    },
    Packet {
        conn_id: ConnId,
        peer: SocketAddr,
        packet: PacketOwned,
    },
    Disconnected {
        conn_id: ConnId,
        peer: SocketAddr,
        reason: String,
    },
}

/// Run the accept loop on an existing listener. All decoded packets and
/// connection events flow to `tx`.
pub async fn run_tcp_listener(
    listener: TcpListener,
    tx: mpsc::Sender<InboundEvent>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let conn_id = next_conn_id();
        let tx_conn = tx.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, conn_id, tx_conn).await;
        });
    }
}

pub async fn bind_and_listen(
    bind: SocketAddr,
    tx: mpsc::Sender<InboundEvent>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    run_tcp_listener(listener, tx).await
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: ConnId,
    tx: mpsc::Sender<InboundEvent>,
) {
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(64);
    if tx
        .send(InboundEvent::Connected {
            conn_id,
            peer,
            outbound: outbound_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            trace!(conn_id, len = frame.len(), "writing frame");
            if let Err(e) = write_half.write_all(&frame).await {
                debug!(conn_id, error = %e, "write failed");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut buf = BytesMut::with_capacity(8 * 1024);
    let reason = loop {
        buf.reserve(4096);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => break "peer closed connection".to_string(),
            Ok(_) => match try_decode_tcp_frames(&buf) {
                Ok((views, consumed)) => {
                    let packets: Vec<PacketOwned> =
                        views.into_iter().map(PacketOwned::from).collect();
                    buf.advance(consumed);
                    for packet in packets {
                        if tx
                            .send(InboundEvent::Packet {
                                conn_id,
                                peer,
                                packet,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(conn_id, %peer, error = %e, "protocol error");
                    break format!("protocol error: {e}");
                }
            },
            Err(e) => break e.to_string(),
        }
    };

    let _ = tx
        .send(InboundEvent::Disconnected {
            conn_id,
            peer,
            reason,
        })
        .await;
}
