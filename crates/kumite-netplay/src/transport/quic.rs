//! QUIC peer transport.
//!
//! Match traffic rides QUIC's unreliable datagrams, never streams, so a
//! lost packet cannot head-of-line block a later one. The host binds an
//! endpoint with a fresh self-signed certificate; the guest dials with the
//! certificate's SHA-256 fingerprint pinned (exchanged through signaling,
//! the way a browser data channel pins its DTLS fingerprint through SDP)
//! instead of trusting any root store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use ring::digest;
use tracing::{debug, info, warn};

use super::{ConnectionState, EndpointDescriptor, INBOUND_QUEUE_DEPTH, PeerTransport, StateCell};
use crate::error::TransportError;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
const MAX_IDLE_TIMEOUT_MS: u32 = 30_000;

/// SNI used for the peer handshake; pinning mode does not rely on it.
pub const PEER_SERVER_NAME: &str = "kumite-peer";

#[derive(Debug, Clone)]
enum Mode {
    /// Host: keep accepting; a reconnecting guest replaces the connection.
    Accept,
    /// Guest: dial the pinned host, in address order.
    Dial {
        addrs: Vec<SocketAddr>,
        server_name: String,
    },
}

type ConnectionSlot = Arc<Mutex<Option<quinn::Connection>>>;

pub struct QuicPeerTransport {
    endpoint: quinn::Endpoint,
    connection: ConnectionSlot,
    incoming_tx: Sender<Bytes>,
    incoming_rx: Receiver<Bytes>,
    state: StateCell,
    runtime: tokio::runtime::Handle,
    mode: Mode,
}

impl QuicPeerTransport {
    /// Bind the host side and return its endpoint descriptor for the
    /// signaling offer. The returned transport reports `Connecting` until
    /// the guest dials in.
    pub async fn host(bind: SocketAddr) -> Result<(Self, EndpointDescriptor), TransportError> {
        let subject_alt_names = vec![PEER_SERVER_NAME.to_string(), "localhost".to_string()];
        let rcgen::CertifiedKey { cert, signing_key } =
            rcgen::generate_simple_self_signed(subject_alt_names)
                .map_err(|e| TransportError::Connect(format!("cert generation failed: {e}")))?;

        let cert_der = cert.der().clone();
        let fingerprint = sha256_fingerprint_base64url(cert_der.as_ref());
        let key = rustls::pki_types::PrivateKeyDer::Pkcs8(
            rustls::pki_types::PrivatePkcs8KeyDer::from(signing_key.serialize_der()),
        );

        let mut server_config = quinn::ServerConfig::with_single_cert(vec![cert_der], key)
            .map_err(|e| TransportError::Connect(format!("server config failed: {e}")))?;
        server_config.transport_config(Arc::new(peer_transport_config()));

        let endpoint = quinn::Endpoint::server(server_config, bind)
            .map_err(|e| TransportError::Connect(format!("endpoint bind failed: {e}")))?;
        let local_addr = endpoint
            .local_addr()
            .map_err(|e| TransportError::Connect(format!("no local addr: {e}")))?;

        let (incoming_tx, incoming_rx) = bounded(INBOUND_QUEUE_DEPTH);
        let state = StateCell::new(ConnectionState::Connecting);
        let connection: ConnectionSlot = Arc::new(Mutex::new(None));

        tokio::spawn(accept_loop(
            endpoint.clone(),
            connection.clone(),
            incoming_tx.clone(),
            state.clone(),
        ));

        info!(%local_addr, "QUIC host endpoint up");
        let descriptor = EndpointDescriptor {
            addrs: vec![local_addr],
            cert_sha256: fingerprint,
            server_name: PEER_SERVER_NAME.to_string(),
        };
        Ok((
            Self {
                endpoint,
                connection,
                incoming_tx,
                incoming_rx,
                state,
                runtime: tokio::runtime::Handle::current(),
                mode: Mode::Accept,
            },
            descriptor,
        ))
    }

    /// Dial the host described by a signaling offer, pinning its
    /// certificate fingerprint.
    pub async fn connect(descriptor: &EndpointDescriptor) -> Result<Self, TransportError> {
        let expected = parse_sha256_fingerprint(&descriptor.cert_sha256)?;

        // A crypto provider is normally installed lazily; the pinned
        // verifier needs it up front for signature verification.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let supported_algs = rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms)
            .ok_or_else(|| {
                TransportError::Connect("no rustls CryptoProvider available".to_string())
            })?;

        let verifier = Arc::new(PinnedSha256CertVerifier {
            expected,
            supported_algs,
        });
        let mut tls = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        tls.dangerous().set_certificate_verifier(verifier);

        let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
            .map_err(|e| TransportError::Connect(format!("crypto config failed: {e}")))?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(Arc::new(peer_transport_config()));

        let bind = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut endpoint = quinn::Endpoint::client(bind)
            .map_err(|e| TransportError::Connect(format!("endpoint bind failed: {e}")))?;
        endpoint.set_default_client_config(client_config);

        let (incoming_tx, incoming_rx) = bounded(INBOUND_QUEUE_DEPTH);
        let state = StateCell::new(ConnectionState::Connecting);
        let connection: ConnectionSlot = Arc::new(Mutex::new(None));

        let conn = dial(
            &endpoint,
            &descriptor.addrs,
            &descriptor.server_name,
            &state,
        )
        .await?;
        *connection.lock() = Some(conn.clone());
        state.set(ConnectionState::Connected);
        tokio::spawn(recv_loop(conn, incoming_tx.clone(), state.clone()));

        Ok(Self {
            endpoint,
            connection,
            incoming_tx,
            incoming_rx,
            state,
            runtime: tokio::runtime::Handle::current(),
            mode: Mode::Dial {
                addrs: descriptor.addrs.clone(),
                server_name: descriptor.server_name.clone(),
            },
        })
    }
}

impl PeerTransport for QuicPeerTransport {
    fn send(&self, datagram: Bytes) -> Result<(), TransportError> {
        let guard = self.connection.lock();
        let Some(conn) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        match conn.send_datagram(datagram) {
            Ok(()) => Ok(()),
            Err(quinn::SendDatagramError::ConnectionLost(e)) => {
                self.state.set(ConnectionState::Disconnected);
                Err(TransportError::Send(format!("connection lost: {e}")))
            }
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }

    fn incoming(&self) -> &Receiver<Bytes> {
        &self.incoming_rx
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn restart(&self) -> Result<(), TransportError> {
        self.state.set(ConnectionState::Connecting);
        match &self.mode {
            // The accept loop stays armed; the next inbound connection
            // replaces the dead one.
            Mode::Accept => Ok(()),
            Mode::Dial { addrs, server_name } => {
                let endpoint = self.endpoint.clone();
                let addrs = addrs.clone();
                let server_name = server_name.clone();
                let connection = self.connection.clone();
                let incoming_tx = self.incoming_tx.clone();
                let state = self.state.clone();
                self.runtime.spawn(async move {
                    match dial(&endpoint, &addrs, &server_name, &state).await {
                        Ok(conn) => {
                            *connection.lock() = Some(conn.clone());
                            state.set(ConnectionState::Connected);
                            recv_loop(conn, incoming_tx, state).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "re-dial failed");
                            state.set(ConnectionState::Failed);
                        }
                    }
                });
                Ok(())
            }
        }
    }

    fn close(&self) {
        if let Some(conn) = self.connection.lock().take() {
            conn.close(quinn::VarInt::from_u32(0), b"bye");
        }
        self.endpoint.close(quinn::VarInt::from_u32(0), b"");
        self.state.set(ConnectionState::Disconnected);
    }
}

fn peer_transport_config() -> quinn::TransportConfig {
    let mut transport = quinn::TransportConfig::default();
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    transport.max_idle_timeout(Some(quinn::VarInt::from_u32(MAX_IDLE_TIMEOUT_MS).into()));
    transport
}

async fn dial(
    endpoint: &quinn::Endpoint,
    addrs: &[SocketAddr],
    server_name: &str,
    state: &StateCell,
) -> Result<quinn::Connection, TransportError> {
    state.set(ConnectionState::Connecting);
    let mut last_error = None;
    for addr in addrs {
        let connecting = match endpoint.connect(*addr, server_name) {
            Ok(connecting) => connecting,
            Err(e) => {
                last_error = Some(format!("{addr}: {e}"));
                continue;
            }
        };
        match connecting.await {
            Ok(conn) => {
                info!(%addr, "QUIC peer connected");
                return Ok(conn);
            }
            Err(e) => {
                warn!(%addr, error = %e, "QUIC dial failed");
                last_error = Some(format!("{addr}: {e}"));
            }
        }
    }
    Err(TransportError::Connect(
        last_error.unwrap_or_else(|| "no addresses to dial".to_string()),
    ))
}

async fn accept_loop(
    endpoint: quinn::Endpoint,
    connection: ConnectionSlot,
    incoming_tx: Sender<Bytes>,
    state: StateCell,
) {
    while let Some(incoming) = endpoint.accept().await {
        match incoming.await {
            Ok(conn) => {
                info!(remote = %conn.remote_address(), "guest connected");
                *connection.lock() = Some(conn.clone());
                state.set(ConnectionState::Connected);
                recv_loop(conn, incoming_tx.clone(), state.clone()).await;
            }
            Err(e) => {
                warn!(error = %e, "inbound QUIC handshake failed");
            }
        }
    }
    debug!("accept loop ended");
}

/// Pump datagrams into the bounded inbound queue. This is the only place
/// the receive context touches shared state: a full queue drops the
/// datagram (the channel is unreliable by contract), and the session is
/// never called into directly.
async fn recv_loop(conn: quinn::Connection, incoming_tx: Sender<Bytes>, state: StateCell) {
    loop {
        match conn.read_datagram().await {
            Ok(datagram) => {
                let _ = incoming_tx.try_send(datagram);
            }
            Err(e) => {
                debug!(error = %e, "QUIC connection ended");
                state.set(ConnectionState::Disconnected);
                break;
            }
        }
    }
}

#[derive(Debug)]
struct PinnedSha256CertVerifier {
    expected: [u8; 32],
    supported_algs: rustls::crypto::WebPkiSupportedAlgorithms,
}

impl rustls::client::danger::ServerCertVerifier for PinnedSha256CertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let actual = digest::digest(&digest::SHA256, end_entity.as_ref());
        if actual.as_ref() != self.expected {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer,
            ));
        }
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

/// Leaf certificate SHA-256 fingerprint, encoded base64url without padding
/// (43 chars for the full 32 bytes).
pub fn sha256_fingerprint_base64url(cert_der: &[u8]) -> String {
    use base64::Engine as _;
    let digest = digest::digest(&digest::SHA256, cert_der);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_ref())
}

/// Accepts hex (with or without colons) and base64/base64url forms.
pub fn parse_sha256_fingerprint(s: &str) -> Result<[u8; 32], TransportError> {
    use base64::Engine as _;
    let cleaned: String = s
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();

    if cleaned.len() == 64 && cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes =
            hex::decode(cleaned).map_err(|e| TransportError::Connect(format!("{e}")))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        return Ok(out);
    }

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cleaned.as_bytes())
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(cleaned.as_bytes()))
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(cleaned.as_bytes()))
        .map_err(|e| TransportError::Connect(format!("invalid fingerprint encoding: {e}")))?;

    if decoded.len() != 32 {
        return Err(TransportError::Connect(format!(
            "expected a 32-byte SHA-256 fingerprint, got {}",
            decoded.len()
        )));
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(&decoded);
    Ok(out)
}
