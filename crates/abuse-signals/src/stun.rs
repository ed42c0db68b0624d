//! Native ICE gathering over UDP with STUN Binding requests (RFC 5389).

use crate::error::ProbeError;
use crate::probes::{PeerConnection, PeerConnectionFactory};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

pub const MAGIC_COOKIE: u32 = 0x2112_A442;
pub const DEFAULT_STUN_PORT: u16 = 3478;

const HEADER_LEN: usize = 20;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const FAMILY_IPV4: u8 = 0x01;

pub type TransactionId = [u8; 12];

/// Encode a Binding request with no attributes.
pub fn encode_binding_request(transaction_id: &TransactionId) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // length stays zero
    buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf[8..20].copy_from_slice(transaction_id);
    buf
}

/// Extract the reflexive IPv4 address from a Binding success response.
///
/// Prefers XOR-MAPPED-ADDRESS and falls back to MAPPED-ADDRESS.
pub fn decode_binding_response(
    buf: &[u8],
    transaction_id: &TransactionId,
) -> Result<SocketAddrV4, ProbeError> {
    if buf.len() < HEADER_LEN {
        return Err(ProbeError::Stun(format!("short message: {} bytes", buf.len())));
    }

    let message_type = u16::from_be_bytes([buf[0], buf[1]]);
    let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if message_type != BINDING_SUCCESS {
        return Err(ProbeError::Stun(format!("unexpected message type {:#06x}", message_type)));
    }
    if cookie != MAGIC_COOKIE {
        return Err(ProbeError::Stun("bad magic cookie".into()));
    }
    if &buf[8..20] != transaction_id {
        return Err(ProbeError::Stun("transaction id mismatch".into()));
    }
    if length % 4 != 0 || buf.len() < HEADER_LEN + length {
        return Err(ProbeError::Stun(format!("bad message length {}", length)));
    }

    let mut mapped = None;
    let mut attrs = &buf[HEADER_LEN..HEADER_LEN + length];

    while attrs.len() >= 4 {
        let attr_type = u16::from_be_bytes([attrs[0], attrs[1]]);
        let attr_len = u16::from_be_bytes([attrs[2], attrs[3]]) as usize;
        let padded = (attr_len + 3) & !3;
        if attrs.len() < 4 + padded {
            return Err(ProbeError::Stun("truncated attribute".into()));
        }
        let value = &attrs[4..4 + attr_len];

        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => return decode_address(value, true),
            ATTR_MAPPED_ADDRESS => mapped = Some(decode_address(value, false)?),
            _ => {}
        }
        attrs = &attrs[4 + padded..];
    }

    mapped.ok_or_else(|| ProbeError::Stun("no mapped address attribute".into()))
}

fn decode_address(value: &[u8], xor: bool) -> Result<SocketAddrV4, ProbeError> {
    if value.len() < 8 || value[1] != FAMILY_IPV4 {
        return Err(ProbeError::Stun("unsupported address family".into()));
    }

    let mut port = u16::from_be_bytes([value[2], value[3]]);
    let mut ip = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
    if xor {
        port ^= (MAGIC_COOKIE >> 16) as u16;
        ip ^= MAGIC_COOKIE;
    }

    Ok(SocketAddrV4::new(Ipv4Addr::from(ip), port))
}

/// Split `stun:host[:port]` into host and port.
pub fn parse_stun_url(url: &str) -> Result<(String, u16), ProbeError> {
    let rest = url
        .strip_prefix("stun:")
        .ok_or_else(|| ProbeError::Negotiation(format!("not a stun URL: {}", url)))?;

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| ProbeError::Negotiation(format!("bad STUN port in {}", url)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_STUN_PORT)),
    }
}

fn host_candidate(local: SocketAddrV4) -> String {
    format!(
        "candidate:1 1 udp 2122260223 {} {} typ host",
        local.ip(),
        local.port()
    )
}

fn srflx_candidate(mapped: SocketAddrV4, local: SocketAddrV4) -> String {
    format!(
        "candidate:2 1 udp 1686052607 {} {} typ srflx raddr {} rport {}",
        mapped.ip(),
        mapped.port(),
        local.ip(),
        local.port()
    )
}

/// Peer connections backed by a plain UDP socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct StunPeerConnections;

impl PeerConnectionFactory for StunPeerConnections {
    fn create(&self, stun_server: &str) -> Result<Box<dyn PeerConnection>, ProbeError> {
        let (host, port) = parse_stun_url(stun_server)?;
        Ok(Box::new(StunPeerConnection {
            host,
            port,
            gatherer: None,
        }))
    }
}

struct StunPeerConnection {
    host: String,
    port: u16,
    gatherer: Option<JoinHandle<()>>,
}

impl StunPeerConnection {
    async fn resolve(&self) -> Result<SocketAddr, ProbeError> {
        lookup_host((self.host.as_str(), self.port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                ProbeError::Negotiation(format!("no IPv4 address for {}", self.host))
            })
    }
}

#[async_trait]
impl PeerConnection for StunPeerConnection {
    #[instrument(skip(self), fields(server = %self.host))]
    async fn start_gathering(&mut self) -> Result<mpsc::Receiver<String>, ProbeError> {
        let server = self.resolve().await?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(server).await?;
        let local = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => {
                return Err(ProbeError::Negotiation(format!("unexpected local address {}", addr)))
            }
        };

        let transaction_id: TransactionId = rand::random();
        socket.send(&encode_binding_request(&transaction_id)).await?;
        debug!(%server, %local, "Sent STUN binding request");

        let (tx, rx) = mpsc::channel(4);
        // capacity covers both candidates
        let _ = tx.try_send(host_candidate(local));

        self.gatherer = Some(tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let len = match socket.recv(&mut buf).await {
                Ok(len) => len,
                Err(e) => {
                    warn!("STUN receive failed: {}", e);
                    return;
                }
            };

            match decode_binding_response(&buf[..len], &transaction_id) {
                Ok(mapped) => {
                    debug!(%mapped, "STUN reflexive address");
                    let _ = tx.send(srflx_candidate(mapped, local)).await;
                }
                Err(e) => warn!("Discarding STUN response: {}", e),
            }
        }));

        Ok(rx)
    }

    async fn close(&mut self) {
        if let Some(gatherer) = self.gatherer.take() {
            gatherer.abort();
        }
    }
}

impl Drop for StunPeerConnection {
    fn drop(&mut self) {
        if let Some(gatherer) = self.gatherer.take() {
            gatherer.abort();
        }
    }
}
