//! # CoAP Transport
//!
//! Single-request CoAP client over UDP.
//!
//! Every request opens a fresh socket, sends one confirmable GET and waits
//! for the matching response. The exchange follows RFC 7252 §4.2:
//! - the request is retransmitted with exponential back-off until it is
//!   acknowledged or `max_retransmit` is exhausted
//! - a piggybacked response (ACK carrying a response code) ends the
//!   exchange immediately
//! - an empty ACK stops retransmission; the separate response that follows
//!   is acknowledged if confirmable
//! - a RST for the request ends the exchange with an error
//!
//! Block-wise responses (RFC 7959 Block2) are reassembled: while a response
//! announces more blocks, the next block is requested with a fresh message
//! id and token and the payloads are concatenated.

use crate::error::TransportError;
use async_trait::async_trait;
use coap_lite::block_handler::BlockValue;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use log::{debug, warn};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

/// Default CoAP port.
pub const COAP_PORT: u16 = 5683;

const COAP_SCHEME: &str = "coap://";
const MAX_DATAGRAM: usize = 2048;
// Extra byte flags datagrams larger than MAX_DATAGRAM.
const RECV_BUFFER: usize = MAX_DATAGRAM + 1;
const TOKEN_LEN: usize = 4;

// ================================================================================================
// TRANSPORT TRAIT
// ================================================================================================

/// Request/response transport used by the poller.
#[async_trait]
pub trait CoapTransport: Send + Sync {
    /// Issues one GET for `uri` and returns the response payload.
    async fn get(&self, uri: &str) -> Result<Vec<u8>, TransportError>;
}

#[async_trait]
impl<T: CoapTransport + ?Sized> CoapTransport for Box<T> {
    async fn get(&self, uri: &str) -> Result<Vec<u8>, TransportError> {
        (**self).get(uri).await
    }
}

// ================================================================================================
// URI
// ================================================================================================

/// A parsed `coap://` URI. Hosts must be IP literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapUri {
    pub peer: SocketAddr,
    pub path: Vec<String>,
}

impl CoapUri {
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidUri(uri.to_string());

        let rest = uri.strip_prefix(COAP_SCHEME).ok_or_else(invalid)?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => None,
                _ => Some(tail.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        let ip: IpAddr = host.parse().map_err(|_| invalid())?;
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
            None => COAP_PORT,
        };

        Ok(Self {
            peer: SocketAddr::new(ip, port),
            path: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

// ================================================================================================
// UDP TRANSPORT
// ================================================================================================

/// Confirmable-message transmission parameters (RFC 7252 §4.8).
#[derive(Debug, Clone)]
pub struct TransmissionParams {
    /// Initial acknowledgement timeout
    pub ack_timeout: Duration,
    /// Upper bound multiplier for the randomized initial timeout
    pub ack_random_factor: f64,
    /// Retransmissions after the first transmission
    pub max_retransmit: u32,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
        }
    }
}

impl TransmissionParams {
    /// Random initial timeout in `[ack_timeout, ack_timeout * ack_random_factor]`.
    fn initial_timeout(&self) -> Duration {
        let factor = if self.ack_random_factor > 1.0 {
            rand::thread_rng().gen_range(1.0..=self.ack_random_factor)
        } else {
            1.0
        };
        self.ack_timeout.mul_f64(factor)
    }
}

/// CoAP client that opens a fresh UDP socket per request.
#[derive(Debug, Clone, Default)]
pub struct UdpCoapTransport {
    params: TransmissionParams,
}

impl UdpCoapTransport {
    pub fn new(params: TransmissionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TransmissionParams {
        &self.params
    }

    /// Fetches the full resource body, following Block2 transfers until
    /// the node reports no further blocks.
    async fn exchange(&self, uri: &CoapUri) -> Result<Vec<u8>, TransportError> {
        let bind_addr = match uri.peer {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(uri.peer).await?;

        let mut response = self.request(&socket, uri, None).await?;
        let mut body = std::mem::take(&mut response.payload);
        let mut expected = 0u16;

        while let Some(block) = next_block(&response, expected)? {
            debug!("Requesting block {} from {}", block.num, uri.peer);
            expected = block.num;
            response = self.request(&socket, uri, Some(block)).await?;
            body.append(&mut response.payload);
        }

        log_response_code(uri, &response);
        Ok(body)
    }

    /// One confirmable GET with its own message id and token. Returns the
    /// matching response packet.
    async fn request(
        &self,
        socket: &UdpSocket,
        uri: &CoapUri,
        block: Option<BlockValue>,
    ) -> Result<Packet, TransportError> {
        let (message_id, token) = {
            let mut rng = rand::thread_rng();
            (rng.gen::<u16>(), rng.gen::<[u8; TOKEN_LEN]>().to_vec())
        };
        let request = build_get(message_id, &token, &uri.path, block)?;

        let mut buf = vec![0u8; RECV_BUFFER];
        let mut wait = self.params.initial_timeout();
        let mut attempts = 1u32;
        let mut acked = false;

        socket.send(&request).await?;
        let mut deadline = Instant::now() + wait;

        loop {
            let received = if acked {
                Some(socket.recv(&mut buf).await?)
            } else {
                match timeout_at(deadline, socket.recv(&mut buf)).await {
                    Ok(result) => Some(result?),
                    Err(_) => None,
                }
            };

            let len = match received {
                Some(len) => len,
                None => {
                    if attempts > self.params.max_retransmit {
                        return Err(TransportError::Timeout { attempts });
                    }
                    wait *= 2;
                    attempts += 1;
                    debug!(
                        "Retransmitting to {} (attempt {}, next wait {:?})",
                        uri.peer, attempts, wait
                    );
                    socket.send(&request).await?;
                    deadline = Instant::now() + wait;
                    continue;
                }
            };

            if len > MAX_DATAGRAM {
                return Err(TransportError::Decode(format!(
                    "datagram from {} exceeds {} bytes",
                    uri.peer, MAX_DATAGRAM
                )));
            }

            let packet = Packet::from_bytes(&buf[..len])
                .map_err(|e| TransportError::Decode(format!("{:?}", e)))?;

            match classify_reply(&packet, message_id, &token) {
                Reply::Response => {
                    if packet.header.get_type() == MessageType::Confirmable {
                        socket.send(&build_empty_ack(packet.header.message_id)?).await?;
                    }
                    return Ok(packet);
                }
                Reply::EmptyAck => {
                    debug!("{} acknowledged, awaiting separate response", uri.peer);
                    acked = true;
                }
                Reply::Reset => return Err(TransportError::Reset),
                Reply::Unrelated => {
                    debug!("Ignoring unrelated message {} from {}", packet.header.message_id, uri.peer);
                }
            }
        }
    }
}

#[async_trait]
impl CoapTransport for UdpCoapTransport {
    async fn get(&self, uri: &str) -> Result<Vec<u8>, TransportError> {
        let parsed = CoapUri::parse(uri)?;
        self.exchange(&parsed).await
    }
}

// ================================================================================================
// MESSAGE HELPERS
// ================================================================================================

#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Response,
    EmptyAck,
    Reset,
    Unrelated,
}

fn classify_reply(packet: &Packet, message_id: u16, token: &[u8]) -> Reply {
    let same_exchange = packet.header.message_id == message_id;
    let same_token = packet.get_token() == token;

    match (packet.header.get_type(), packet.header.code) {
        (MessageType::Reset, _) if same_exchange => Reply::Reset,
        (MessageType::Acknowledgement, MessageClass::Empty) if same_exchange => Reply::EmptyAck,
        (MessageType::Acknowledgement, MessageClass::Response(_)) if same_exchange && same_token => {
            Reply::Response
        }
        (MessageType::Confirmable | MessageType::NonConfirmable, MessageClass::Response(_))
            if same_token =>
        {
            Reply::Response
        }
        _ => Reply::Unrelated,
    }
}

fn build_get(
    message_id: u16,
    token: &[u8],
    path: &[String],
    block: Option<BlockValue>,
) -> Result<Vec<u8>, TransportError> {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Confirmable);
    packet.header.code = MessageClass::Request(RequestType::Get);
    packet.header.message_id = message_id;
    packet.set_token(token.to_vec());
    for segment in path {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    if let Some(block) = block {
        packet.add_option_as(CoapOption::Block2, block);
    }

    packet
        .to_bytes()
        .map_err(|e| TransportError::Encode(format!("{:?}", e)))
}

fn build_empty_ack(message_id: u16) -> Result<Vec<u8>, TransportError> {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Acknowledgement);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;

    packet
        .to_bytes()
        .map_err(|e| TransportError::Encode(format!("{:?}", e)))
}

/// Block to request after `response`, if the node announced more.
///
/// `expected` is the block number that was requested; a response for any
/// other block, or a later block without a Block2 option, is rejected.
fn next_block(response: &Packet, expected: u16) -> Result<Option<BlockValue>, TransportError> {
    let block = match response.get_first_option_as::<BlockValue>(CoapOption::Block2) {
        Some(block) => block.map_err(|e| TransportError::Decode(format!("Block2 option: {}", e)))?,
        None if expected == 0 => return Ok(None),
        None => {
            return Err(TransportError::Decode(format!(
                "block {} arrived without a Block2 option",
                expected
            )))
        }
    };

    if block.num != expected {
        return Err(TransportError::Decode(format!(
            "expected block {}, got block {}",
            expected, block.num
        )));
    }
    if !block.more {
        return Ok(None);
    }

    let num = block
        .num
        .checked_add(1)
        .ok_or_else(|| TransportError::Decode("Block2 number overflow".to_string()))?;
    Ok(Some(BlockValue {
        num,
        more: false,
        size_exponent: block.size_exponent,
    }))
}

fn log_response_code(uri: &CoapUri, packet: &Packet) {
    let code = u8::from(packet.header.code);
    let (class, detail) = (code >> 5, code & 0x1f);
    if class != 2 {
        warn!("{} answered {}.{:02}", uri.peer, class, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bracketed_ipv6() {
        let uri = CoapUri::parse("coap://[2001:db8::1]:5683/om2m").unwrap();
        assert_eq!(uri.peer, "[2001:db8::1]:5683".parse().unwrap());
        assert_eq!(uri.path, vec!["om2m".to_string()]);
    }

    #[test]
    fn test_parse_default_port_and_nested_path() {
        let uri = CoapUri::parse("coap://[fd00::7]/a/b/").unwrap();
        assert_eq!(uri.peer.port(), COAP_PORT);
        assert_eq!(uri.path, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_parse_ipv4() {
        let uri = CoapUri::parse("coap://127.0.0.1:40000/om2m").unwrap();
        assert_eq!(uri.peer, "127.0.0.1:40000".parse().unwrap());
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        for bad in [
            "http://[::1]:5683/om2m",
            "coap://[::1:5683/om2m",
            "coap://[::1]x/om2m",
            "coap://[::1]:notaport/om2m",
            "coap://node.local/om2m",
            "coap://[1::2::3]:5683/om2m",
        ] {
            assert!(
                matches!(CoapUri::parse(bad), Err(TransportError::InvalidUri(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_get_request_encoding() {
        let bytes = build_get(0x1234, &[1, 2, 3, 4], &["om2m".to_string()], None).unwrap();
        let packet = Packet::from_bytes(&bytes).unwrap();

        assert_eq!(packet.header.get_type(), MessageType::Confirmable);
        assert_eq!(packet.header.code, MessageClass::Request(RequestType::Get));
        assert_eq!(packet.header.message_id, 0x1234);
        assert_eq!(packet.get_token(), &[1u8, 2, 3, 4][..]);
        assert!(packet.get_first_option(CoapOption::Block2).is_none());
    }

    #[test]
    fn test_get_request_carries_block2() {
        let block = BlockValue {
            num: 3,
            more: false,
            size_exponent: 4,
        };
        let bytes = build_get(1, &[1], &["om2m".to_string()], Some(block.clone())).unwrap();
        let packet = Packet::from_bytes(&bytes).unwrap();

        let decoded = packet
            .get_first_option_as::<BlockValue>(CoapOption::Block2)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, block);
    }

    fn with_block2(num: u16, more: bool) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.code = MessageClass::from(0x45);
        packet.add_option_as(
            CoapOption::Block2,
            BlockValue {
                num,
                more,
                size_exponent: 4,
            },
        );
        packet
    }

    #[test]
    fn test_next_block() {
        assert!(next_block(&Packet::new(), 0).unwrap().is_none());

        let next = next_block(&with_block2(0, true), 0).unwrap().unwrap();
        assert_eq!(next.num, 1);
        assert_eq!(next.size_exponent, 4);

        assert!(next_block(&with_block2(2, false), 2).unwrap().is_none());
    }

    #[test]
    fn test_next_block_rejects_out_of_order() {
        assert!(matches!(
            next_block(&with_block2(3, true), 1),
            Err(TransportError::Decode(_))
        ));
        assert!(matches!(
            next_block(&Packet::new(), 1),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_classify_reply() {
        let token = [9u8, 9, 9, 9];

        let mut piggybacked = Packet::new();
        piggybacked.header.set_type(MessageType::Acknowledgement);
        piggybacked.header.code = MessageClass::from(0x45);
        piggybacked.header.message_id = 7;
        piggybacked.set_token(token.to_vec());
        assert_eq!(classify_reply(&piggybacked, 7, &token), Reply::Response);
        assert_eq!(classify_reply(&piggybacked, 8, &token), Reply::Unrelated);

        let mut empty_ack = Packet::new();
        empty_ack.header.set_type(MessageType::Acknowledgement);
        empty_ack.header.code = MessageClass::Empty;
        empty_ack.header.message_id = 7;
        assert_eq!(classify_reply(&empty_ack, 7, &token), Reply::EmptyAck);

        let mut reset = Packet::new();
        reset.header.set_type(MessageType::Reset);
        reset.header.code = MessageClass::Empty;
        reset.header.message_id = 7;
        assert_eq!(classify_reply(&reset, 7, &token), Reply::Reset);

        let mut separate = Packet::new();
        separate.header.set_type(MessageType::Confirmable);
        separate.header.code = MessageClass::from(0x45);
        separate.header.message_id = 300;
        separate.set_token(token.to_vec());
        assert_eq!(classify_reply(&separate, 7, &token), Reply::Response);
    }

    #[test]
    fn test_initial_timeout_bounds() {
        let params = TransmissionParams::default();
        for _ in 0..32 {
            let t = params.initial_timeout();
            assert!(t >= Duration::from_secs(2));
            assert!(t <= Duration::from_secs(3));
        }
    }
}
