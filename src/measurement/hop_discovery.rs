//! Incrementing-TTL path discovery over a raw ICMPv4 socket.

use async_trait::async_trait;
use pnet::packet::MutablePacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes, checksum};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{ErrorKind, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::measurement::tracer::TraceError;

const ICMP_HEADER_SIZE: usize = 8;
const PAYLOAD_SIZE: usize = 32;
const ICMP_ECHO_REQUEST: u8 = 8;
const RECV_BUFFER_SIZE: usize = 1500;

/// One TTL step and the distinct addresses that answered for it, in reply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub ttl: u8,
    pub addrs: Vec<IpAddr>,
}

#[async_trait]
pub trait HopDiscovery: Send + Sync {
    async fn discover(&self, target: IpAddr) -> Result<Vec<Hop>, TraceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopSettings {
    pub max_hops: u8,
    pub hop_timeout: Duration,
    pub queries_per_hop: u8,
}

impl Default for HopSettings {
    fn default() -> Self {
        Self {
            max_hops: 30,
            hop_timeout: Duration::from_millis(1000),
            queries_per_hop: 2,
        }
    }
}

pub struct IcmpHopDiscovery {
    settings: HopSettings,
}

impl IcmpHopDiscovery {
    pub fn new(settings: HopSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl HopDiscovery for IcmpHopDiscovery {
    async fn discover(&self, target: IpAddr) -> Result<Vec<Hop>, TraceError> {
        let IpAddr::V4(target) = target else {
            return Err(TraceError::Unsupported(target));
        };
        let settings = self.settings;
        let identifier = rand::random::<u16>();

        tokio::task::spawn_blocking(move || discover_blocking(target, identifier, settings))
            .await
            .map_err(|e| TraceError::Socket(std::io::Error::other(e)))?
    }
}

fn discover_blocking(
    target: Ipv4Addr,
    identifier: u16,
    settings: HopSettings,
) -> Result<Vec<Hop>, TraceError> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    let destination = SockAddr::from(SocketAddr::new(IpAddr::V4(target), 0));
    let mut buffer = [0u8; RECV_BUFFER_SIZE];
    let mut hops = Vec::new();

    for ttl in 1..=settings.max_hops {
        socket.set_ttl(u32::from(ttl))?;
        let mut addrs: Vec<IpAddr> = Vec::new();
        let mut reached = false;

        for query in 0..settings.queries_per_hop {
            let sequence = probe_sequence(ttl, query);
            socket.send_to(&build_echo_request(identifier, sequence), &destination)?;

            let Some(reply) =
                await_reply(&socket, &mut buffer, identifier, sequence, settings.hop_timeout)?
            else {
                continue;
            };

            let responder = IpAddr::V4(reply.source);
            if !addrs.contains(&responder) {
                addrs.push(responder);
            }
            reached |= reply.source == target && reply.kind.is_terminal();
        }

        debug!(ttl, responders = addrs.len(), reached, "Hop probed.");
        hops.push(Hop { ttl, addrs });
        if reached {
            break;
        }
    }

    Ok(hops)
}

/// Reads until the reply for `sequence` arrives or `timeout` elapses. Replies
/// to other probes, or to other processes' probes, are skipped.
fn await_reply(
    socket: &Socket,
    buffer: &mut [u8],
    identifier: u16,
    sequence: u16,
    timeout: Duration,
) -> Result<Option<ParsedReply>, TraceError> {
    let deadline = Instant::now() + timeout;
    let mut reader = socket;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        socket.set_read_timeout(Some(remaining))?;

        let len = match reader.read(buffer) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if let Some(reply) = parse_reply(&buffer[..len], identifier)
            && reply.sequence == sequence
        {
            return Ok(Some(reply));
        }
    }
}

fn probe_sequence(ttl: u8, query: u8) -> u16 {
    (u16::from(ttl) << 8) | u16::from(query)
}

pub fn build_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + PAYLOAD_SIZE];
    let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) else {
        return buffer;
    };
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    for (i, byte) in packet.payload_mut().iter_mut().enumerate() {
        *byte = i as u8;
    }

    let sum = IcmpPacket::new(&buffer).map(|icmp| checksum(&icmp));
    if let (Some(sum), Some(mut packet)) = (sum, MutableEchoRequestPacket::new(&mut buffer)) {
        packet.set_checksum(sum);
    }
    buffer
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    TimeExceeded,
    Unreachable,
}

impl ReplyKind {
    /// Replies that mean the probe reached the destination host.
    fn is_terminal(self) -> bool {
        matches!(self, ReplyKind::EchoReply | ReplyKind::Unreachable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReply {
    pub source: Ipv4Addr,
    pub kind: ReplyKind,
    pub sequence: u16,
}

/// Parses a raw IPv4 datagram as read from the socket. Returns `None` for
/// anything that is not an answer to one of our echo requests.
pub fn parse_reply(datagram: &[u8], identifier: u16) -> Option<ParsedReply> {
    let ip = Ipv4Packet::new(datagram)?;
    let header_len = usize::from(ip.get_header_length()) * 4;
    let icmp_data = datagram.get(header_len..)?;
    if icmp_data.len() < ICMP_HEADER_SIZE {
        return None;
    }
    let icmp = IcmpPacket::new(icmp_data)?;

    let (kind, quoted_header) = match icmp.get_icmp_type() {
        IcmpTypes::EchoReply => (ReplyKind::EchoReply, &icmp_data[..ICMP_HEADER_SIZE]),
        IcmpTypes::TimeExceeded => (ReplyKind::TimeExceeded, quoted_echo(icmp_data)?),
        IcmpTypes::DestinationUnreachable => (ReplyKind::Unreachable, quoted_echo(icmp_data)?),
        _ => return None,
    };

    let reply_identifier = u16::from_be_bytes([quoted_header[4], quoted_header[5]]);
    if reply_identifier != identifier {
        return None;
    }

    Some(ParsedReply {
        source: ip.get_source(),
        kind,
        sequence: u16::from_be_bytes([quoted_header[6], quoted_header[7]]),
    })
}

/// The echo request header quoted inside an ICMP error message.
fn quoted_echo(icmp_data: &[u8]) -> Option<&[u8]> {
    let original = icmp_data.get(ICMP_HEADER_SIZE..)?;
    let original_ip = Ipv4Packet::new(original)?;
    if original_ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }
    let original_header_len = usize::from(original_ip.get_header_length()) * 4;
    let quoted = original.get(original_header_len..original_header_len + ICMP_HEADER_SIZE)?;
    (quoted[0] == ICMP_ECHO_REQUEST).then_some(quoted)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Returns a fixed hop list per target; unknown targets fail discovery.
    #[derive(Default)]
    pub(crate) struct FakeDiscovery {
        pub paths: Mutex<HashMap<IpAddr, Vec<Hop>>>,
    }

    impl FakeDiscovery {
        pub(crate) fn with(target: IpAddr, hops: Vec<Hop>) -> Self {
            let fake = Self::default();
            fake.paths.lock().unwrap().insert(target, hops);
            fake
        }
    }

    #[async_trait]
    impl HopDiscovery for FakeDiscovery {
        async fn discover(&self, target: IpAddr) -> Result<Vec<Hop>, TraceError> {
            self.paths.lock().unwrap().get(&target).cloned().ok_or_else(|| {
                TraceError::Socket(std::io::Error::new(ErrorKind::PermissionDenied, "raw socket"))
            })
        }
    }

    pub(crate) fn hop(ttl: u8, addrs: &[&str]) -> Hop {
        Hop {
            ttl,
            addrs: addrs.iter().map(|a| a.parse().unwrap()).collect(),
        }
    }

    fn ipv4_header(packet: &mut [u8], source: [u8; 4]) {
        packet[0] = 0x45;
        packet[9] = 1;
        packet[12..16].copy_from_slice(&source);
    }

    #[test]
    fn echo_request_layout() {
        let packet = build_echo_request(0xBEEF, 0x0301);
        assert_eq!(packet.len(), ICMP_HEADER_SIZE + PAYLOAD_SIZE);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..6], &[0xBE, 0xEF]);
        assert_eq!(&packet[6..8], &[0x03, 0x01]);
        assert_ne!(&packet[2..4], &[0, 0]);
    }

    #[test]
    fn parses_echo_reply() {
        let mut packet = vec![0u8; 28];
        ipv4_header(&mut packet, [8, 8, 8, 8]);
        packet[20] = 0;
        packet[24..26].copy_from_slice(&0x1234u16.to_be_bytes());
        packet[26..28].copy_from_slice(&probe_sequence(9, 1).to_be_bytes());

        let reply = parse_reply(&packet, 0x1234).unwrap();
        assert_eq!(reply.source, Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(reply.kind, ReplyKind::EchoReply);
        assert_eq!(reply.sequence, probe_sequence(9, 1));
        assert!(parse_reply(&packet, 0x4321).is_none());
    }

    #[test]
    fn parses_time_exceeded_from_quoted_header() {
        let mut packet = vec![0u8; 56];
        ipv4_header(&mut packet, [192, 168, 1, 1]);
        packet[20] = 11;
        packet[28] = 0x45;
        packet[37] = 1;
        packet[48] = 8;
        packet[52..54].copy_from_slice(&0xABCDu16.to_be_bytes());
        packet[54..56].copy_from_slice(&probe_sequence(3, 0).to_be_bytes());

        let reply = parse_reply(&packet, 0xABCD).unwrap();
        assert_eq!(reply.source, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(reply.kind, ReplyKind::TimeExceeded);
        assert_eq!(reply.sequence, probe_sequence(3, 0));

        packet[20] = 3;
        assert_eq!(parse_reply(&packet, 0xABCD).unwrap().kind, ReplyKind::Unreachable);
    }

    #[test]
    fn ignores_truncated_and_foreign_packets() {
        assert!(parse_reply(&[], 1).is_none());
        assert!(parse_reply(&[0x45; 10], 1).is_none());

        // Time exceeded quoting a UDP datagram.
        let mut packet = vec![0u8; 56];
        ipv4_header(&mut packet, [10, 0, 0, 1]);
        packet[20] = 11;
        packet[28] = 0x45;
        packet[37] = 17;
        assert!(parse_reply(&packet, 0).is_none());
    }

    #[tokio::test]
    async fn ipv6_targets_are_unsupported() {
        let discovery = IcmpHopDiscovery::new(HopSettings::default());
        let err = discovery.discover("2001:db8::1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, TraceError::Unsupported(_)));
    }
}
