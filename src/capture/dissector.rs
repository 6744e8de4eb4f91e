use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{log_enabled, trace, Level};
use pnet::packet::{
    ethernet::{EtherType, EtherTypes, EthernetPacket},
    icmp::IcmpPacket,
    icmpv6::Icmpv6Packet,
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::Ipv4Packet,
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
    vlan::VlanPacket,
    Packet as PnetPacket,
};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::capture::reader::Frame;
use crate::models::packet::{AdditionalInfo, NetworkPacket, TransportPorts};

/// 802.1ad service tag
const ETHERTYPE_QINQ: EtherType = EtherType(0x88a8);
/// Pre-standard double tagging
const ETHERTYPE_QINQ_LEGACY: EtherType = EtherType(0x9100);

const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;

/// Link-layer header types understood by the dissector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// BSD loopback, address family in host byte order
    Null,
    Ethernet,
    /// Bare IPv4 or IPv6, told apart by the version nibble
    Raw,
    Ipv4,
    Ipv6,
    /// OpenBSD loopback, address family in network byte order
    Loop,
    /// Linux cooked capture v1
    LinuxSll,
    Unsupported(u16),
}

impl From<u16> for LinkType {
    fn from(value: u16) -> Self {
        match value {
            0 => LinkType::Null,
            1 => LinkType::Ethernet,
            12 | 14 | 101 => LinkType::Raw,
            108 => LinkType::Loop,
            113 => LinkType::LinuxSll,
            228 => LinkType::Ipv4,
            229 => LinkType::Ipv6,
            other => LinkType::Unsupported(other),
        }
    }
}

/// Addressing layer of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLayer {
    Ipv4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
    },
    Ipv6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
    },
}

impl NetworkLayer {
    pub fn name(&self) -> &'static str {
        match self {
            NetworkLayer::Ipv4 { .. } => "IPv4",
            NetworkLayer::Ipv6 { .. } => "IPv6",
        }
    }

    pub fn source(&self) -> String {
        match self {
            NetworkLayer::Ipv4 { source, .. } => source.to_string(),
            NetworkLayer::Ipv6 { source, .. } => source.to_string(),
        }
    }

    pub fn destination(&self) -> String {
        match self {
            NetworkLayer::Ipv4 { destination, .. } => destination.to_string(),
            NetworkLayer::Ipv6 { destination, .. } => destination.to_string(),
        }
    }
}

/// Layer riding on the network layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp(TransportPorts),
    Udp(TransportPorts),
    Sctp(TransportPorts),
    Icmpv4,
    Icmpv6,
    /// Protocol number we do not decode, a non-initial fragment, or a header too short to read
    Unrecognized(u8),
}

impl Transport {
    /// Protocol label, if the transport was recognized
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Transport::Tcp(_) => Some("TCP"),
            Transport::Udp(_) => Some("UDP"),
            Transport::Sctp(_) => Some("SCTP"),
            Transport::Icmpv4 => Some("ICMPv4"),
            Transport::Icmpv6 => Some("ICMPv6"),
            Transport::Unrecognized(_) => None,
        }
    }

    pub fn ports(&self) -> Option<TransportPorts> {
        match self {
            Transport::Tcp(ports) | Transport::Udp(ports) | Transport::Sctp(ports) => Some(*ports),
            _ => None,
        }
    }
}

/// Why a frame produced no packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedLinkType(u16),
    /// Link-layer header shorter than its fixed size
    TruncatedLinkHeader,
    /// Link layer carries something other than IP (ARP, LLDP, ...)
    NotIp(String),
    /// IP header present but unreadable
    MalformedNetworkHeader,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnsupportedLinkType(link) => write!(f, "unsupported link type {}", link),
            SkipReason::TruncatedLinkHeader => f.write_str("truncated link-layer header"),
            SkipReason::NotIp(what) => write!(f, "no network layer ({})", what),
            SkipReason::MalformedNetworkHeader => f.write_str("malformed network header"),
        }
    }
}

/// Outcome of dissecting one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Dissection {
    Packet(NetworkPacket),
    Skipped(SkipReason),
}

/// Decoded network and transport layers of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layers {
    pub network: NetworkLayer,
    pub transport: Transport,
}

impl Layers {
    /// Transport name when recognized, otherwise the network name
    pub fn protocol(&self) -> &'static str {
        self.transport.name().unwrap_or_else(|| self.network.name())
    }
}

/// Extracts addresses, protocol and ports from captured frames
#[derive(Debug, Default)]
pub struct PacketDissector {}

impl PacketDissector {
    /// Create a new packet dissector
    pub fn new() -> Self {
        Self {}
    }

    /// Dissect one frame of a capture with the given link type
    pub fn dissect(&self, frame: &Frame, link_type: LinkType) -> Dissection {
        match self.decode_layers(&frame.data, link_type) {
            Ok(layers) => {
                if log_enabled!(Level::Trace) {
                    trace!(
                        "Frame {}: {} {} -> {} ({} bytes)",
                        frame.number,
                        layers.protocol(),
                        layers.network.source(),
                        layers.network.destination(),
                        frame.data.len()
                    );
                }

                Dissection::Packet(NetworkPacket {
                    source_ip: layers.network.source(),
                    destination_ip: layers.network.destination(),
                    protocol: layers.protocol().to_string(),
                    size: frame.data.len(),
                    timestamp: frame.timestamp,
                    additional_info: AdditionalInfo {
                        transport: layers.transport.ports(),
                    },
                })
            }
            Err(reason) => {
                if log_enabled!(Level::Trace) {
                    trace!("Frame {} skipped: {}", frame.number, reason);
                }
                Dissection::Skipped(reason)
            }
        }
    }

    /// Decode the network and transport layers of raw link-layer bytes
    pub fn decode_layers(&self, data: &[u8], link_type: LinkType) -> Result<Layers, SkipReason> {
        match link_type {
            LinkType::Ethernet => self.parse_ethernet(data),
            LinkType::Raw => match data.first().map(|b| b >> 4) {
                Some(4) => self.parse_ipv4(data),
                Some(6) => self.parse_ipv6(data),
                Some(version) => Err(SkipReason::NotIp(format!("IP version {}", version))),
                None => Err(SkipReason::TruncatedLinkHeader),
            },
            LinkType::Ipv4 => self.parse_ipv4(data),
            LinkType::Ipv6 => self.parse_ipv6(data),
            LinkType::Null | LinkType::Loop => self.parse_loopback(data, link_type),
            LinkType::LinuxSll => self.parse_sll(data),
            LinkType::Unsupported(link) => Err(SkipReason::UnsupportedLinkType(link)),
        }
    }

    /// Parse Ethernet frame
    fn parse_ethernet(&self, data: &[u8]) -> Result<Layers, SkipReason> {
        let eth_packet = EthernetPacket::new(data).ok_or(SkipReason::TruncatedLinkHeader)?;

        if log_enabled!(Level::Trace) {
            trace!(
                "EtherType: {:?}, src: {}, dst: {}",
                eth_packet.get_ethertype(),
                eth_packet.get_source(),
                eth_packet.get_destination()
            );
        }

        self.parse_ethertype(eth_packet.get_ethertype(), eth_packet.payload())
    }

    /// Dispatch on an EtherType, stripping VLAN tags
    fn parse_ethertype(&self, ethertype: EtherType, data: &[u8]) -> Result<Layers, SkipReason> {
        match ethertype {
            EtherTypes::Ipv4 => self.parse_ipv4(data),
            EtherTypes::Ipv6 => self.parse_ipv6(data),
            EtherTypes::Vlan | ETHERTYPE_QINQ | ETHERTYPE_QINQ_LEGACY => {
                let vlan_packet = VlanPacket::new(data).ok_or(SkipReason::TruncatedLinkHeader)?;
                self.parse_ethertype(vlan_packet.get_ethertype(), vlan_packet.payload())
            }
            other => Err(SkipReason::NotIp(format!("{:?}", other))),
        }
    }

    /// Parse a loopback header carrying a BSD address family
    fn parse_loopback(&self, data: &[u8], link_type: LinkType) -> Result<Layers, SkipReason> {
        if data.len() < NULL_HEADER_LEN {
            return Err(SkipReason::TruncatedLinkHeader);
        }

        let family = if link_type == LinkType::Loop {
            BigEndian::read_u32(&data[..NULL_HEADER_LEN])
        } else {
            // Host byte order of the capturing machine; families fit in 16 bits
            let value = LittleEndian::read_u32(&data[..NULL_HEADER_LEN]);
            if value > 0xffff {
                value.swap_bytes()
            } else {
                value
            }
        };

        let payload = &data[NULL_HEADER_LEN..];
        match family {
            2 => self.parse_ipv4(payload),
            // AF_INET6 differs between BSDs, macOS and others
            24 | 28 | 30 => self.parse_ipv6(payload),
            other => Err(SkipReason::NotIp(format!("address family {}", other))),
        }
    }

    /// Parse a Linux cooked capture header
    fn parse_sll(&self, data: &[u8]) -> Result<Layers, SkipReason> {
        if data.len() < SLL_HEADER_LEN {
            return Err(SkipReason::TruncatedLinkHeader);
        }

        let protocol = BigEndian::read_u16(&data[14..SLL_HEADER_LEN]);
        self.parse_ethertype(EtherType(protocol), &data[SLL_HEADER_LEN..])
    }

    /// Parse IPv4 packet
    fn parse_ipv4(&self, data: &[u8]) -> Result<Layers, SkipReason> {
        let ipv4_packet = Ipv4Packet::new(data).ok_or(SkipReason::MalformedNetworkHeader)?;

        let header_len = usize::from(ipv4_packet.get_header_length()) * 4;
        if ipv4_packet.get_version() != 4 || header_len < 20 || header_len > data.len() {
            return Err(SkipReason::MalformedNetworkHeader);
        }

        let network = NetworkLayer::Ipv4 {
            source: ipv4_packet.get_source(),
            destination: ipv4_packet.get_destination(),
        };
        let proto = ipv4_packet.get_next_level_protocol();

        if log_enabled!(Level::Trace) {
            trace!(
                "IPv4 - src: {}, dst: {}, proto: {:?}",
                ipv4_packet.get_source(),
                ipv4_packet.get_destination(),
                proto
            );
        }

        // Segmentation offload leaves total length zero; the payload then runs to the frame end
        let total_len = usize::from(ipv4_packet.get_total_length());
        let payload_end = if total_len == 0 {
            data.len()
        } else {
            total_len.clamp(header_len, data.len())
        };
        let payload = &data[header_len..payload_end];

        // Only the first fragment carries the transport header
        let transport = if ipv4_packet.get_fragment_offset() != 0 {
            Transport::Unrecognized(proto.0)
        } else {
            self.parse_transport_protocol(proto, payload)
        };

        Ok(Layers { network, transport })
    }

    /// Parse IPv6 packet, walking any extension headers
    fn parse_ipv6(&self, data: &[u8]) -> Result<Layers, SkipReason> {
        let ipv6_packet = Ipv6Packet::new(data).ok_or(SkipReason::MalformedNetworkHeader)?;

        if ipv6_packet.get_version() != 6 {
            return Err(SkipReason::MalformedNetworkHeader);
        }

        let network = NetworkLayer::Ipv6 {
            source: ipv6_packet.get_source(),
            destination: ipv6_packet.get_destination(),
        };

        let transport =
            self.parse_ipv6_extensions(ipv6_packet.get_next_header(), ipv6_packet.payload());

        Ok(Layers { network, transport })
    }

    fn parse_ipv6_extensions(&self, mut next: IpNextHeaderProtocol, mut data: &[u8]) -> Transport {
        loop {
            match next {
                IpNextHeaderProtocols::Hopopt
                | IpNextHeaderProtocols::Ipv6Route
                | IpNextHeaderProtocols::Ipv6Opts => {
                    if data.len() < 2 {
                        return Transport::Unrecognized(next.0);
                    }
                    let len = (usize::from(data[1]) + 1) * 8;
                    if len > data.len() {
                        return Transport::Unrecognized(next.0);
                    }
                    next = IpNextHeaderProtocol(data[0]);
                    data = &data[len..];
                }
                IpNextHeaderProtocols::Ipv6Frag => {
                    if data.len() < 8 {
                        return Transport::Unrecognized(next.0);
                    }
                    let inner = IpNextHeaderProtocol(data[0]);
                    if BigEndian::read_u16(&data[2..4]) >> 3 != 0 {
                        return Transport::Unrecognized(inner.0);
                    }
                    next = inner;
                    data = &data[8..];
                }
                _ => return self.parse_transport_protocol(next, data),
            }
        }
    }

    /// Parse transport layer protocols
    fn parse_transport_protocol(&self, proto: IpNextHeaderProtocol, data: &[u8]) -> Transport {
        if log_enabled!(Level::Trace) {
            trace!("Transport protocol: {:?}, data length: {}", proto, data.len());
        }

        let transport = match proto {
            IpNextHeaderProtocols::Tcp => TcpPacket::new(data).map(|tcp_packet| {
                Transport::Tcp(TransportPorts {
                    src_port: tcp_packet.get_source(),
                    dst_port: tcp_packet.get_destination(),
                })
            }),
            IpNextHeaderProtocols::Udp => UdpPacket::new(data).map(|udp_packet| {
                Transport::Udp(TransportPorts {
                    src_port: udp_packet.get_source(),
                    dst_port: udp_packet.get_destination(),
                })
            }),
            // Common header: ports, verification tag, checksum
            IpNextHeaderProtocols::Sctp if data.len() >= 12 => {
                Some(Transport::Sctp(TransportPorts {
                    src_port: BigEndian::read_u16(&data[0..2]),
                    dst_port: BigEndian::read_u16(&data[2..4]),
                }))
            }
            IpNextHeaderProtocols::Icmp => IcmpPacket::new(data).map(|_| Transport::Icmpv4),
            IpNextHeaderProtocols::Icmpv6 => Icmpv6Packet::new(data).map(|_| Transport::Icmpv6),
            _ => None,
        };

        transport.unwrap_or(Transport::Unrecognized(proto.0))
    }
}
