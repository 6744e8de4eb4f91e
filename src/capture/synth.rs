//! Synthetic Ethernet/IPv4 traffic for exercising the analysis pipeline.

use pnet::packet::{
    ethernet::{EtherTypes, MutableEthernetPacket},
    icmp::{echo_request::MutableEchoRequestPacket, IcmpTypes},
    ip::IpNextHeaderProtocols,
    ipv4::{self, MutableIpv4Packet},
    tcp::{MutableTcpPacket, TcpFlags},
    udp::MutableUdpPacket,
};
use pnet::util::MacAddr;
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::Ipv4Addr;

const ETHERNET_HEADER_LEN: usize = 14;
const IPV4_HEADER_LEN: usize = 20;
const TCP_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const ICMP_ECHO_HEADER_LEN: usize = 8;

/// Transport carried by a synthesized frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthProtocol {
    Tcp,
    Udp,
    Icmp,
}

/// Description of one synthesized frame
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub protocol: SynthProtocol,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Ignored for ICMP
    pub src_port: u16,
    /// Ignored for ICMP
    pub dst_port: u16,
    pub payload_len: usize,
}

/// Build an Ethernet/IPv4 frame carrying TCP, UDP or an ICMP echo request
pub fn build_frame(spec: &FrameSpec) -> Vec<u8> {
    let transport_len = match spec.protocol {
        SynthProtocol::Tcp => TCP_HEADER_LEN,
        SynthProtocol::Udp => UDP_HEADER_LEN,
        SynthProtocol::Icmp => ICMP_ECHO_HEADER_LEN,
    } + spec.payload_len;
    let ip_len = IPV4_HEADER_LEN + transport_len;
    let mut buffer = vec![0u8; ETHERNET_HEADER_LEN + ip_len];

    write_transport(&mut buffer[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..], spec);

    if let Some(mut ip) = MutableIpv4Packet::new(&mut buffer[ETHERNET_HEADER_LEN..]) {
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(ip_len as u16);
        ip.set_identification(0x1234);
        ip.set_ttl(64);
        ip.set_next_level_protocol(match spec.protocol {
            SynthProtocol::Tcp => IpNextHeaderProtocols::Tcp,
            SynthProtocol::Udp => IpNextHeaderProtocols::Udp,
            SynthProtocol::Icmp => IpNextHeaderProtocols::Icmp,
        });
        ip.set_source(spec.source);
        ip.set_destination(spec.destination);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }

    if let Some(mut eth) = MutableEthernetPacket::new(&mut buffer) {
        eth.set_destination(MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x02));
        eth.set_source(MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01));
        eth.set_ethertype(EtherTypes::Ipv4);
    }

    buffer
}

fn write_transport(buffer: &mut [u8], spec: &FrameSpec) {
    match spec.protocol {
        SynthProtocol::Tcp => {
            if let Some(mut tcp) = MutableTcpPacket::new(buffer) {
                tcp.set_source(spec.src_port);
                tcp.set_destination(spec.dst_port);
                tcp.set_sequence(1);
                tcp.set_data_offset(5);
                tcp.set_flags(TcpFlags::PSH | TcpFlags::ACK);
                tcp.set_window(65535);
            }
        }
        SynthProtocol::Udp => {
            if let Some(mut udp) = MutableUdpPacket::new(buffer) {
                udp.set_source(spec.src_port);
                udp.set_destination(spec.dst_port);
                udp.set_length((UDP_HEADER_LEN + spec.payload_len) as u16);
            }
        }
        SynthProtocol::Icmp => {
            if let Some(mut echo) = MutableEchoRequestPacket::new(buffer) {
                echo.set_icmp_type(IcmpTypes::EchoRequest);
                echo.set_identifier(1);
                echo.set_sequence_number(1);
            }
        }
    }
}

/// Random traffic between a small pool of 192.168.1.0/24 hosts
pub fn random_frames<R: Rng>(rng: &mut R, count: usize, payload_len: usize) -> Vec<Vec<u8>> {
    let hosts: Vec<Ipv4Addr> = (1..=5).map(|i| Ipv4Addr::new(192, 168, 1, i)).collect();
    let protocols = [SynthProtocol::Tcp, SynthProtocol::Udp, SynthProtocol::Icmp];

    (0..count)
        .map(|_| {
            let spec = FrameSpec {
                protocol: *protocols.choose(rng).unwrap_or(&SynthProtocol::Udp),
                source: *hosts.choose(rng).unwrap_or(&hosts[0]),
                destination: *hosts.choose(rng).unwrap_or(&hosts[0]),
                src_port: rng.gen_range(1024..=u16::MAX),
                dst_port: rng.gen_range(1..1023),
                payload_len,
            };
            build_frame(&spec)
        })
        .collect()
}
