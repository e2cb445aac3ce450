use std::net::{IpAddr, SocketAddr};

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

/// Link-layer type of the capture, determines how to parse raw packet bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    RawIp,
    /// BSD loopback: 4-byte address family, then IP.
    Loopback,
    /// Linux cooked capture v1 (16-byte header).
    LinuxSll,
    /// Linux cooked capture v2 (20-byte header).
    LinuxSll2,
}

impl LinkType {
    /// Bytes in front of the IP header, for link types without Ethernet.
    fn ip_offset(self) -> usize {
        match self {
            LinkType::Ethernet | LinkType::RawIp => 0,
            LinkType::Loopback => 4,
            LinkType::LinuxSll => 16,
            LinkType::LinuxSll2 => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// One TCP segment, borrowing its payload from the captured frame.
#[derive(Debug, Clone, Copy)]
pub struct TcpSegment<'a> {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub seq: u32,
    pub flags: TcpFlags,
    pub payload: &'a [u8],
}

impl TcpSegment<'_> {
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.src, self.dst)
    }
}

/// Bidirectional connection identifier, normalized so (A->B) == (B->A).
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct StreamKey {
    pub a: SocketAddr,
    pub b: SocketAddr,
}

impl StreamKey {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        let src = normalize(src);
        let dst = normalize(dst);
        if (src.ip(), src.port()) <= (dst.ip(), dst.port()) {
            StreamKey { a: src, b: dst }
        } else {
            StreamKey { a: dst, b: src }
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// IPv4-mapped IPv6 (`::ffff:a.b.c.d`) becomes plain IPv4 so dual-stack
/// captures of one connection land on one key.
fn normalize(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), addr.port()),
            None => addr,
        },
        IpAddr::V4(_) => addr,
    }
}

/// Extract the TCP segment from a captured frame. Anything that is not
/// TCP over IPv4/IPv6 yields `None`, as do non-first IPv4 fragments.
pub fn parse_tcp(data: &[u8], link_type: LinkType) -> Option<TcpSegment<'_>> {
    let sliced = match link_type {
        LinkType::Ethernet => SlicedPacket::from_ethernet(data).ok()?,
        other => SlicedPacket::from_ip(data.get(other.ip_offset()..)?).ok()?,
    };

    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        _ => return None,
    };

    let Some(TransportSlice::Tcp(tcp)) = &sliced.transport else {
        return None;
    };

    Some(TcpSegment {
        src: normalize(SocketAddr::new(src_ip, tcp.source_port())),
        dst: normalize(SocketAddr::new(dst_ip, tcp.destination_port())),
        seq: tcp.sequence_number(),
        flags: TcpFlags {
            syn: tcp.syn(),
            ack: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
        },
        payload: tcp.payload(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(a: [u8; 4], port: u16) -> SocketAddr {
        SocketAddr::from((a, port))
    }

    /// Ethernet + IPv4 + TCP with the given flags byte.
    fn eth_tcp(src: [u8; 4], dst: [u8; 4], ports: (u16, u16), seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
            .ipv4(src, dst, 64)
            .tcp(ports.0, ports.1, seq, 65535);
        let mut buf = Vec::new();
        builder.write(&mut buf, payload).unwrap();
        // eth(14) + ipv4(20) + flags offset in the TCP header(13)
        buf[14 + 20 + 13] = flags;
        buf
    }

    #[test]
    fn stream_key_bidirectional() {
        let a = v4([10, 0, 0, 1], 40000);
        let b = v4([10, 0, 0, 2], 22);
        assert_eq!(StreamKey::new(a, b), StreamKey::new(b, a));
    }

    #[test]
    fn stream_key_ports_matter() {
        let k1 = StreamKey::new(v4([10, 0, 0, 1], 22), v4([10, 0, 0, 2], 40000));
        let k2 = StreamKey::new(v4([10, 0, 0, 1], 40000), v4([10, 0, 0, 2], 22));
        assert_ne!(k1, k2);
    }

    #[test]
    fn stream_key_maps_ipv4_in_ipv6() {
        let mapped = SocketAddr::new(
            IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped()),
            40000,
        );
        let server = v4([10, 0, 0, 2], 22);
        assert_eq!(
            StreamKey::new(mapped, server),
            StreamKey::new(v4([10, 0, 0, 1], 40000), server)
        );
    }

    #[test]
    fn stream_key_display() {
        let k = StreamKey::new(v4([5, 6, 7, 8], 22), v4([1, 2, 3, 4], 50000));
        assert_eq!(k.to_string(), "1.2.3.4:50000 <-> 5.6.7.8:22");
    }

    #[test]
    fn parse_ethernet_ssh_segment() {
        let data = eth_tcp([10, 0, 0, 1], [10, 0, 0, 2], (40000, 22), 1000, 0x18, b"SSH-2.0-x\r\n");
        let seg = parse_tcp(&data, LinkType::Ethernet).unwrap();
        assert_eq!(seg.src, v4([10, 0, 0, 1], 40000));
        assert_eq!(seg.dst, v4([10, 0, 0, 2], 22));
        assert_eq!(seg.seq, 1000);
        assert_eq!(seg.payload, b"SSH-2.0-x\r\n");
        assert!(seg.flags.ack);
        assert!(!seg.flags.syn);
    }

    #[test]
    fn parse_flags() {
        let syn = eth_tcp([10, 0, 0, 1], [10, 0, 0, 2], (40000, 22), 0, 0x02, &[]);
        let flags = parse_tcp(&syn, LinkType::Ethernet).unwrap().flags;
        assert_eq!(flags, TcpFlags { syn: true, ..TcpFlags::default() });

        let fin_ack = eth_tcp([10, 0, 0, 1], [10, 0, 0, 2], (40000, 22), 0, 0x11, &[]);
        let flags = parse_tcp(&fin_ack, LinkType::Ethernet).unwrap().flags;
        assert!(flags.fin && flags.ack && !flags.rst);

        let rst = eth_tcp([10, 0, 0, 1], [10, 0, 0, 2], (40000, 22), 0, 0x04, &[]);
        assert!(parse_tcp(&rst, LinkType::Ethernet).unwrap().flags.rst);
    }

    #[test]
    fn parse_raw_ip() {
        let eth = eth_tcp([10, 0, 0, 1], [10, 0, 0, 2], (40000, 22), 1, 0x18, b"abc");
        let seg = parse_tcp(&eth[14..], LinkType::RawIp).unwrap();
        assert_eq!(seg.payload, b"abc");
    }

    #[test]
    fn parse_linux_sll() {
        let eth = eth_tcp([172, 16, 0, 1], [172, 16, 0, 2], (40000, 22), 1, 0x18, b"abc");
        let mut sll = vec![0u8; 16];
        sll[14] = 0x08;
        sll.extend_from_slice(&eth[14..]);
        let seg = parse_tcp(&sll, LinkType::LinuxSll).unwrap();
        assert_eq!(seg.src.ip(), IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)));
    }

    #[test]
    fn parse_linux_sll2_and_loopback() {
        let eth = eth_tcp([172, 16, 0, 1], [172, 16, 0, 2], (40000, 22), 1, 0x18, b"abc");

        let mut sll2 = vec![0u8; 20];
        sll2.extend_from_slice(&eth[14..]);
        assert_eq!(parse_tcp(&sll2, LinkType::LinuxSll2).unwrap().payload, b"abc");

        let mut null = 2u32.to_ne_bytes().to_vec();
        null.extend_from_slice(&eth[14..]);
        assert_eq!(parse_tcp(&null, LinkType::Loopback).unwrap().payload, b"abc");
    }

    #[test]
    fn parse_ipv6() {
        let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
            .ipv6(Ipv6Addr::LOCALHOST.octets(), Ipv6Addr::LOCALHOST.octets(), 64)
            .tcp(40000, 22, 7, 65535);
        let mut buf = Vec::new();
        builder.write(&mut buf, b"SSH-").unwrap();
        let seg = parse_tcp(&buf, LinkType::Ethernet).unwrap();
        assert_eq!(seg.src.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(seg.dst.port(), 22);
    }

    #[test]
    fn udp_is_ignored() {
        let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(5000, 22);
        let mut buf = Vec::new();
        builder.write(&mut buf, b"SSH-2.0-x\r\n").unwrap();
        assert!(parse_tcp(&buf, LinkType::Ethernet).is_none());
    }

    #[test]
    fn short_frames_are_ignored() {
        assert!(parse_tcp(&[0, 1, 2], LinkType::Ethernet).is_none());
        assert!(parse_tcp(&[0u8; 10], LinkType::LinuxSll).is_none());
        assert!(parse_tcp(&[], LinkType::Loopback).is_none());
    }
}
