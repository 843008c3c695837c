use bytes::Bytes;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet as _;
use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

use super::handle::CaptureInfo;
use super::linktype;
use crate::error::{CaptureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

pub mod tcp_flags {
    pub const FIN: u16 = 0x01;
    pub const SYN: u16 = 0x02;
    pub const RST: u16 = 0x04;
    pub const PSH: u16 = 0x08;
    pub const ACK: u16 = 0x10;
}

/// 解析后的传输层数据包
#[derive(Clone, Debug)]
pub struct Packet {
    pub transport: Transport,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// seq/ack/flags/window 仅对 TCP 有意义
    pub seq: u32,
    pub ack: u32,
    pub flags: u16,
    pub window: u16,
    pub payload: Bytes,
    pub timestamp: SystemTime,
    /// 因 snaplen 截断丢失的字节数
    pub lost: u32,
}

impl Packet {
    /// 从链路层帧解析数据包
    ///
    /// 先剥离 `link_len` 字节链路层头部；以太网帧按 ethertype 选择 IP 版本，
    /// 其他链路类型按 IP 版本号判断。只接受 TCP 和 UDP。
    pub fn parse(data: &[u8], link_type: i32, link_len: usize, info: &CaptureInfo) -> Result<Self> {
        if data.len() < link_len {
            return Err(CaptureError::Parse(format!(
                "frame of {} bytes is shorter than link header {}",
                data.len(),
                link_len
            )));
        }

        let (src_ip, dst_ip, protocol, segment) = if link_type == linktype::ETHERNET {
            let ethernet = EthernetPacket::new(data)
                .ok_or_else(|| CaptureError::Parse("truncated ethernet header".to_string()))?;
            match ethernet.get_ethertype() {
                EtherTypes::Ipv4 => parse_ipv4(&data[link_len..])?,
                EtherTypes::Ipv6 => parse_ipv6(&data[link_len..])?,
                other => {
                    return Err(CaptureError::Parse(format!("unsupported ethertype {:?}", other)))
                }
            }
        } else {
            let network = &data[link_len..];
            match network.first().map(|b| b >> 4) {
                Some(4) => parse_ipv4(network)?,
                Some(6) => parse_ipv6(network)?,
                _ => return Err(CaptureError::Parse("not an IP packet".to_string())),
            }
        };

        let mut packet = Packet {
            transport: Transport::Tcp,
            src_ip,
            dst_ip,
            src_port: 0,
            dst_port: 0,
            seq: 0,
            ack: 0,
            flags: 0,
            window: 0,
            payload: Bytes::new(),
            timestamp: info.timestamp,
            lost: info.len.saturating_sub(info.caplen),
        };

        match protocol {
            IpNextHeaderProtocols::Tcp => {
                let tcp = TcpPacket::new(segment)
                    .ok_or_else(|| CaptureError::Parse("truncated tcp header".to_string()))?;
                packet.src_port = tcp.get_source();
                packet.dst_port = tcp.get_destination();
                packet.seq = tcp.get_sequence();
                packet.ack = tcp.get_acknowledgement();
                packet.flags = tcp.get_flags() as u16;
                packet.window = tcp.get_window();
                packet.payload = Bytes::copy_from_slice(tcp.payload());
            }
            IpNextHeaderProtocols::Udp => {
                let udp = UdpPacket::new(segment)
                    .ok_or_else(|| CaptureError::Parse("truncated udp header".to_string()))?;
                packet.transport = Transport::Udp;
                packet.src_port = udp.get_source();
                packet.dst_port = udp.get_destination();
                packet.payload = Bytes::copy_from_slice(udp.payload());
            }
            other => {
                return Err(CaptureError::Parse(format!("unsupported transport {:?}", other)));
            }
        }

        Ok(packet)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{} len={}",
            self.transport,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.payload.len()
        )?;
        if self.transport == Transport::Tcp {
            write!(f, " seq={} ack={} flags={:#04x}", self.seq, self.ack, self.flags)?;
        }
        Ok(())
    }
}

type Network<'a> = (IpAddr, IpAddr, IpNextHeaderProtocol, &'a [u8]);

// 负载直接借用原始帧，按头部声明的长度截取
fn parse_ipv4(data: &[u8]) -> Result<Network<'_>> {
    let ip = Ipv4Packet::new(data)
        .ok_or_else(|| CaptureError::Parse("truncated ipv4 header".to_string()))?;
    let start = (ip.get_header_length() as usize * 4).min(data.len());
    let end = (ip.get_total_length() as usize).clamp(start, data.len());
    Ok((
        IpAddr::V4(ip.get_source()),
        IpAddr::V4(ip.get_destination()),
        ip.get_next_level_protocol(),
        &data[start..end],
    ))
}

fn parse_ipv6(data: &[u8]) -> Result<Network<'_>> {
    const HEADER_LEN: usize = 40;
    let ip = Ipv6Packet::new(data)
        .ok_or_else(|| CaptureError::Parse("truncated ipv6 header".to_string()))?;
    let end = (HEADER_LEN + ip.get_payload_length() as usize).min(data.len());
    Ok((
        IpAddr::V6(ip.get_source()),
        IpAddr::V6(ip.get_destination()),
        ip.get_next_header(),
        &data[HEADER_LEN..end],
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pnet::packet::ethernet::MutableEthernetPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::packet::tcp::MutableTcpPacket;
    use std::net::Ipv4Addr;
    use std::time::UNIX_EPOCH;

    /// 构造 以太网 + IPv4 + TCP 帧
    pub(crate) fn tcp_frame(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let tcp_len = 20 + payload.len();
        let ip_len = 20 + tcp_len;
        let mut buf = vec![0u8; 14 + ip_len];

        {
            let mut eth = MutableEthernetPacket::new(&mut buf[..14]).unwrap();
            eth.set_ethertype(EtherTypes::Ipv4);
        }
        {
            let mut ip = MutableIpv4Packet::new(&mut buf[14..34]).unwrap();
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_total_length(ip_len as u16);
            ip.set_ttl(64);
            ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            ip.set_source(src);
            ip.set_destination(dst);
        }
        {
            let mut tcp = MutableTcpPacket::new(&mut buf[34..]).unwrap();
            tcp.set_source(sport);
            tcp.set_destination(dport);
            tcp.set_sequence(1000);
            tcp.set_acknowledgement(2000);
            tcp.set_data_offset(5);
            tcp.set_flags((tcp_flags::PSH | tcp_flags::ACK) as _);
            tcp.set_window(512);
            tcp.set_payload(payload);
        }
        buf
    }

    fn info(len: u32) -> CaptureInfo {
        CaptureInfo {
            timestamp: UNIX_EPOCH,
            caplen: len,
            len,
            interface_index: 0,
        }
    }

    #[test]
    fn test_parse_ethernet_tcp() {
        let frame = tcp_frame(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            51000,
            80,
            b"GET / HTTP/1.1\r\n",
        );
        let packet = Packet::parse(&frame, linktype::ETHERNET, 14, &info(frame.len() as u32)).unwrap();

        assert_eq!(packet.transport, Transport::Tcp);
        assert_eq!(packet.src_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(packet.dst_ip, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(packet.src_port, 51000);
        assert_eq!(packet.dst_port, 80);
        assert_eq!(packet.seq, 1000);
        assert_eq!(packet.ack, 2000);
        assert!(packet.has_flag(tcp_flags::ACK));
        assert!(!packet.has_flag(tcp_flags::SYN));
        assert_eq!(&packet.payload[..], b"GET / HTTP/1.1\r\n");
        assert_eq!(packet.lost, 0);
    }

    #[test]
    fn test_parse_ignores_link_padding() {
        let mut frame = tcp_frame(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1, 2, b"hi");
        // 以太网最小帧长的填充字节不属于负载
        frame.resize(60, 0xee);
        let packet = Packet::parse(&frame, linktype::ETHERNET, 14, &info(60)).unwrap();
        assert_eq!(&packet.payload[..], b"hi");
    }

    #[test]
    fn test_parse_raw_ip() {
        let frame = tcp_frame(
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(127, 0, 0, 1),
            40000,
            8080,
            b"ping",
        );
        // 去掉以太网头，按 RAW 链路解析
        let raw = &frame[14..];
        let packet = Packet::parse(raw, linktype::RAW, 0, &info(raw.len() as u32)).unwrap();
        assert_eq!(packet.dst_port, 8080);
        assert_eq!(&packet.payload[..], b"ping");
    }

    #[test]
    fn test_parse_reports_truncation() {
        let frame = tcp_frame(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1, 2, b"abc");
        let mut meta = info(frame.len() as u32);
        meta.len += 100;
        let packet = Packet::parse(&frame, linktype::ETHERNET, 14, &meta).unwrap();
        assert_eq!(packet.lost, 100);
    }

    #[test]
    fn test_parse_rejects_non_ip() {
        let mut frame = vec![0u8; 60];
        {
            let mut eth = MutableEthernetPacket::new(&mut frame[..]).unwrap();
            eth.set_ethertype(EtherTypes::Arp);
        }
        assert!(Packet::parse(&frame, linktype::ETHERNET, 14, &info(60)).is_err());
        assert!(Packet::parse(&frame[..10], linktype::ETHERNET, 14, &info(10)).is_err());
        assert!(Packet::parse(&[0u8; 4], linktype::NULL, 4, &info(4)).is_err());
    }
}
