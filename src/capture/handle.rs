use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap::{Active, Capture, Offline};

use crate::error::{CaptureError, Result};

/// 单个数据包的抓包元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub timestamp: SystemTime,
    /// 实际抓到的字节数
    pub caplen: u32,
    /// 线上原始长度
    pub len: u32,
    pub interface_index: i32,
}

impl CaptureInfo {
    pub fn from_header(header: &pcap::PacketHeader) -> Self {
        let secs = header.ts.tv_sec.max(0) as u64;
        let micros = header.ts.tv_usec.max(0) as u32;
        Self {
            timestamp: UNIX_EPOCH + Duration::new(secs, micros.saturating_mul(1000)),
            caplen: header.caplen,
            len: header.len,
            interface_index: 0,
        }
    }
}

/// 零拷贝读取的结果，`data` 借用句柄内部缓冲区
#[derive(Debug)]
pub struct RawPacket<'a> {
    pub data: &'a [u8],
    pub info: CaptureInfo,
}

/// 抓包句柄的统一能力接口，libpcap 句柄与原始套接字都实现它
pub trait CaptureHandle: Send {
    /// 驱动上报的链路类型；非驱动句柄返回 None，按以太网处理
    fn link_type(&self) -> Option<i32>;

    fn read_packet(&mut self) -> Result<RawPacket<'_>>;

    /// 关闭句柄，重复调用无副作用
    fn close(&mut self);
}

enum PcapSource {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

/// libpcap 句柄，实时接口或离线文件
pub struct PcapHandle {
    source: Option<PcapSource>,
}

impl PcapHandle {
    pub fn live(cap: Capture<Active>) -> Self {
        Self {
            source: Some(PcapSource::Live(cap)),
        }
    }

    pub fn offline<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cap = Capture::from_file(path)?;
        Ok(Self {
            source: Some(PcapSource::Offline(cap)),
        })
    }

    pub fn set_filter(&mut self, filter: &str) -> Result<()> {
        match self.source.as_mut() {
            Some(PcapSource::Live(cap)) => cap.filter(filter, true)?,
            Some(PcapSource::Offline(cap)) => cap.filter(filter, true)?,
            None => return Err(CaptureError::Closed),
        }
        Ok(())
    }
}

impl CaptureHandle for PcapHandle {
    fn link_type(&self) -> Option<i32> {
        match self.source.as_ref()? {
            PcapSource::Live(cap) => Some(cap.get_datalink().0),
            PcapSource::Offline(cap) => Some(cap.get_datalink().0),
        }
    }

    fn read_packet(&mut self) -> Result<RawPacket<'_>> {
        let packet = match self.source.as_mut() {
            Some(PcapSource::Live(cap)) => cap.next_packet()?,
            Some(PcapSource::Offline(cap)) => cap.next_packet()?,
            None => return Err(CaptureError::Closed),
        };
        Ok(RawPacket {
            info: CaptureInfo::from_header(packet.header),
            data: packet.data,
        })
    }

    fn close(&mut self) {
        // pcap_close 在 drop 时执行
        self.source.take();
    }
}
