use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::{info, warn};
use pcap::{Active, Capture, Inactive, TimestampType};

use super::filter::FilterSpec;
use super::handle::{CaptureHandle, PcapHandle};
use super::interface::Interface;
use super::listener::{Listener, PcapOptions};
use crate::error::{CaptureError, Result};
use crate::platform;

/// 离线文件句柄在注册表中的固定键
pub const PCAP_FILE_KEY: &str = "pcap_file";

/// 未指定 MTU 时的默认 snaplen
pub const DEFAULT_SNAPLEN: i32 = (64 << 10) + 200;

const TIMESTAMP_TYPES: [(&str, TimestampType); 5] = [
    ("host", TimestampType::Host),
    ("host_lowprec", TimestampType::HostLowPrec),
    ("host_hiprec", TimestampType::HostHighPrec),
    ("adapter", TimestampType::Adapter),
    ("adapter_unsynced", TimestampType::AdapterUnsynced),
];

type Handles = Vec<(String, Box<dyn CaptureHandle>)>;

/// 抓包引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineType {
    #[default]
    Pcap,
    PcapFile,
    RawSocket,
}

impl EngineType {
    /// 解析引擎名，无法识别时回退到 libpcap
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|e| {
            warn!("{}, falling back to libpcap", e);
            EngineType::Pcap
        })
    }

    /// 为监听器打开全部抓包句柄
    pub(crate) fn activate(self, listener: &Listener) -> Result<Handles> {
        match self {
            EngineType::Pcap => activate_pcap(listener),
            EngineType::RawSocket => activate_raw_socket(listener),
            EngineType::PcapFile => activate_pcap_file(listener),
        }
    }
}

impl FromStr for EngineType {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "libpcap" => Ok(EngineType::Pcap),
            "pcap_file" => Ok(EngineType::PcapFile),
            "raw_socket" | "af_packet" => Ok(EngineType::RawSocket),
            other => Err(CaptureError::Config(format!("invalid engine {}", other))),
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineType::Pcap => "libpcap",
            EngineType::PcapFile => "pcap_file",
            EngineType::RawSocket => "raw_socket",
        };
        write!(f, "{}", name)
    }
}

pub fn parse_timestamp_type(name: &str) -> Option<TimestampType> {
    TIMESTAMP_TYPES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, ts)| *ts)
}

pub fn supported_timestamp_types() -> Vec<&'static str> {
    TIMESTAMP_TYPES.iter().map(|(n, _)| *n).collect()
}

/// 接口 MTU + 200；要求覆盖或无法获取 MTU 时使用默认值
pub fn snapshot_length(iface: &Interface, opts: &PcapOptions) -> i32 {
    let mtu = if opts.snaplen_override {
        None
    } else {
        platform::interface_mtu(&iface.name)
    };
    mtu.map_or(DEFAULT_SNAPLEN, |mtu| mtu as i32 + 200)
}

/// libpcap 读超时(毫秒)，0 表示一直阻塞
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    timeout
        .filter(|t| !t.is_zero())
        .map_or(0, |t| t.as_millis().clamp(1, i32::MAX as u128) as i32)
}

/// 逐个接口打开句柄，失败的接口被跳过；一个句柄都没有时汇总所有错误
fn collect_handles<F>(listener: &Listener, label: &str, mut open: F) -> Result<Handles>
where
    F: FnMut(&Interface) -> Result<Box<dyn CaptureHandle>>,
{
    let mut handles = Handles::new();
    let mut msg = String::new();

    for iface in listener.interfaces() {
        match open(iface) {
            Ok(handle) => handles.push((iface.name.clone(), handle)),
            Err(e) => {
                msg.push('\n');
                msg.push_str(&e.to_string());
            }
        }
    }

    if handles.is_empty() {
        return Err(CaptureError::Activation(format!("{}:{}", label, msg)));
    }
    Ok(handles)
}

fn activate_pcap(listener: &Listener) -> Result<Handles> {
    collect_handles(listener, "pcap handles error", |iface| {
        Ok(Box::new(pcap_handle(listener, iface)?))
    })
}

#[cfg(target_os = "linux")]
fn activate_raw_socket(listener: &Listener) -> Result<Handles> {
    collect_handles(listener, "raw socket handles error", |iface| {
        Ok(Box::new(socket_handle(listener, iface)?))
    })
}

#[cfg(not(target_os = "linux"))]
fn activate_raw_socket(_listener: &Listener) -> Result<Handles> {
    Err(CaptureError::Unsupported(
        "sock_raw is not stabilized on OS other than linux".to_string(),
    ))
}

fn activate_pcap_file(listener: &Listener) -> Result<Handles> {
    let mut handle = PcapHandle::offline(listener.host())
        .map_err(|e| CaptureError::Activation(format!("open pcap file error: {}", e)))?;

    // 文件中的所有主机都匹配
    let filter = FilterSpec {
        host: "",
        ..listener.filter_spec()
    }
    .for_interface(&Interface::default());
    info!("BPF Filter: {}", filter);

    handle.set_filter(&filter).map_err(|e| {
        CaptureError::Filter(format!("BPF filter error: {}, filter: {}", e, filter))
    })?;

    Ok(vec![(PCAP_FILE_KEY.to_string(), Box::new(handle) as Box<dyn CaptureHandle>)])
}

/// 按监听器的选项为接口打开 libpcap 句柄并挂载过滤器
pub fn pcap_handle(listener: &Listener, iface: &Interface) -> Result<PcapHandle> {
    let opts = listener.pcap_options();
    let cap = match open_live(iface, opts, opts.monitor) {
        // 不支持监控模式的网卡退回普通模式，其他错误照常返回
        Err(CaptureError::Unsupported(msg)) if opts.monitor => {
            warn!("monitor mode unavailable on {}, retrying without it: {}", iface.name, msg);
            open_live(iface, opts, false)?
        }
        result => result?,
    };

    let mut handle = PcapHandle::live(cap);
    let filter = listener.filter(iface);
    info!("Interface: {} . BPF Filter: {}", iface.name, filter);
    handle.set_filter(&filter).map_err(|e| {
        CaptureError::Filter(format!(
            "BPF filter error: {} {}, interface: {:?}",
            e, filter, iface.name
        ))
    })?;

    Ok(handle)
}

fn open_live(iface: &Interface, opts: &PcapOptions, monitor: bool) -> Result<Capture<Active>> {
    let mut inactive = Capture::from_device(iface.name.as_str()).map_err(|e| {
        CaptureError::Activation(format!("inactive handle error: {}, interface: {:?}", e, iface.name))
    })?;

    if let Some(name) = &opts.timestamp_type {
        let ts = parse_timestamp_type(name).ok_or_else(|| {
            CaptureError::Activation(format!(
                "unknown timestamp source {:?}: supported timestamps: {:?}, interface: {:?}",
                name,
                supported_timestamp_types(),
                iface.name
            ))
        })?;
        inactive = inactive.tstamp_type(ts);
    }
    if opts.promiscuous {
        inactive = inactive.promisc(true);
    }
    inactive = set_monitor(inactive, monitor);
    inactive = inactive.snaplen(snapshot_length(iface, opts));
    if opts.buffer_size > 0 {
        inactive = inactive.buffer_size(opts.buffer_size.min(i32::MAX as usize) as i32);
    }
    inactive = inactive.timeout(timeout_ms(opts.buffer_timeout));

    inactive.open().map_err(|e| open_error(e, iface, monitor))
}

/// libpcap 对 PCAP_ERROR_RFMON_NOTSUP 给出的错误描述
fn is_rfmon_unsupported(err: &pcap::Error) -> bool {
    match err {
        pcap::Error::PcapError(msg) => msg.contains("doesn't support monitor mode"),
        _ => false,
    }
}

/// 激活失败时，只有网卡不支持监控模式的错误归为 Unsupported
fn open_error(err: pcap::Error, iface: &Interface, monitor: bool) -> CaptureError {
    if monitor && is_rfmon_unsupported(&err) {
        return CaptureError::Unsupported(format!(
            "monitor mode error: {}, interface: {:?}",
            err, iface.name
        ));
    }
    CaptureError::Activation(format!(
        "PCAP Activate device error: {}, interface: {:?}",
        err, iface.name
    ))
}

#[cfg(not(windows))]
fn set_monitor(inactive: Capture<Inactive>, monitor: bool) -> Capture<Inactive> {
    if monitor {
        inactive.rfmon(true)
    } else {
        inactive
    }
}

#[cfg(windows)]
fn set_monitor(inactive: Capture<Inactive>, _monitor: bool) -> Capture<Inactive> {
    inactive
}

/// 按监听器的选项为接口打开 AF_PACKET 套接字并挂载过滤器
#[cfg(target_os = "linux")]
pub fn socket_handle(listener: &Listener, iface: &Interface) -> Result<platform::AfPacketSocket> {
    use platform::Socket;

    let opts = listener.pcap_options();
    let mut handle = platform::AfPacketSocket::new(iface).map_err(|e| {
        CaptureError::Activation(format!("sock raw error: {}, interface: {:?}", e, iface.name))
    })?;

    handle
        .set_promiscuous(opts.promiscuous || opts.monitor)
        .map_err(|e| {
            CaptureError::Activation(format!(
                "promiscuous mode error: {}, interface: {:?}",
                e, iface.name
            ))
        })?;

    let filter = listener.filter(iface);
    info!("Interface: {} . BPF Filter: {}", iface.name, filter);
    handle.set_bpf_filter(&filter).map_err(|e| {
        CaptureError::Filter(format!(
            "BPF filter error: {} {}, interface: {:?}",
            e, filter, iface.name
        ))
    })?;

    handle.set_loopback_index(listener.loopback_index() as i32);
    handle.set_read_timeout(opts.buffer_timeout.filter(|t| !t.is_zero()))?;
    Ok(handle)
}
