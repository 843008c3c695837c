mod socket;

pub use socket::{compile_filter, Socket};

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::*;

/// 非 Linux 平台无法读取接口 MTU，由调用方回退到默认 snaplen
#[cfg(not(target_os = "linux"))]
pub fn interface_mtu(_name: &str) -> Option<u32> {
    None
}
