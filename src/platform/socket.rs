use pcap::{BpfProgram, Capture, Linktype};

use crate::capture::handle::CaptureHandle;
use crate::error::{CaptureError, Result};

/// 原始套接字抓包句柄
pub trait Socket: CaptureHandle {
    fn set_promiscuous(&mut self, enable: bool) -> Result<()>;

    /// 编译并挂载文本形式的 BPF 过滤表达式
    fn set_bpf_filter(&mut self, filter: &str) -> Result<()>;

    /// 回环接口上出方向的重复包会被丢弃
    fn set_loopback_index(&mut self, index: i32);
}

/// 在以太网链路上编译过滤表达式
pub fn compile_filter(filter: &str) -> Result<BpfProgram> {
    let dead = Capture::dead(Linktype::ETHERNET)?;
    dead.compile(filter, true)
        .map_err(|e| CaptureError::Filter(format!("{}: {}", filter, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_filter() {
        let program = compile_filter("((tcp dst port 80) and (dst host 127.0.0.1))").unwrap();
        assert!(!program.get_instructions().is_empty());
    }

    #[test]
    fn test_compile_invalid_filter() {
        let err = compile_filter("tcp dst port eighty").err().unwrap();
        assert!(matches!(err, CaptureError::Filter(_)));
    }
}
