//! 数据包捕获模块
//!
//! 该模块负责接口发现、过滤表达式生成、抓包句柄管理以及逐句柄的读取循环。

pub mod engine;
pub mod filter;
pub mod handle;
pub mod interface;
pub mod linktype;
pub mod listener;
pub mod packet;

pub use engine::EngineType;
pub use handle::{CaptureHandle, CaptureInfo, PcapHandle, RawPacket};
pub use interface::{DeviceProvider, Interface, InterfaceManager};
pub use listener::{Listener, PcapOptions};
pub use packet::{Packet, Transport};
