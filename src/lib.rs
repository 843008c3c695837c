pub mod capture;
pub mod cli;
pub mod error;
pub mod platform;

pub use capture::{EngineType, Listener, Packet, PcapOptions};
pub use error::{CaptureError, Result};
