use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::capture::{EngineType, PcapOptions};
use crate::error::Result;

#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// 抓包目标: 接口名、接口地址、0.0.0.0 或 pcap 文件路径
    #[arg(short, long)]
    pub input: Option<String>,

    /// 目的端口，逗号分隔；为空或 0 表示全部端口
    #[arg(short, long, value_delimiter = ',')]
    pub ports: Vec<u16>,

    /// 传输层协议(tcp/udp)
    #[arg(short, long)]
    pub transport: Option<String>,

    /// 抓包引擎(libpcap/pcap_file/raw_socket/af_packet)
    #[arg(short, long)]
    pub engine: Option<String>,

    /// 同时捕获响应方向的流量
    #[arg(long)]
    pub track_response: bool,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// 默认日志级别
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// 从 YAML 文件加载配置
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// 加载配置文件(如果指定)，再用命令行参数覆盖
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self {
                log_level: default_log_level(),
                ..Default::default()
            },
        };

        let capture = &mut config.capture;
        if let Some(input) = &args.input {
            capture.host = input.clone();
        }
        if !args.ports.is_empty() {
            capture.ports = args.ports.clone();
        }
        if let Some(transport) = &args.transport {
            capture.transport = transport.clone();
        }
        if let Some(engine) = &args.engine {
            capture.engine = engine.clone();
        }
        if args.track_response {
            capture.track_response = true;
        }
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    pub host: String,
    pub ports: Vec<u16>,
    pub transport: String,
    pub engine: String,
    pub track_response: bool,
    /// 读超时(毫秒)，0 表示一直阻塞
    pub buffer_timeout_ms: u64,
    pub timestamp_type: Option<String>,
    pub buffer_size: usize,
    pub promiscuous: bool,
    pub monitor: bool,
    pub override_snaplen: bool,
    /// 以 warn 级别输出无法识别的链路类型
    pub debug: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            ports: Vec::new(),
            transport: String::new(),
            engine: String::new(),
            track_response: false,
            buffer_timeout_ms: 0,
            timestamp_type: None,
            buffer_size: 0,
            promiscuous: false,
            monitor: false,
            override_snaplen: false,
            debug: true,
        }
    }
}

impl CaptureConfig {
    pub fn engine_type(&self) -> EngineType {
        EngineType::from_name(&self.engine)
    }

    pub fn pcap_options(&self) -> PcapOptions {
        PcapOptions {
            buffer_timeout: (self.buffer_timeout_ms > 0)
                .then(|| Duration::from_millis(self.buffer_timeout_ms)),
            timestamp_type: self.timestamp_type.clone(),
            buffer_size: self.buffer_size,
            promiscuous: self.promiscuous,
            monitor: self.monitor,
            snaplen_override: self.override_snaplen,
        }
    }
}
