use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use super::engine::EngineType;
use super::filter::FilterSpec;
use super::handle::CaptureHandle;
use super::interface::{DeviceProvider, Interface, InterfaceManager, SystemDevices};
use super::linktype;
use super::packet::Packet;
use crate::error::{CaptureError, Result};

/// 激活前设置的句柄选项，对已激活的句柄无效
#[derive(Debug, Clone, Default)]
pub struct PcapOptions {
    /// 读超时，None 表示一直阻塞
    pub buffer_timeout: Option<Duration>,
    pub timestamp_type: Option<String>,
    /// 内核缓冲区大小(字节)，0 使用系统默认值
    pub buffer_size: usize,
    pub promiscuous: bool,
    pub monitor: bool,
    /// 不按接口 MTU 计算 snaplen
    pub snaplen_override: bool,
}

type SharedHandle = Arc<Mutex<Box<dyn CaptureHandle>>>;

/// 活动句柄注册表，读取任务通过它注销自己
struct Registry {
    handles: Mutex<HashMap<String, SharedHandle>>,
    quit: AtomicBool,
    closed: watch::Sender<bool>,
}

impl Registry {
    /// 关闭并移除句柄；最后一个句柄移除时触发 closed
    fn close_handle(&self, key: &str) {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.remove(key) {
            handle.lock().close();
            if handles.is_empty() {
                self.closed.send_replace(true);
            }
        }
    }
}

/// 流量监听器
///
/// 构造时完成接口发现，`activate` 打开句柄，`listen` 为每个句柄启动一个读取任务。
/// 监听器只能使用一次，所有句柄关闭后不能重新启动。
pub struct Listener {
    transport: String,
    /// pcap 文件路径或接口(名称、地址)
    host: String,
    ports: Vec<u16>,
    engine: EngineType,
    options: PcapOptions,
    track_response: bool,
    debug: bool,
    interfaces: Vec<Interface>,
    loopback_index: u32,
    registry: Arc<Registry>,
    reading: watch::Sender<bool>,
}

impl Listener {
    pub fn new(
        host: &str,
        ports: Vec<u16>,
        transport: &str,
        engine: EngineType,
        track_response: bool,
    ) -> Result<Self> {
        Self::with_provider(host, ports, transport, engine, track_response, &SystemDevices)
    }

    /// 使用指定的设备来源构造监听器，离线文件引擎不做接口发现
    pub fn with_provider(
        host: &str,
        ports: Vec<u16>,
        transport: &str,
        engine: EngineType,
        track_response: bool,
        provider: &dyn DeviceProvider,
    ) -> Result<Self> {
        let host = match host {
            "localhost" => "127.0.0.1",
            other => other,
        }
        .to_string();
        let transport = if transport.is_empty() { "tcp" } else { transport }.to_string();

        let (interfaces, loopback_index) = match engine {
            EngineType::PcapFile => (Vec::new(), 0),
            _ => InterfaceManager::discover(&host, provider)?.into_parts(),
        };

        let (closed, _) = watch::channel(false);
        let (reading, _) = watch::channel(false);

        Ok(Self {
            transport,
            host,
            ports,
            engine,
            options: PcapOptions::default(),
            track_response,
            debug: true,
            interfaces,
            loopback_index,
            registry: Arc::new(Registry {
                handles: Mutex::new(HashMap::new()),
                quit: AtomicBool::new(false),
                closed,
            }),
            reading,
        })
    }

    pub fn set_pcap_options(&mut self, options: PcapOptions) {
        self.options = options;
    }

    /// 以 warn 级别输出无法识别链路类型等细节，默认开启
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// 按所选引擎打开句柄，必须在 `listen` 之前调用
    pub fn activate(&self) -> Result<()> {
        for (key, handle) in self.engine.activate(self)? {
            self.insert_handle(key, handle);
        }
        Ok(())
    }

    pub(crate) fn insert_handle(&self, key: impl Into<String>, handle: Box<dyn CaptureHandle>) {
        self.registry
            .handles
            .lock()
            .insert(key.into(), Arc::new(Mutex::new(handle)));
    }

    /// 读取所有句柄并对每个包调用 `handler`，直到 `shutdown` 完成或所有句柄都已关闭。
    ///
    /// 取消时等待每个读取任务关闭句柄后返回 `CaptureError::Cancelled`；
    /// 所有句柄自行关闭(文件读完、读取出错)时返回 `Ok(())`。
    pub async fn listen<S, H>(&self, shutdown: S, handler: H) -> Result<()>
    where
        S: Future<Output = ()>,
        H: Fn(Packet) + Send + Sync + 'static,
    {
        let mut closed = self.registry.closed.subscribe();
        let mut drained = self.registry.closed.subscribe();
        self.read(Arc::new(handler));

        tokio::select! {
            _ = shutdown => {
                self.registry.quit.store(true, Ordering::Release);
                wait_until_set(&mut drained).await;
                Err(CaptureError::Cancelled)
            }
            _ = wait_until_set(&mut closed) => Ok(()),
        }
    }

    /// 在后台运行 `listen`，结果通过通道返回
    pub fn listen_background<S, H>(self: Arc<Self>, shutdown: S, handler: H) -> oneshot::Receiver<Result<()>>
    where
        S: Future<Output = ()> + Send + 'static,
        H: Fn(Packet) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = self.listen(shutdown, handler).await;
            let _ = tx.send(result);
        });
        rx
    }

    /// 等待所有读取任务启动
    pub async fn reading(&self) {
        let mut rx = self.reading.subscribe();
        wait_until_set(&mut rx).await;
    }

    fn read<H>(&self, handler: Arc<H>)
    where
        H: Fn(Packet) + Send + Sync + 'static,
    {
        let handles = self.registry.handles.lock();
        if handles.is_empty() {
            self.registry.closed.send_replace(true);
        }

        for (key, handle) in handles.iter() {
            let key = key.clone();
            let handle = Arc::clone(handle);
            let registry = Arc::clone(&self.registry);
            let handler = Arc::clone(&handler);
            let debug = self.debug;

            tokio::task::spawn_blocking(move || {
                {
                    let mut handle = handle.lock();
                    read_loop(&key, &mut **handle, &registry.quit, &*handler, debug);
                }
                registry.close_handle(&key);
            });
        }
        drop(handles);

        self.reading.send_replace(true);
    }

    pub(crate) fn filter_spec(&self) -> FilterSpec<'_> {
        FilterSpec {
            transport: &self.transport,
            host: &self.host,
            ports: &self.ports,
            track_response: self.track_response,
        }
    }

    /// 该接口上使用的过滤表达式
    pub fn filter(&self, iface: &Interface) -> String {
        self.filter_spec().for_interface(iface)
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn engine(&self) -> EngineType {
        self.engine
    }

    pub fn pcap_options(&self) -> &PcapOptions {
        &self.options
    }

    pub fn track_response(&self) -> bool {
        self.track_response
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn loopback_index(&self) -> u32 {
        self.loopback_index
    }

    pub fn handle_count(&self) -> usize {
        self.registry.handles.lock().len()
    }

    pub fn handle_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.registry.handles.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// 链路类型及其头部长度；非驱动句柄按以太网处理
fn link_header(link_type: Option<i32>) -> Result<(i32, usize)> {
    match link_type {
        None => Ok((linktype::ETHERNET, 14)),
        Some(code) => linktype::header_length(code)
            .map(|len| (code, len))
            .ok_or(CaptureError::UnknownLinkType(code)),
    }
}

/// 单个句柄的读取循环，返回后由调用方关闭句柄
fn read_loop(
    key: &str,
    handle: &mut dyn CaptureHandle,
    quit: &AtomicBool,
    handler: &dyn Fn(Packet),
    debug: bool,
) {
    let (link_type, link_len) = match link_header(handle.link_type()) {
        Ok(link) => link,
        Err(e) => {
            if debug {
                warn!("{}, interface '{}'", e, key);
            } else {
                debug!("{}, interface '{}'", e, key);
            }
            return;
        }
    };

    loop {
        if quit.load(Ordering::Acquire) {
            return;
        }

        match handle.read_packet() {
            Ok(raw) => {
                // 解析失败的包直接丢弃
                if let Ok(packet) = Packet::parse(raw.data, link_type, link_len, &raw.info) {
                    handler(packet);
                }
            }
            Err(e) if e.is_transient() => continue,
            Err(e) => {
                warn!("stopped reading from {} interface with error {}", key, e);
                return;
            }
        }
    }
}
