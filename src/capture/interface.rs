use std::net::IpAddr;

use pcap::Device;
use pnet::datalink;

use crate::error::{CaptureError, Result};

/// 可抓包的网络接口
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub addresses: Vec<IpAddr>,
    /// 操作系统接口索引
    pub index: u32,
    pub up: bool,
    pub loopback: bool,
}

impl Interface {
    /// `host` 是否指向该接口(接口名或接口拥有的地址)
    pub fn is_device(&self, host: &str) -> bool {
        if host == self.name {
            return true;
        }
        self.addresses.iter().any(|addr| addr.to_string() == host)
    }

    pub fn address_strings(&self) -> Vec<String> {
        self.addresses.iter().map(|addr| addr.to_string()).collect()
    }
}

/// 抓包驱动枚举出的设备
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    pub name: String,
    pub addresses: Vec<IpAddr>,
}

/// 操作系统接口表中的一项
#[derive(Debug, Clone)]
pub struct OsInterface {
    pub name: String,
    pub index: u32,
    pub up: bool,
    pub loopback: bool,
}

/// 设备来源，默认实现为 libpcap + 系统接口表
#[cfg_attr(test, mockall::automock)]
pub trait DeviceProvider {
    fn capture_devices(&self) -> Result<Vec<CaptureDevice>>;
    fn os_interfaces(&self) -> Vec<OsInterface>;
}

pub struct SystemDevices;

impl DeviceProvider for SystemDevices {
    fn capture_devices(&self) -> Result<Vec<CaptureDevice>> {
        let devices = Device::list()
            .map_err(|e| CaptureError::Interface(format!("device enumeration failed: {}", e)))?;

        Ok(devices
            .into_iter()
            .map(|dev| CaptureDevice {
                addresses: dev.addresses.iter().map(|a| a.addr).collect(),
                name: dev.name,
            })
            .collect())
    }

    fn os_interfaces(&self) -> Vec<OsInterface> {
        datalink::interfaces()
            .into_iter()
            .map(|iface| OsInterface {
                up: iface.is_up(),
                loopback: iface.is_loopback(),
                index: iface.index,
                name: iface.name,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InterfaceManager {
    interfaces: Vec<Interface>,
    loopback_index: u32,
}

impl InterfaceManager {
    pub fn new(host: &str) -> Result<Self> {
        Self::discover(host, &SystemDevices)
    }

    /// 枚举设备并按 `host` 收窄候选接口。
    ///
    /// `host` 指向某个具体接口时只保留该接口，否则保留所有已启用且有地址的接口。
    /// 结果为空不算错误，会在激活阶段报告。
    pub fn discover(host: &str, provider: &dyn DeviceProvider) -> Result<Self> {
        let devices = provider.capture_devices()?;
        let os_interfaces = provider.os_interfaces();
        let mut manager = Self::default();

        for device in devices {
            let os = os_interfaces.iter().find(|i| i.name == device.name);
            let iface = Interface {
                index: os.map_or(0, |i| i.index),
                up: os.map_or(false, |i| i.up),
                loopback: os.map_or(false, |i| i.loopback),
                name: device.name,
                addresses: device.addresses,
            };

            if iface.loopback {
                manager.loopback_index = iface.index;
            }
            if !iface.up {
                continue;
            }

            if iface.is_device(host) {
                manager.interfaces = vec![iface];
                return Ok(manager);
            }

            if !iface.addresses.is_empty() {
                manager.interfaces.push(iface);
            }
        }

        Ok(manager)
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn loopback_index(&self) -> u32 {
        self.loopback_index
    }

    pub fn into_parts(self) -> (Vec<Interface>, u32) {
        (self.interfaces, self.loopback_index)
    }
}
