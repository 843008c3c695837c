//! BPF 过滤表达式生成
//!
//! 语法参考 https://www.tcpdump.org/manpages/pcap-filter.7.html

use super::interface::Interface;

/// 生成过滤表达式所需的监听参数
#[derive(Debug, Clone, Copy)]
pub struct FilterSpec<'a> {
    pub transport: &'a str,
    pub host: &'a str,
    pub ports: &'a [u16],
    pub track_response: bool,
}

impl<'a> FilterSpec<'a> {
    /// 为指定接口生成过滤表达式。通配地址会展开为该接口的全部地址，
    /// 因此结果只对这一个接口有效。
    pub fn for_interface(&self, iface: &Interface) -> String {
        let hosts = if listen_all(self.host) || iface.is_device(self.host) {
            iface.address_strings()
        } else {
            vec![self.host.to_string()]
        };

        let mut filter = directed(
            ports_filter(self.transport, "dst", self.ports),
            "dst",
            &hosts,
        );

        if self.track_response {
            let response = directed(
                ports_filter(self.transport, "src", self.ports),
                "src",
                &hosts,
            );
            filter = format!("{} or {}", filter, response);
        }

        filter
    }
}

fn directed(ports: String, direction: &str, hosts: &[String]) -> String {
    if hosts.is_empty() {
        format!("({})", ports)
    } else {
        format!("(({}) and ({}))", ports, hosts_filter(direction, hosts))
    }
}

/// 是否为监听全部地址的通配主机
pub fn listen_all(host: &str) -> bool {
    matches!(host, "" | "0.0.0.0" | "[::]" | "::")
}

pub fn ports_filter(transport: &str, direction: &str, ports: &[u16]) -> String {
    match ports.first() {
        None | Some(0) => format!("{} {} portrange 0-{}", transport, direction, u16::MAX),
        Some(_) => ports
            .iter()
            .map(|port| format!("{} {} port {}", transport, direction, port))
            .collect::<Vec<_>>()
            .join(" or "),
    }
}

pub fn hosts_filter(direction: &str, hosts: &[String]) -> String {
    hosts
        .iter()
        .map(|host| format!("{} host {}", direction, host))
        .collect::<Vec<_>>()
        .join(" or ")
}
