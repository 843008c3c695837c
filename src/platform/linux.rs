use std::fs;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::time::{Duration, SystemTime};

use super::socket::{compile_filter, Socket};
use crate::capture::handle::{CaptureHandle, CaptureInfo, RawPacket};
use crate::capture::interface::Interface;
use crate::error::{CaptureError, Result};

const PACKET_OUTGOING: u8 = 4;
const BUFFER_SIZE: usize = 64 << 10;

#[repr(C)]
struct PacketMreq {
    mr_ifindex: libc::c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

/// AF_PACKET 原始套接字
pub struct AfPacketSocket {
    socket: Option<socket2::Socket>,
    ifindex: i32,
    loopback_index: i32,
    buf: Vec<u8>,
}

impl AfPacketSocket {
    pub fn new(iface: &Interface) -> Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // 之后的错误路径由 socket2 负责关闭 fd
        let socket = unsafe { socket2::Socket::from_raw_fd(fd) };

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = iface.index as libc::c_int;
        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            socket: Some(socket),
            ifindex: iface.index as i32,
            loopback_index: -1,
            buf: vec![0u8; BUFFER_SIZE],
        })
    }

    /// 读超时，None 表示一直阻塞
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.socket()?.set_read_timeout(timeout)?;
        Ok(())
    }

    fn socket(&self) -> Result<&socket2::Socket> {
        self.socket.as_ref().ok_or(CaptureError::Closed)
    }

    fn setsockopt<T>(&self, level: libc::c_int, name: libc::c_int, value: &T) -> Result<()> {
        let fd = self.socket()?.as_raw_fd();
        let ret = unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                value as *const T as *const libc::c_void,
                mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Socket for AfPacketSocket {
    fn set_promiscuous(&mut self, enable: bool) -> Result<()> {
        let mreq = PacketMreq {
            mr_ifindex: self.ifindex,
            mr_type: libc::PACKET_MR_PROMISC as libc::c_ushort,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        let option = if enable {
            libc::PACKET_ADD_MEMBERSHIP
        } else {
            libc::PACKET_DROP_MEMBERSHIP
        };
        self.setsockopt(libc::SOL_PACKET, option, &mreq)
    }

    fn set_bpf_filter(&mut self, filter: &str) -> Result<()> {
        let program = compile_filter(filter)?;
        let instructions = program.get_instructions();
        // BpfInstruction 与 struct sock_filter 内存布局相同
        let fprog = libc::sock_fprog {
            len: instructions.len() as libc::c_ushort,
            filter: instructions.as_ptr() as *mut libc::sock_filter,
        };
        self.setsockopt(libc::SOL_SOCKET, libc::SO_ATTACH_FILTER, &fprog)
            .map_err(|e| CaptureError::Filter(format!("attach {}: {}", filter, e)))
    }

    fn set_loopback_index(&mut self, index: i32) {
        self.loopback_index = index;
    }
}

impl CaptureHandle for AfPacketSocket {
    fn link_type(&self) -> Option<i32> {
        None
    }

    fn read_packet(&mut self) -> Result<RawPacket<'_>> {
        let fd = self.socket()?.as_raw_fd();
        loop {
            let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let n = unsafe {
                libc::recvfrom(
                    fd,
                    self.buf.as_mut_ptr() as *mut libc::c_void,
                    self.buf.len(),
                    libc::MSG_TRUNC,
                    &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error().into());
            }

            if addr.sll_pkttype == PACKET_OUTGOING && addr.sll_ifindex == self.loopback_index {
                continue;
            }

            // MSG_TRUNC 下返回值是原始长度
            let len = n as usize;
            let caplen = len.min(self.buf.len());
            return Ok(RawPacket {
                data: &self.buf[..caplen],
                info: CaptureInfo {
                    timestamp: SystemTime::now(),
                    caplen: caplen as u32,
                    len: len as u32,
                    interface_index: addr.sll_ifindex,
                },
            });
        }
    }

    fn close(&mut self) {
        self.socket.take();
    }
}

/// 从 sysfs 读取接口 MTU
pub fn interface_mtu(name: &str) -> Option<u32> {
    fs::read_to_string(format!("/sys/class/net/{}/mtu", name))
        .ok()?
        .trim()
        .parse()
        .ok()
}
