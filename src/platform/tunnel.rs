//! Per-client private network tun device: each `PrivateNetwork` gets its
//! own point-to-point tun interface, handed back to the caller as an fd plus
//! an interface name the private network manager then bridges/addresses.
//!
//! Opens `/dev/net/tun` directly via the `libc` crate's `TUNSETIFF` ioctl
//! rather than shelling out to `ip tuntap`. Point-to-point addressing and MTU
//! are set via the `ip` binary, matching the shell-out-to-a-real-tool
//! posture `nat.rs`/`dhcp.rs` use where netavark's netlink wrapper doesn't
//! cover a primitive (it has no peer-address or MTU setter).

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{Command, Stdio};

use netavark::network::netlink::{self, LinkID};

use crate::error::{Error, Result};

const TUN_DEV: &str = "/dev/net/tun";
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

pub struct TunDevice {
    pub ifname: String,
    pub(crate) file: File,
}

impl TunDevice {
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

pub trait TunnelFactory: Send + Sync {
    /// `name_hint` is used verbatim if free, otherwise the kernel's own
    /// `%d`-style naming takes over (mirrored from the ioctl's own behavior).
    fn create(&self, name_hint: &str) -> Result<TunDevice>;
    /// Point-to-point address configuration, the `ip addr add local peer
    /// peer/prefixlen dev <tun>` equivalent the link-up handler runs once
    /// the interface comes up.
    fn configure_address(&self, ifname: &str, local: Ipv4Addr, peer: Ipv4Addr, prefix_len: u8) -> Result<()>;
    fn set_up(&self, ifname: &str) -> Result<()>;
    fn set_mtu(&self, ifname: &str, mtu: u32) -> Result<()>;
}

pub struct RealTunnelFactory;

impl RealTunnelFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealTunnelFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelFactory for RealTunnelFactory {
    fn create(&self, name_hint: &str) -> Result<TunDevice> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TUN_DEV)
            .map_err(Error::Tunnel)?;

        let mut req: IfReq = unsafe { std::mem::zeroed() };
        req.flags = IFF_TUN | IFF_NO_PI;
        let c_name = CString::new(name_hint).map_err(|e| Error::Other(e.to_string()))?;
        let bytes = c_name.as_bytes_with_nul();
        if bytes.len() > libc::IFNAMSIZ {
            return Err(Error::Other(format!("interface name {} too long", name_hint)));
        }
        for (dst, src) in req.name.iter_mut().zip(bytes.iter()) {
            *dst = *src as libc::c_char;
        }

        let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut req) };
        if rc < 0 {
            return Err(Error::Tunnel(std::io::Error::last_os_error()));
        }

        let name_bytes: Vec<u8> = req
            .name
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        let ifname = String::from_utf8_lossy(&name_bytes).into_owned();

        Ok(TunDevice { ifname, file })
    }

    fn configure_address(&self, ifname: &str, local: Ipv4Addr, peer: Ipv4Addr, prefix_len: u8) -> Result<()> {
        let local_spec = format!("{}/{}", local, prefix_len);
        let output = Command::new("ip")
            .args(["addr", "add", &local_spec, "peer", &peer.to_string(), "dev", ifname])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(Error::Tunnel)?;
        if output.status.success() {
            return Ok(());
        }
        if String::from_utf8_lossy(&output.stderr).contains("File exists") {
            return Ok(());
        }
        Err(Error::Netlink(format!(
            "ip addr add {} peer {} dev {}: {}",
            local_spec,
            peer,
            ifname,
            String::from_utf8_lossy(&output.stderr)
        )))
    }

    fn set_up(&self, ifname: &str) -> Result<()> {
        let mut socket = netlink::Socket::new().map_err(|e| Error::Netlink(e.to_string()))?;
        socket
            .set_up(LinkID::Name(ifname.to_string()))
            .map_err(|e| Error::Netlink(e.to_string()))
    }

    fn set_mtu(&self, ifname: &str, mtu: u32) -> Result<()> {
        let mtu_str = mtu.to_string();
        let output = Command::new("ip")
            .args(["link", "set", "dev", ifname, "mtu", &mtu_str])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(Error::Tunnel)?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::Netlink(format!(
            "ip link set dev {} mtu {}: {}",
            ifname,
            mtu,
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}
