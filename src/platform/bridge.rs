//! Bridge lifecycle: create/enable/disable/remove the kernel bridge
//! link, plus ifindex lookup and membership add/remove for the upstream
//! ethernet device.
//!
//! Real implementation uses `netavark::network::netlink::Socket` calls
//! (`create_link`, `get_link`, `add_addr`, `set_up`), split into finer
//! operations than a single apply-everything call since bridged-AP mode
//! enables the bridge with no address at all.

use std::net::Ipv4Addr;

use netavark::network::netlink::{self, CreateLinkOptions, LinkID};
use netlink_packet_route::link::InfoKind;

use crate::error::{Error, Result};

/// Optional L3 configuration applied when enabling the bridge. `None` means
/// "L2-only" (bridged-AP mode): the bridge carries no address of its own.
#[derive(Debug, Clone)]
pub struct BridgeAddress {
    pub gateway: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub prefix_len: u8,
}

pub trait BridgeOps: Send + Sync {
    /// Idempotent: creating an already-existing bridge is not an error.
    fn create(&self, name: &str) -> Result<()>;
    /// Idempotent: removing a missing bridge is not an error.
    fn remove(&self, name: &str) -> Result<()>;
    /// `address = None` brings the bridge up with no addressing (L2-only).
    /// Already-enabled is success.
    fn enable(&self, name: &str, address: Option<&BridgeAddress>) -> Result<()>;
    fn disable(&self, name: &str) -> Result<()>;
    /// Negative/absent on a missing interface.
    fn ifindex(&self, name: &str) -> Result<u32>;
    /// Already-a-member is success.
    fn add_to_bridge(&self, if_index: u32, bridge: &str) -> Result<()>;
    fn remove_from_bridge(&self, if_index: u32, bridge: &str) -> Result<()>;
    fn set_up(&self, if_index: u32) -> Result<()>;
}

pub struct RealBridgeOps;

impl RealBridgeOps {
    pub fn new() -> Self {
        Self
    }

    fn socket() -> Result<netlink::Socket> {
        netlink::Socket::new().map_err(|e| Error::Netlink(e.to_string()))
    }
}

impl Default for RealBridgeOps {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeOps for RealBridgeOps {
    fn create(&self, name: &str) -> Result<()> {
        let mut socket = Self::socket()?;
        match socket.create_link(CreateLinkOptions::new(name.to_string(), InfoKind::Bridge)) {
            Ok(()) => Ok(()),
            Err(e) if already_exists(&e) => Ok(()),
            Err(e) => Err(Error::Netlink(e.to_string())),
        }
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut socket = Self::socket()?;
        match socket.del_link(LinkID::Name(name.to_string())) {
            Ok(()) => Ok(()),
            Err(e) if not_found(&e) => Ok(()),
            Err(e) => Err(Error::Netlink(e.to_string())),
        }
    }

    fn enable(&self, name: &str, address: Option<&BridgeAddress>) -> Result<()> {
        let mut socket = Self::socket()?;
        let id = socket
            .get_link(LinkID::Name(name.to_string()))
            .map_err(|_| Error::BridgeNotFound(name.to_string()))?
            .header
            .index;

        if let Some(addr) = address {
            let net = ipnet::Ipv4Net::new(addr.gateway, addr.prefix_len)
                .map_err(|e| Error::Netlink(e.to_string()))?;
            match socket.add_addr(id, &net.into()) {
                Ok(()) => {}
                Err(e) if already_exists(&e) => {}
                Err(e) => return Err(Error::Netlink(e.to_string())),
            }
        }

        match socket.set_up(LinkID::ID(id)) {
            Ok(()) => Ok(()),
            Err(e) if already_exists(&e) => Ok(()),
            Err(e) => Err(Error::Netlink(e.to_string())),
        }
    }

    fn disable(&self, name: &str) -> Result<()> {
        let mut socket = Self::socket()?;
        let id = match socket.get_link(LinkID::Name(name.to_string())) {
            Ok(link) => link.header.index,
            Err(_) => return Ok(()),
        };
        match socket.set_down(LinkID::ID(id)) {
            Ok(()) => Ok(()),
            Err(e) if not_found(&e) => Ok(()),
            Err(e) => Err(Error::Netlink(e.to_string())),
        }
    }

    fn ifindex(&self, name: &str) -> Result<u32> {
        let mut socket = Self::socket()?;
        socket
            .get_link(LinkID::Name(name.to_string()))
            .map(|link| link.header.index)
            .map_err(|_| Error::UpstreamNotFound(name.to_string()))
    }

    fn add_to_bridge(&self, if_index: u32, bridge: &str) -> Result<()> {
        let mut socket = Self::socket()?;
        let bridge_index = socket
            .get_link(LinkID::Name(bridge.to_string()))
            .map_err(|_| Error::BridgeNotFound(bridge.to_string()))?
            .header
            .index;
        match socket.set_master(LinkID::ID(if_index), bridge_index) {
            Ok(()) => Ok(()),
            Err(e) if already_exists(&e) => Ok(()),
            Err(e) => Err(Error::Netlink(e.to_string())),
        }
    }

    fn remove_from_bridge(&self, if_index: u32, _bridge: &str) -> Result<()> {
        let mut socket = Self::socket()?;
        match socket.set_nomaster(LinkID::ID(if_index)) {
            Ok(()) => Ok(()),
            Err(e) if not_found(&e) => Ok(()),
            Err(e) => Err(Error::Netlink(e.to_string())),
        }
    }

    fn set_up(&self, if_index: u32) -> Result<()> {
        let mut socket = Self::socket()?;
        match socket.set_up(LinkID::ID(if_index)) {
            Ok(()) => Ok(()),
            Err(e) if already_exists(&e) => Ok(()),
            Err(e) => Err(Error::Netlink(e.to_string())),
        }
    }
}

fn already_exists(err: &impl std::fmt::Display) -> bool {
    let msg = err.to_string();
    msg.contains("File exists") || msg.contains("EEXIST") || msg.contains("EALREADY")
}

fn not_found(err: &impl std::fmt::Display) -> bool {
    let msg = err.to_string();
    msg.contains("No such") || msg.contains("ENODEV") || msg.contains("ENOENT")
}
