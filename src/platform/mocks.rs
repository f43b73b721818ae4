//! Stateful in-memory mocks for every platform trait, used by `engine.rs`
//! and `private_network.rs`'s unit tests.
//!
//! Each mock wraps its state behind `Arc<Mutex<_>>` so a test can hold a
//! clone and assert on what the engine actually did, plus a `fail_on` set so
//! a test can force a specific operation to fail and exercise the engine's
//! rollback paths.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel::Receiver;
use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::types::PoolRange;

use super::bridge::{BridgeAddress, BridgeOps};
use super::dhcp::DhcpOps;
use super::dnsproxy::DnsProxyOps;
use super::ipv6pd::Ipv6PdOps;
use super::link_watch::{LinkUpEvent, LinkWatcher};
use super::nat::NatOps;
use super::pool::IpPoolOps;
use super::registry::{ServiceRegistry, UpstreamService};
use super::tunnel::{TunDevice, TunnelFactory};

#[derive(Default)]
struct FailOn(Mutex<HashSet<String>>);

impl FailOn {
    fn check(&self, op: &str) -> Result<()> {
        if self.0.lock().unwrap().contains(op) {
            Err(Error::Other(format!("mock failure injected on {op}")))
        } else {
            Ok(())
        }
    }

    fn set(&self, op: &str) {
        self.0.lock().unwrap().insert(op.to_string());
    }
}

#[derive(Default)]
pub struct MockBridgeOps {
    fail_on: FailOn,
    pub bridges: Mutex<HashMap<String, bool>>,
    pub members: Mutex<HashMap<u32, String>>,
    next_index: Mutex<u32>,
}

impl MockBridgeOps {
    pub fn fail(&self, op: &str) {
        self.fail_on.set(op);
    }
}

impl BridgeOps for MockBridgeOps {
    fn create(&self, name: &str) -> Result<()> {
        self.fail_on.check("bridge.create")?;
        self.bridges.lock().unwrap().entry(name.to_string()).or_insert(false);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.fail_on.check("bridge.remove")?;
        self.bridges.lock().unwrap().remove(name);
        Ok(())
    }

    fn enable(&self, name: &str, _address: Option<&BridgeAddress>) -> Result<()> {
        self.fail_on.check("bridge.enable")?;
        self.bridges.lock().unwrap().insert(name.to_string(), true);
        Ok(())
    }

    fn disable(&self, name: &str) -> Result<()> {
        self.fail_on.check("bridge.disable")?;
        self.bridges.lock().unwrap().insert(name.to_string(), false);
        Ok(())
    }

    fn ifindex(&self, name: &str) -> Result<u32> {
        self.fail_on.check("bridge.ifindex")?;
        if !self.bridges.lock().unwrap().contains_key(name) {
            return Err(Error::UpstreamNotFound(name.to_string()));
        }
        let mut next = self.next_index.lock().unwrap();
        *next += 1;
        Ok(*next)
    }

    fn add_to_bridge(&self, if_index: u32, bridge: &str) -> Result<()> {
        self.fail_on.check("bridge.add_to_bridge")?;
        self.members.lock().unwrap().insert(if_index, bridge.to_string());
        Ok(())
    }

    fn remove_from_bridge(&self, if_index: u32, _bridge: &str) -> Result<()> {
        self.fail_on.check("bridge.remove_from_bridge")?;
        self.members.lock().unwrap().remove(&if_index);
        Ok(())
    }

    fn set_up(&self, _if_index: u32) -> Result<()> {
        self.fail_on.check("bridge.set_up")
    }
}

#[derive(Default)]
pub struct MockIpPoolOps {
    fail_on: FailOn,
    state: Mutex<PoolCounter>,
}

#[derive(Default)]
struct PoolCounter {
    next: u8,
    next_slot: u8,
    checked_out: usize,
    watchers: Vec<super::pool::ReuseCallback>,
}

impl MockIpPoolOps {
    pub fn fail(&self, op: &str) {
        self.fail_on.set(op);
    }
}

impl IpPoolOps for MockIpPoolOps {
    fn reserve(&self, width: super::pool::PoolWidth) -> Result<PoolRange> {
        self.fail_on.check("pool.reserve")?;
        let mut state = self.state.lock().unwrap();
        match width {
            super::pool::PoolWidth::Bridge => {
                if state.next >= 250 {
                    return Err(Error::PoolExhausted);
                }
                let octet = state.next;
                state.next += 1;
                state.checked_out += 1;
                let net = Ipv4Net::new(Ipv4Addr::new(192, 168, octet, 0), 24).unwrap();
                Ok(PoolRange {
                    gateway: Ipv4Addr::new(192, 168, octet, 1),
                    broadcast: net.broadcast(),
                    prefix_len: 24,
                    start_ip: Ipv4Addr::new(192, 168, octet, 2),
                    end_ip: Ipv4Addr::new(192, 168, octet, 254),
                })
            }
            super::pool::PoolWidth::PrivateSlot => {
                if state.next_slot >= 63 {
                    return Err(Error::PoolExhausted);
                }
                let block = state.next_slot;
                state.next_slot += 1;
                state.checked_out += 1;
                let base = block * 4;
                let net = Ipv4Net::new(Ipv4Addr::new(192, 168, 250, base), 30).unwrap();
                Ok(PoolRange {
                    gateway: Ipv4Addr::new(192, 168, 250, base + 1),
                    broadcast: net.broadcast(),
                    prefix_len: 30,
                    start_ip: Ipv4Addr::new(192, 168, 250, base + 1),
                    end_ip: Ipv4Addr::new(192, 168, 250, base + 2),
                })
            }
        }
    }

    fn release(&self, _range: &PoolRange) {
        let mut state = self.state.lock().unwrap();
        state.checked_out = state.checked_out.saturating_sub(1);
    }

    fn in_use(&self) -> usize {
        self.state.lock().unwrap().checked_out
    }

    fn register_reuse_notifier(&self, _range: &PoolRange, on_reuse: super::pool::ReuseCallback) {
        self.state.lock().unwrap().watchers.push(on_reuse);
    }
}

impl MockIpPoolOps {
    /// Test hook: simulate an external process stealing back a reserved
    /// subnet, firing every registered reuse callback.
    pub fn fire_reuse(&self) {
        let watchers = std::mem::take(&mut self.state.lock().unwrap().watchers);
        for callback in watchers {
            callback();
        }
    }
}

#[derive(Default)]
pub struct MockDhcpOps {
    fail_on: FailOn,
    pub running: Mutex<HashSet<String>>,
}

impl MockDhcpOps {
    pub fn fail(&self, op: &str) {
        self.fail_on.set(op);
    }
}

impl DhcpOps for MockDhcpOps {
    fn start(&self, bridge: &str, _range: &PoolRange, _lease_time: &str, _dns: &[String]) -> Result<()> {
        self.fail_on.check("dhcp.start")?;
        self.running.lock().unwrap().insert(bridge.to_string());
        Ok(())
    }

    fn stop(&self, bridge: &str) -> Result<()> {
        self.fail_on.check("dhcp.stop")?;
        self.running.lock().unwrap().remove(bridge);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNatOps {
    fail_on: FailOn,
    pub refcounts: Mutex<HashMap<String, usize>>,
}

impl MockNatOps {
    pub fn fail(&self, op: &str) {
        self.fail_on.set(op);
    }
}

impl NatOps for MockNatOps {
    fn masquerade_enable(&self, upstream_ifname: &str, ip: Ipv4Addr, prefix_len: u8) -> Result<()> {
        self.fail_on.check("nat.masquerade_enable")?;
        let key = format!("{}/{}@{}", ip, prefix_len, upstream_ifname);
        *self.refcounts.lock().unwrap().entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn masquerade_disable(&self, upstream_ifname: &str, ip: Ipv4Addr, prefix_len: u8) -> Result<()> {
        self.fail_on.check("nat.masquerade_disable")?;
        let key = format!("{}/{}@{}", ip, prefix_len, upstream_ifname);
        let mut refcounts = self.refcounts.lock().unwrap();
        if let Some(count) = refcounts.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                refcounts.remove(&key);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDnsProxyOps {
    pub fallback: Vec<String>,
    pub active: Mutex<HashMap<String, Vec<String>>>,
}

impl DnsProxyOps for MockDnsProxyOps {
    fn select_nameservers(&self, upstream_nameservers: &[String]) -> Vec<String> {
        if upstream_nameservers.is_empty() {
            self.fallback.clone()
        } else {
            upstream_nameservers.to_vec()
        }
    }

    fn set_active(&self, bridge: &str, nameservers: &[String]) -> Result<()> {
        self.active.lock().unwrap().insert(bridge.to_string(), nameservers.to_vec());
        Ok(())
    }

    fn clear_active(&self, bridge: &str) -> Result<()> {
        self.active.lock().unwrap().remove(bridge);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockIpv6PdOps;

impl Ipv6PdOps for MockIpv6PdOps {
    fn carve_subnet(&self, delegated: ipnet::Ipv6Net, _bridge_index: u64) -> Result<ipnet::Ipv6Net> {
        Ok(delegated)
    }

    fn advertise(&self, _bridge: &str, _prefix: ipnet::Ipv6Net) -> Result<()> {
        Ok(())
    }

    fn withdraw(&self, _bridge: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockServiceRegistry {
    pub services: Mutex<HashMap<usize, (UpstreamService, bool)>>,
    pub default_index: Mutex<Option<usize>>,
}

impl MockServiceRegistry {
    pub fn register(&self, service: UpstreamService, is_default: bool) {
        let index = service.service_index;
        self.services.lock().unwrap().insert(index, (service, true));
        if is_default {
            *self.default_index.lock().unwrap() = Some(index);
        }
    }
}

impl ServiceRegistry for MockServiceRegistry {
    fn default_service(&self) -> Result<Option<UpstreamService>> {
        let Some(index) = *self.default_index.lock().unwrap() else {
            return Ok(None);
        };
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(&index)
            .filter(|(_, connected)| *connected)
            .map(|(svc, _)| svc.clone()))
    }

    fn service_for_ifname(&self, ifname: &str) -> Result<Option<UpstreamService>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .values()
            .find(|(svc, connected)| *connected && svc.ifname == ifname)
            .map(|(svc, _)| svc.clone()))
    }

    fn reconnect(&self, service_index: usize) -> Result<()> {
        if let Some((_, connected)) = self.services.lock().unwrap().get_mut(&service_index) {
            *connected = true;
        }
        Ok(())
    }

    fn disconnect(&self, service_index: usize) -> Result<()> {
        if let Some((_, connected)) = self.services.lock().unwrap().get_mut(&service_index) {
            *connected = false;
        }
        Ok(())
    }
}

/// What `configure_address` was last called with for a given interface, so
/// tests can assert the peer address was actually threaded through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfiguredAddress {
    pub local: std::net::Ipv4Addr,
    pub peer: std::net::Ipv4Addr,
    pub prefix_len: u8,
}

#[derive(Default)]
pub struct MockTunnelFactory {
    next: Mutex<u32>,
    pub addresses: Mutex<HashMap<String, ConfiguredAddress>>,
    pub mtus: Mutex<HashMap<String, u32>>,
}

impl TunnelFactory for MockTunnelFactory {
    fn create(&self, name_hint: &str) -> Result<TunDevice> {
        let mut next = self.next.lock().unwrap();
        *next += 1;
        // no real fd in tests; /dev/null is a harmless stand-in file handle.
        let file = std::fs::File::open("/dev/null").map_err(Error::Tunnel)?;
        Ok(TunDevice {
            ifname: format!("{name_hint}{next}"),
            file,
        })
    }

    fn configure_address(
        &self,
        ifname: &str,
        local: std::net::Ipv4Addr,
        peer: std::net::Ipv4Addr,
        prefix_len: u8,
    ) -> Result<()> {
        self.addresses.lock().unwrap().insert(
            ifname.to_string(),
            ConfiguredAddress { local, peer, prefix_len },
        );
        Ok(())
    }

    fn set_up(&self, _ifname: &str) -> Result<()> {
        Ok(())
    }

    fn set_mtu(&self, ifname: &str, mtu: u32) -> Result<()> {
        self.mtus.lock().unwrap().insert(ifname.to_string(), mtu);
        Ok(())
    }
}

/// Fires link-up immediately (after an optional artificial delay) rather
/// than polling real netlink state, so tests don't depend on kernel behavior.
#[derive(Default)]
pub struct MockLinkWatcher {
    pub delay: Option<Duration>,
}

impl LinkWatcher for MockLinkWatcher {
    fn watch(&self, ifname: &str) -> Receiver<LinkUpEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        let ifname = ifname.to_string();
        let delay = self.delay;
        std::thread::spawn(move || {
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            let _ = tx.send(LinkUpEvent { ifname });
        });
        rx
    }

    fn stop(&self, _ifname: &str) {}
}
