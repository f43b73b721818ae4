//! Per-client private network lifecycle: tun device creation, address
//! assignment on link-up, NAT activation piggybacked on the bridge, reply
//! assembly, and automatic teardown on release, owner death, or pool reuse.
//!
//! The manager's own state lives behind a single `parking_lot::Mutex`
//! guarding a `HashMap<path, PrivateNetwork>`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::TetheringEngine;
use crate::error::{Error, Result};
use crate::platform::pool::PoolWidth;
use crate::platform::tunnel::TunDevice;
use crate::platform::Platform;
use crate::types::{PoolRange, PrivateNetworkReply};

struct PrivateNetwork {
    owner: String,
    ifname: String,
    #[allow(dead_code)]
    tun: TunDevice,
    pool_slot: PoolRange,
    primary_dns: Option<String>,
    secondary_dns: Option<String>,
    reply: Option<PrivateNetworkReply>,
    failed: Option<Error>,
}

pub struct PrivateNetworkManager {
    platform: Arc<Platform>,
    config: Arc<Config>,
    engine: Arc<TetheringEngine>,
    networks: Mutex<HashMap<String, PrivateNetwork>>,
}

impl PrivateNetworkManager {
    pub fn new(platform: Arc<Platform>, config: Arc<Config>, engine: Arc<TetheringEngine>) -> Self {
        Self {
            platform,
            config,
            engine,
            networks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the tun device and reserves resources synchronously; the
    /// reply itself is assembled later by `setup_tun_interface` once
    /// link-up fires. Returns the synthesized path so callers can poll for
    /// the reply.
    pub fn request(self: &Arc<Self>, owner_id: &str) -> Result<String> {
        let tun = self.platform.tunnel.create("tether-pn%d")?;
        let path = format!("/tethering/{}", tun.ifname);

        if self.networks.lock().contains_key(&path) {
            return Err(Error::AlreadyExists(path));
        }

        self.platform.tunnel.set_mtu(&tun.ifname, 1500)?;

        let pool_slot = match self.platform.pool.reserve(PoolWidth::PrivateSlot) {
            Ok(slot) => slot,
            Err(err) => return Err(err),
        };

        let manager = self.clone();
        let reuse_path = path.clone();
        self.platform.pool.register_reuse_notifier(
            &pool_slot,
            Box::new(move || manager.remove(&reuse_path)),
        );

        let (primary_dns, secondary_dns) = self.engine.dns_snapshot();

        let ifname = tun.ifname.clone();
        self.networks.lock().insert(
            path.clone(),
            PrivateNetwork {
                owner: owner_id.to_string(),
                ifname: ifname.clone(),
                tun,
                pool_slot,
                primary_dns,
                secondary_dns,
                reply: None,
                failed: None,
            },
        );

        let link_rx = self.platform.link_watch.watch(&ifname);
        let manager = self.clone();
        let setup_path = path.clone();
        std::thread::spawn(move || {
            // The real/mock `LinkWatcher` only ever notifies once, on the
            // down-to-up transition, so acting unconditionally on the first
            // message is "act once, on the transition to up": the watcher's
            // edge semantics and the handler's own debounce cancel out.
            if link_rx.recv().is_ok() {
                manager.setup_tun_interface(&setup_path);
            }
        });

        Ok(path)
    }

    /// Polled by `tetherd`'s HTTP handler until the reply is ready (or the
    /// setup failed), replacing the object-bus's async reply delivery.
    pub fn poll_reply(&self, path: &str) -> Result<Option<PrivateNetworkReply>> {
        let networks = self.networks.lock();
        let network = networks.get(path).ok_or_else(|| Error::NotFound(path.to_string()))?;
        if let Some(err) = &network.failed {
            return Err(Error::Other(err.to_string()));
        }
        Ok(network.reply.clone())
    }

    pub fn release(&self, path: &str) -> Result<()> {
        if self.remove(path) {
            Ok(())
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }

    pub fn remove_by_owner(&self, owner: &str) {
        let paths: Vec<String> = self
            .networks
            .lock()
            .iter()
            .filter(|(_, net)| net.owner == owner)
            .map(|(path, _)| path.clone())
            .collect();
        for path in paths {
            self.remove(&path);
        }
    }

    fn setup_tun_interface(&self, path: &str) {
        let (ifname, pool_slot, primary_dns, secondary_dns) = {
            let networks = self.networks.lock();
            let Some(network) = networks.get(path) else {
                return;
            };
            (
                network.ifname.clone(),
                network.pool_slot.clone(),
                network.primary_dns.clone(),
                network.secondary_dns.clone(),
            )
        };

        let server_ip = pool_slot.start_ip;
        let peer_ip = pool_slot.end_ip;

        let result = self.activate(path, &ifname, server_ip, peer_ip, pool_slot.prefix_len);

        let mut networks = self.networks.lock();
        let Some(network) = networks.get_mut(path) else {
            return;
        };
        match result {
            Ok(()) => {
                network.reply = Some(PrivateNetworkReply {
                    path: path.to_string(),
                    server_ipv4: server_ip,
                    peer_ipv4: peer_ip,
                    primary_dns,
                    secondary_dns,
                    fd: network.tun.fd(),
                });
            }
            Err(err) => {
                network.failed = Some(err);
            }
        }
    }

    fn activate(
        &self,
        path: &str,
        ifname: &str,
        server_ip: std::net::Ipv4Addr,
        peer_ip: std::net::Ipv4Addr,
        prefix_len: u8,
    ) -> Result<()> {
        if !self.networks.lock().contains_key(path) {
            return Err(Error::NotFound(path.to_string()));
        }

        self.platform
            .tunnel
            .configure_address(ifname, server_ip, peer_ip, prefix_len)?;
        self.platform.tunnel.set_up(ifname)?;

        let Some(upstream) = self.engine.current_upstream() else {
            return Err(Error::NoUpstreamNetwork(self.engine.bridge_name().to_string()));
        };

        self.platform.nat.masquerade_enable(&upstream, server_ip, prefix_len)
    }

    /// Tears a private network down unconditionally. Returns whether an
    /// entry was actually present (used to distinguish "released" from
    /// "not found" in `release`).
    fn remove(&self, path: &str) -> bool {
        let removed = self.networks.lock().remove(path);
        let Some(network) = removed else {
            return false;
        };

        if let Some(upstream) = self.engine.current_upstream() {
            self.platform
                .nat
                .masquerade_disable(&upstream, network.pool_slot.gateway, network.pool_slot.prefix_len)
                .ok();
        }
        self.platform.link_watch.stop(&network.ifname);
        self.platform.pool.release(&network.pool_slot);
        let _ = &self.config;
        true
    }
}
