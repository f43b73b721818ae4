//! The tethering state machine: enable/disable with reference
//! counting, NAT vs bridged-AP mode divergence, and the egress-index query
//! upper layers use while bridged-AP is active.
//!
//! `enable_count` is an `AtomicI64` (`fetch_add`/`fetch_sub`), kept outside
//! the lock so a status read never blocks on an in-progress enable/disable;
//! the rest of the state lives behind a `parking_lot::Mutex`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use ipnet::Ipv6Net;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::platform::bridge::BridgeAddress;
use crate::platform::pool::PoolWidth;
use crate::platform::Platform;
use crate::types::{Device, EngineStatus, PoolRange, RestartTicket, TetherMode};

pub struct TetheringEngine {
    platform: Arc<Platform>,
    config: Arc<Config>,
    restart_tx: Sender<RestartTicket>,
    enable_count: AtomicI64,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    active_mode: Option<TetherMode>,
    upstream_ifname: String,
    pool: Option<PoolRange>,
    dns_primary: Option<String>,
    dns_secondary: Option<String>,
    bridged_upstream_index: Option<u32>,
    bridged_service_index: Option<usize>,
}

impl TetheringEngine {
    pub fn new(platform: Arc<Platform>, config: Arc<Config>, restart_tx: Sender<RestartTicket>) -> Self {
        Self {
            platform,
            config,
            restart_tx,
            enable_count: AtomicI64::new(0),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn status(&self) -> (EngineStatus, i64) {
        let count = self.enable_count.load(Ordering::SeqCst);
        let mode = self.inner.lock().active_mode;
        (EngineStatus::from(mode), count)
    }

    /// The upstream interface currently in use, if tethering is enabled.
    /// Read by `PrivateNetworkManager` to piggyback per-client NAT on the
    /// same upstream egress the Engine itself masquerades through.
    pub fn current_upstream(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner.active_mode.map(|_| inner.upstream_ifname.clone())
    }

    /// Snapshot of the fallback DNS strings cached at the last NAT enable,
    /// handed to newly requested private networks.
    pub fn dns_snapshot(&self) -> (Option<String>, Option<String>) {
        let inner = self.inner.lock();
        (inner.dns_primary.clone(), inner.dns_secondary.clone())
    }

    pub fn bridge_name(&self) -> &str {
        &self.config.bridge_name
    }

    /// `target_index_for`: bridge index while bridged-AP is active,
    /// else the device's own index.
    pub fn target_index_for(&self, device: &Device) -> Result<u32> {
        let inner = self.inner.lock();
        match inner.active_mode {
            Some(TetherMode::BridgedAp) => self.platform.bridge.ifindex(&self.config.bridge_name),
            _ => Ok(device.index),
        }
    }

    pub fn enable(&self, mode: TetherMode, upstream_ifname: &str) -> Result<bool> {
        let prev = self.enable_count.fetch_add(1, Ordering::SeqCst);
        if prev != 0 {
            let active = self.inner.lock().active_mode;
            if active.is_some() && active != Some(mode) {
                self.enable_count.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::ModeCrossingNotSupported(active.unwrap()));
            }
            return Ok(true);
        }

        let result = match mode {
            TetherMode::Nat => self.enable_nat(upstream_ifname),
            TetherMode::BridgedAp => self.enable_bridged_ap(upstream_ifname),
        };

        match result {
            Ok(()) => {
                let mut inner = self.inner.lock();
                inner.active_mode = Some(mode);
                inner.upstream_ifname = upstream_ifname.to_string();
                Ok(true)
            }
            Err(err) => {
                self.enable_count.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    pub fn disable(&self, mode: TetherMode) {
        let prev = self.enable_count.fetch_sub(1, Ordering::SeqCst);
        if prev != 1 {
            if prev <= 0 {
                // underflowed past zero; someone disabled more than they enabled.
                self.enable_count.fetch_add(1, Ordering::SeqCst);
            }
            return;
        }
        self.teardown(mode);
    }

    fn enable_nat(&self, upstream_ifname: &str) -> Result<()> {
        let bridge_name = self.config.bridge_name.clone();
        self.platform.bridge.ifindex(&bridge_name)?;

        let range = self.platform.pool.reserve(PoolWidth::Bridge)?;
        let restart_tx = self.restart_tx.clone();
        let ticket = RestartTicket {
            mode: TetherMode::Nat,
            upstream_ifname: upstream_ifname.to_string(),
        };
        self.platform.pool.register_reuse_notifier(
            &range,
            Box::new(move || {
                let _ = restart_tx.send(ticket.clone());
            }),
        );

        if let Err(err) = self.platform.bridge.enable(
            &bridge_name,
            Some(&BridgeAddress {
                gateway: range.gateway,
                broadcast: range.broadcast,
                prefix_len: range.prefix_len,
            }),
        ) {
            self.platform.pool.release(&range);
            return Err(err);
        }

        let (fallback_primary, fallback_secondary) = self.config.fallback_dns_pair();

        let dns_for_dhcp = match self.platform.dns_proxy.set_active(&bridge_name, &[range.gateway.to_string()]) {
            Ok(()) => vec![range.gateway.to_string()],
            Err(err) => {
                tracing::warn!("dns proxy registration failed, falling back: {}", err);
                fallback_primary.clone().into_iter().collect()
            }
        };

        let lease = self.config.dhcp_lease_time.clone();
        if let Err(err) = self.platform.dhcp.start(&bridge_name, &range, &lease, &dns_for_dhcp) {
            self.platform.dns_proxy.clear_active(&bridge_name).ok();
            self.platform.bridge.disable(&bridge_name).ok();
            self.platform.pool.release(&range);
            return Err(err);
        }

        if let Err(err) = self.platform.nat.masquerade_enable(upstream_ifname, range.gateway, range.prefix_len) {
            self.platform.dhcp.stop(&bridge_name).ok();
            self.platform.dns_proxy.clear_active(&bridge_name).ok();
            self.platform.bridge.disable(&bridge_name).ok();
            self.platform.pool.release(&range);
            return Err(err);
        }

        let ula = ula_prefix_for(&bridge_name);
        if let Err(err) = self.platform.ipv6pd.advertise(&bridge_name, ula) {
            tracing::warn!("ipv6 prefix delegation best-effort failed: {}", err);
        }

        let mut inner = self.inner.lock();
        inner.pool = Some(range);
        inner.dns_primary = fallback_primary;
        inner.dns_secondary = fallback_secondary;
        Ok(())
    }

    fn enable_bridged_ap(&self, upstream_ifname: &str) -> Result<()> {
        let bridge_name = self.config.bridge_name.clone();
        self.platform.bridge.ifindex(&bridge_name)?;
        self.platform.bridge.enable(&bridge_name, None)?;

        let upstream_index = self
            .platform
            .bridge
            .ifindex(upstream_ifname)
            .map_err(|_| Error::UpstreamNotFound(upstream_ifname.to_string()))?;

        let service = self
            .platform
            .registry
            .service_for_ifname(upstream_ifname)?
            .ok_or_else(|| Error::NoUpstreamService(upstream_ifname.to_string()))?;

        self.platform.registry.disconnect(service.service_index)?;

        if let Err(err) = self.platform.bridge.add_to_bridge(upstream_index, &bridge_name) {
            self.platform.registry.reconnect(service.service_index).ok();
            return Err(err);
        }

        if let Err(err) = self.platform.registry.reconnect(service.service_index) {
            self.platform.bridge.remove_from_bridge(upstream_index, &bridge_name).ok();
            self.platform.registry.reconnect(service.service_index).ok();
            self.platform.bridge.disable(&bridge_name).ok();
            return Err(err);
        }

        let ula = ula_prefix_for(&bridge_name);
        if let Err(err) = self.platform.ipv6pd.advertise(&bridge_name, ula) {
            tracing::warn!("ipv6 prefix delegation best-effort failed: {}", err);
        }

        let mut inner = self.inner.lock();
        inner.bridged_upstream_index = Some(upstream_index);
        inner.bridged_service_index = Some(service.service_index);
        Ok(())
    }

    fn teardown(&self, mode: TetherMode) {
        let bridge_name = self.config.bridge_name.clone();

        if let Err(err) = self.platform.ipv6pd.withdraw(&bridge_name) {
            tracing::warn!("ipv6 prefix delegation cleanup failed: {}", err);
        }

        let mut inner = self.inner.lock();
        match mode {
            TetherMode::BridgedAp => {
                if let Some(service_index) = inner.bridged_service_index.take() {
                    self.platform.registry.disconnect(service_index).ok();
                    if let Some(upstream_index) = inner.bridged_upstream_index.take() {
                        self.platform.bridge.remove_from_bridge(upstream_index, &bridge_name).ok();
                        self.platform.bridge.set_up(upstream_index).ok();
                    }
                    self.platform.registry.reconnect(service_index).ok();
                }
            }
            TetherMode::Nat => {
                self.platform.dns_proxy.clear_active(&bridge_name).ok();
                if let Some(range) = &inner.pool {
                    self.platform
                        .nat
                        .masquerade_disable(&inner.upstream_ifname, range.gateway, range.prefix_len)
                        .ok();
                }
                self.platform.dhcp.stop(&bridge_name).ok();
                if let Some(range) = inner.pool.take() {
                    self.platform.pool.release(&range);
                }
                inner.dns_primary = None;
                inner.dns_secondary = None;
            }
        }

        self.platform.bridge.disable(&bridge_name).ok();
        inner.active_mode = None;
        inner.upstream_ifname.clear();
    }
}

fn ula_prefix_for(bridge_name: &str) -> Ipv6Net {
    let mut hasher = DefaultHasher::new();
    bridge_name.hash(&mut hasher);
    let hashed = hasher.finish().to_be_bytes();
    let mut octets = [0u8; 16];
    octets[0] = 0xfd;
    octets[1..8].copy_from_slice(&hashed);
    Ipv6Net::new(Ipv6Addr::from(octets), 64).expect("fixed /64 is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mocks::{
        MockBridgeOps, MockDhcpOps, MockDnsProxyOps, MockIpPoolOps, MockIpv6PdOps, MockLinkWatcher,
        MockNatOps, MockServiceRegistry, MockTunnelFactory,
    };
    use crate::platform::registry::UpstreamService;

    /// Bundles the `Platform` (for the engine) alongside the concrete mock
    /// handles tests assert against directly, since `Arc<dyn Trait>` can't
    /// be downcast back to the concrete mock type.
    struct TestRig {
        platform: Arc<Platform>,
        bridge: Arc<MockBridgeOps>,
        pool: Arc<MockIpPoolOps>,
        registry: Arc<MockServiceRegistry>,
    }

    fn test_rig() -> TestRig {
        let bridge = Arc::new(MockBridgeOps::default());
        let pool = Arc::new(MockIpPoolOps::default());
        let registry = Arc::new(MockServiceRegistry::default());
        let platform = Arc::new(Platform {
            bridge: bridge.clone(),
            pool: pool.clone(),
            dhcp: Arc::new(MockDhcpOps::default()),
            nat: Arc::new(MockNatOps::default()),
            dns_proxy: Arc::new(MockDnsProxyOps::default()),
            ipv6pd: Arc::new(MockIpv6PdOps),
            registry: registry.clone(),
            tunnel: Arc::new(MockTunnelFactory::default()),
            link_watch: Arc::new(MockLinkWatcher::default()),
        });
        bridge.create("tether").unwrap();
        TestRig {
            platform,
            bridge,
            pool,
            registry,
        }
    }

    fn test_engine() -> (Arc<TetheringEngine>, TestRig) {
        let rig = test_rig();
        let config = Arc::new(Config {
            bridge_name: "tether".to_string(),
            ..Config::default()
        });
        let (tx, rx) = crate::restart::restart_channel();
        let engine = Arc::new(TetheringEngine::new(rig.platform.clone(), config, tx));
        crate::restart::spawn_restart_worker(engine.clone(), rx);
        (engine, rig)
    }

    #[test]
    fn s1_nat_enable_refcounts_and_acquires_resources() {
        let (engine, rig) = test_engine();
        assert!(engine.enable(TetherMode::Nat, "eth0").unwrap());
        let (status, count) = engine.status();
        assert_eq!(status, EngineStatus::Nat);
        assert_eq!(count, 1);
        assert_eq!(rig.pool.in_use(), 1);

        // s2: repeated enable just refcounts.
        assert!(engine.enable(TetherMode::Nat, "eth0").unwrap());
        assert_eq!(engine.status().1, 2);

        engine.disable(TetherMode::Nat);
        assert_eq!(engine.status().1, 1);
        assert_eq!(engine.status().0, EngineStatus::Nat);

        engine.disable(TetherMode::Nat);
        assert_eq!(engine.status(), (EngineStatus::Off, 0));
        assert_eq!(rig.pool.in_use(), 0);
    }

    #[test]
    fn mode_crossing_is_rejected() {
        let (engine, _rig) = test_engine();
        assert!(engine.enable(TetherMode::Nat, "eth0").unwrap());
        let err = engine.enable(TetherMode::BridgedAp, "eth0").unwrap_err();
        assert!(matches!(err, Error::ModeCrossingNotSupported(TetherMode::Nat)));
        // the rejected attempt must not have left the refcount incremented.
        assert_eq!(engine.status().1, 1);
    }

    #[test]
    fn s3_bridged_ap_enable_disable_round_trip() {
        let (engine, rig) = test_engine();
        rig.registry.register(
            UpstreamService {
                service_index: 7,
                ifname: "eth0".to_string(),
                nameservers: vec![],
            },
            true,
        );

        assert!(engine.enable(TetherMode::BridgedAp, "eth0").unwrap());
        assert_eq!(engine.status().0, EngineStatus::BridgedAp);

        engine.disable(TetherMode::BridgedAp);
        assert_eq!(engine.status(), (EngineStatus::Off, 0));
    }

    #[test]
    fn enable_failure_restores_refcount_to_zero() {
        let (engine, rig) = test_engine();
        rig.bridge.fail("bridge.enable");

        let err = engine.enable(TetherMode::Nat, "eth0").unwrap_err();
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(engine.status(), (EngineStatus::Off, 0));
        assert_eq!(rig.pool.in_use(), 0);
    }

    #[test]
    fn s6_pool_reused_externally_triggers_restart() {
        let (engine, rig) = test_engine();
        assert!(engine.enable(TetherMode::Nat, "eth0").unwrap());
        assert_eq!(rig.pool.in_use(), 1);

        rig.pool.fire_reuse();

        // the restart worker runs on its own thread; poll until it has
        // cycled disable→enable and re-acquired a (fresh) pool slot.
        let mut saw_restart = false;
        for _ in 0..50 {
            if rig.pool.in_use() == 1 && engine.status() == (EngineStatus::Nat, 1) {
                saw_restart = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(saw_restart, "expected the pool-reuse restart to re-enable NAT mode");
    }

    #[test]
    fn target_index_for_follows_active_mode() {
        let (engine, rig) = test_engine();
        rig.registry.register(
            UpstreamService {
                service_index: 1,
                ifname: "eth0".to_string(),
                nameservers: vec![],
            },
            true,
        );

        let device = Device {
            ifname: "eth0".to_string(),
            index: 42,
        };
        assert_eq!(engine.target_index_for(&device).unwrap(), 42);

        engine.enable(TetherMode::BridgedAp, "eth0").unwrap();
        assert_ne!(engine.target_index_for(&device).unwrap(), 42);

        engine.disable(TetherMode::BridgedAp);
        assert_eq!(engine.target_index_for(&device).unwrap(), 42);
    }
}
