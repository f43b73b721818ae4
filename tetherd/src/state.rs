//! Shared daemon state: one `Platform`, one `TetheringEngine`, one
//! `PrivateNetworkManager`, plus the owner-liveness tracker, all wrapped in
//! `Arc` so axum's handlers and the background worker threads can all hold a
//! clone.

use std::sync::Arc;
use std::time::Duration;

use tether_core::config::Config;
use tether_core::engine::TetheringEngine;
use tether_core::heartbeat::OwnerLiveness;
use tether_core::platform::bridge::RealBridgeOps;
use tether_core::platform::dhcp::RealDhcpOps;
use tether_core::platform::dnsproxy::RealDnsProxyOps;
use tether_core::platform::ipv6pd::RealIpv6PdOps;
use tether_core::platform::link_watch::PollingLinkWatcher;
use tether_core::platform::nat::RealNatOps;
use tether_core::platform::pool::RealIpPoolOps;
use tether_core::platform::registry::StaticServiceRegistry;
use tether_core::platform::tunnel::RealTunnelFactory;
use tether_core::platform::Platform;
use tether_core::private_network::PrivateNetworkManager;
use tether_core::restart;

pub struct AppState {
    pub engine: Arc<TetheringEngine>,
    pub private_networks: Arc<PrivateNetworkManager>,
    pub liveness: Arc<OwnerLiveness>,
}

impl AppState {
    pub fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);

        tether_core::sysctl::enable_ipv4_forwarding()?;
        tether_core::sysctl::disable_bridge_nf_call_iptables()?;

        let pool = RealIpPoolOps::new(config.pool_base_network, config.pool_subnet_prefix)?;
        let platform = Arc::new(Platform {
            bridge: Arc::new(RealBridgeOps::new()),
            pool: Arc::new(pool),
            dhcp: Arc::new(RealDhcpOps::new()),
            nat: Arc::new(RealNatOps::new()),
            dns_proxy: Arc::new(RealDnsProxyOps::new(config.fallback_nameservers.clone())),
            ipv6pd: Arc::new(RealIpv6PdOps::new()),
            registry: Arc::new(StaticServiceRegistry::new()),
            tunnel: Arc::new(RealTunnelFactory::new()),
            link_watch: Arc::new(PollingLinkWatcher::default()),
        });

        platform.bridge.create(&config.bridge_name)?;

        let (restart_tx, restart_rx) = restart::restart_channel();
        let engine = Arc::new(TetheringEngine::new(platform.clone(), config.clone(), restart_tx));
        restart::spawn_restart_worker(engine.clone(), restart_rx);

        let private_networks = Arc::new(PrivateNetworkManager::new(platform, config.clone(), engine.clone()));

        let liveness = Arc::new(OwnerLiveness::new(Duration::from_secs(config.heartbeat_timeout_secs)));
        let reaper_private_networks = private_networks.clone();
        tether_core::heartbeat::spawn_reaper(liveness.clone(), Duration::from_secs(5), move |owner| {
            tracing::info!(owner, "owner liveness expired, removing its private networks");
            reaper_private_networks.remove_by_owner(owner);
        });

        Ok(Arc::new(Self {
            engine,
            private_networks,
            liveness,
        }))
    }
}
