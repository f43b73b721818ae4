//! The "platform capability set": one trait per external collaborator,
//! bundled so the engine and the private network manager each take a single
//! `Platform` struct of `Arc<dyn Trait>` fields instead of nine separate
//! constructor arguments. One file per concern: trait + `Real*` production
//! impl + `#[cfg(test)]` stateful mock.

pub mod bridge;
pub mod dhcp;
pub mod dnsproxy;
pub mod ipv6pd;
pub mod link_watch;
pub mod nat;
pub mod pool;
pub mod registry;
pub mod tunnel;

#[cfg(test)]
pub mod mocks;

use std::sync::Arc;

pub use bridge::BridgeOps;
pub use dhcp::DhcpOps;
pub use dnsproxy::DnsProxyOps;
pub use ipv6pd::Ipv6PdOps;
pub use link_watch::LinkWatcher;
pub use nat::NatOps;
pub use pool::IpPoolOps;
pub use registry::{ServiceRegistry, StaticServiceRegistry, UpstreamService};
pub use tunnel::TunnelFactory;

/// Everything the engine and the private network manager need from the
/// outside world. One `Platform` value is constructed at daemon startup and
/// shared (via `Arc`) between the engine, the private network manager, and
/// the background threads (link watcher, pool-reuse poller).
pub struct Platform {
    pub bridge: Arc<dyn BridgeOps>,
    pub pool: Arc<dyn IpPoolOps>,
    pub dhcp: Arc<dyn DhcpOps>,
    pub nat: Arc<dyn NatOps>,
    pub dns_proxy: Arc<dyn DnsProxyOps>,
    pub ipv6pd: Arc<dyn Ipv6PdOps>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub tunnel: Arc<dyn TunnelFactory>,
    pub link_watch: Arc<dyn LinkWatcher>,
}
