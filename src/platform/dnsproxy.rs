//! DNS proxy: forward DNS queries from tethered clients to whichever
//! nameservers the upstream network advertised, falling back to the
//! configured `fallback_nameservers` when the upstream offered none.
//!
//! No full recursive resolver here; just the nameserver-selection policy
//! plus a handle the engine can use to
//! point `dnsmasq --server=` at (dnsmasq itself proxies DNS as a side effect
//! of acting as the DHCP server, so this trait's real impl hands the chosen
//! servers back to `DhcpOps::start` rather than running a second process).

use crate::error::Result;

pub trait DnsProxyOps: Send + Sync {
    /// Picks the nameservers to advertise to tethered clients: the
    /// upstream-provided ones if there are any, otherwise the configured
    /// fallback list.
    fn select_nameservers(&self, upstream_nameservers: &[String]) -> Vec<String>;
    /// Record which nameservers are in effect for a given bridge, so status
    /// reporting can show them.
    fn set_active(&self, bridge: &str, nameservers: &[String]) -> Result<()>;
    fn clear_active(&self, bridge: &str) -> Result<()>;
}

pub struct RealDnsProxyOps {
    fallback: Vec<String>,
    active: std::sync::Mutex<std::collections::HashMap<String, Vec<String>>>,
}

impl RealDnsProxyOps {
    pub fn new(fallback: Vec<String>) -> Self {
        Self {
            fallback,
            active: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl DnsProxyOps for RealDnsProxyOps {
    fn select_nameservers(&self, upstream_nameservers: &[String]) -> Vec<String> {
        if upstream_nameservers.is_empty() {
            self.fallback.clone()
        } else {
            upstream_nameservers.to_vec()
        }
    }

    fn set_active(&self, bridge: &str, nameservers: &[String]) -> Result<()> {
        self.active
            .lock()
            .unwrap()
            .insert(bridge.to_string(), nameservers.to_vec());
        Ok(())
    }

    fn clear_active(&self, bridge: &str) -> Result<()> {
        self.active.lock().unwrap().remove(bridge);
        Ok(())
    }
}
