//! Upstream service/network lookup: the tethering engine needs to find
//! which connected service currently owns the internet-facing default route
//! before it can tether on top of it, and needs to be able to reconnect that
//! service to roll back a failed bridged-AP enable.
//!
//! A full connection-manager service registry is out of this crate's scope;
//! here it's reduced to the handful of queries and actions the engine's
//! enable/disable/rollback paths actually need.

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct UpstreamService {
    pub service_index: usize,
    pub ifname: String,
    pub nameservers: Vec<String>,
}

pub trait ServiceRegistry: Send + Sync {
    /// The service currently providing the default route, if any.
    fn default_service(&self) -> Result<Option<UpstreamService>>;
    /// Look a service up by the interface it's bound to.
    fn service_for_ifname(&self, ifname: &str) -> Result<Option<UpstreamService>>;
    /// Reconnect a service at its original index, used to roll back a failed
    /// bridged-AP enable that disconnected the upstream service first.
    fn reconnect(&self, service_index: usize) -> Result<()>;
    fn disconnect(&self, service_index: usize) -> Result<()>;
}

/// Backed by a fixed table of known upstream services, registered at daemon
/// startup from config rather than discovered live (there is no full
/// service manager in this crate's scope). `disconnect`/`reconnect` just flip
/// a `connected` flag; anything that cares observes it through
/// `default_service`/`service_for_ifname`.
pub struct StaticServiceRegistry {
    services: std::sync::Mutex<std::collections::HashMap<usize, (UpstreamService, bool)>>,
    default_index: std::sync::Mutex<Option<usize>>,
}

impl StaticServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: std::sync::Mutex::new(std::collections::HashMap::new()),
            default_index: std::sync::Mutex::new(None),
        }
    }

    pub fn register(&self, service: UpstreamService, is_default: bool) {
        let index = service.service_index;
        self.services.lock().unwrap().insert(index, (service, true));
        if is_default {
            *self.default_index.lock().unwrap() = Some(index);
        }
    }
}

impl Default for StaticServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry for StaticServiceRegistry {
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
