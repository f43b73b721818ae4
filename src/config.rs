//! TOML configuration loader for `tetherd`.

use std::path::Path;

use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tetherd/config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge_name: String,
    pub pool_base_network: Ipv4Net,
    pub pool_subnet_prefix: u8,
    pub dhcp_lease_time: String,
    pub fallback_nameservers: Vec<String>,
    pub heartbeat_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_name: "tether".to_string(),
            pool_base_network: "192.168.0.0/16".parse().unwrap(),
            pool_subnet_prefix: 24,
            dhcp_lease_time: "24h".to_string(),
            fallback_nameservers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            heartbeat_timeout_secs: 60,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))
    }

    /// Falls back to built-in defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn dhcp_lease_duration(&self) -> Result<std::time::Duration> {
        humantime::parse_duration(&self.dhcp_lease_time)
            .map_err(|e| Error::Config(format!("invalid dhcp_lease_time {:?}: {}", self.dhcp_lease_time, e)))
    }

    pub fn fallback_dns_pair(&self) -> (Option<String>, Option<String>) {
        let mut it = self.fallback_nameservers.iter();
        (it.next().cloned(), it.next().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert!(cfg.pool_subnet_prefix >= cfg.pool_base_network.prefix_len());
        assert!(cfg.dhcp_lease_duration().is_ok());
    }

    #[test]
    fn parses_minimal_toml() {
        let raw = r#"
            bridge_name = "tether0"
            pool_base_network = "10.42.0.0/16"
            pool_subnet_prefix = 24
            dhcp_lease_time = "12h"
            fallback_nameservers = ["1.1.1.1"]
            heartbeat_timeout_secs = 30
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.bridge_name, "tether0");
        assert_eq!(cfg.fallback_nameservers, vec!["1.1.1.1".to_string()]);
    }
}
