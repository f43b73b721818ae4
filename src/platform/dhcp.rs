//! DHCP server lifecycle: one `dnsmasq` instance per bridge, handing out
//! leases in the pool range reserved for that bridge.
//!
//! Shells out to `dnsmasq` via `std::process::Command`, forwarding
//! stdout/stderr to `tracing` on background threads, kill + wait on
//! teardown.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;

use crate::error::{Error, Result};
use crate::types::PoolRange;

pub trait DhcpOps: Send + Sync {
    /// Idempotent: starting a server that's already running for `bridge` is
    /// not an error. `dns` is advertised to clients via DHCP option 6;
    /// empty means no DNS is advertised.
    fn start(&self, bridge: &str, range: &PoolRange, lease_time: &str, dns: &[String]) -> Result<()>;
    fn stop(&self, bridge: &str) -> Result<()>;
}

struct Instance {
    child: Child,
}

pub struct RealDhcpOps {
    instances: Mutex<HashMap<String, Instance>>,
}

impl RealDhcpOps {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RealDhcpOps {
    fn default() -> Self {
        Self::new()
    }
}

impl DhcpOps for RealDhcpOps {
    fn start(&self, bridge: &str, range: &PoolRange, lease_time: &str, dns: &[String]) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        if instances.contains_key(bridge) {
            return Ok(());
        }

        let dhcp_range = format!(
            "{},{},{},{}",
            range.start_ip,
            range.end_ip,
            range.subnet_mask(),
            lease_time
        );

        let mut cmd = Command::new("dnsmasq");
        cmd.args([
            "--keep-in-foreground",
            "--no-daemon",
            "--bind-interfaces",
            "--except-interface=lo",
            "--no-resolv",
            "--no-hosts",
        ])
        .arg(format!("--interface={}", bridge))
        .arg(format!("--dhcp-range={}", dhcp_range))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        if !dns.is_empty() {
            cmd.arg(format!("--dhcp-option=6,{}", dns.join(",")));
        }

        tracing::debug!(bridge, dhcp_range, "starting dnsmasq");

        let mut child = cmd.spawn().map_err(|e| Error::Dhcp(e.to_string()))?;
        forward_output(child.stdout.take(), bridge.to_string(), false);
        forward_output(child.stderr.take(), bridge.to_string(), true);

        instances.insert(bridge.to_string(), Instance { child });
        Ok(())
    }

    fn stop(&self, bridge: &str) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        if let Some(mut instance) = instances.remove(bridge) {
            if let Err(err) = instance.child.kill() {
                tracing::warn!(bridge, "failed to kill dnsmasq: {}", err);
            }
            if let Err(err) = instance.child.wait() {
                tracing::warn!(bridge, "failed to wait for dnsmasq: {}", err);
            }
        }
        Ok(())
    }
}

fn forward_output(pipe: Option<impl std::io::Read + Send + 'static>, bridge: String, is_err: bool) {
    let Some(pipe) = pipe else { return };
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines().map_while(|l| l.ok()) {
            if is_err {
                tracing::warn!(bridge = bridge.as_str(), "dnsmasq: {}", line);
            } else {
                tracing::debug!(bridge = bridge.as_str(), "dnsmasq: {}", line);
            }
        }
    });
}
