//! NAT masquerade rules: one MASQUERADE rule per (upstream interface,
//! source subnet) pair, refcounted so two tether instances sharing an
//! upstream and subnet don't double-apply or prematurely tear down the
//! rule.
//!
//! Shells out to `iptables -I`/`-D`, checking exit status and bailing with
//! stderr on failure.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

pub trait NatOps: Send + Sync {
    /// Idempotent per distinct `(upstream_ifname, ip/prefix_len)`: refcounted
    /// internally so repeated enables on the same scope only install the
    /// rule once. `ip` need only fall within the intended subnet; the real
    /// implementation derives the network address from `ip`/`prefix_len`
    /// itself and scopes the rule to it with `-s`.
    fn masquerade_enable(&self, upstream_ifname: &str, ip: Ipv4Addr, prefix_len: u8) -> Result<()>;
    fn masquerade_disable(&self, upstream_ifname: &str, ip: Ipv4Addr, prefix_len: u8) -> Result<()>;
}

pub struct RealNatOps {
    refcounts: Mutex<HashMap<(String, String), usize>>,
}

impl RealNatOps {
    pub fn new() -> Self {
        Self {
            refcounts: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RealNatOps {
    fn default() -> Self {
        Self::new()
    }
}

fn execute(args: &[&str]) -> Result<()> {
    tracing::debug!("running: iptables {}", args.join(" "));
    let output = Command::new("iptables")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::Nat(e.to_string()))?;
    if !output.status.success() {
        return Err(Error::Nat(format!(
            "iptables {}: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn source_subnet(ip: Ipv4Addr, prefix_len: u8) -> Result<String> {
    Ok(Ipv4Net::new(ip, prefix_len).map_err(|e| Error::Nat(e.to_string()))?.trunc().to_string())
}

impl NatOps for RealNatOps {
    fn masquerade_enable(&self, upstream_ifname: &str, ip: Ipv4Addr, prefix_len: u8) -> Result<()> {
        let source = source_subnet(ip, prefix_len)?;
        let key = (upstream_ifname.to_string(), source.clone());
        let mut refcounts = self.refcounts.lock().unwrap();
        let count = refcounts.entry(key).or_insert(0);
        if *count == 0 {
            execute(&[
                "-t",
                "nat",
                "-A",
                "POSTROUTING",
                "-s",
                &source,
                "-o",
                upstream_ifname,
                "-j",
                "MASQUERADE",
            ])?;
        }
        *count += 1;
        Ok(())
    }

    fn masquerade_disable(&self, upstream_ifname: &str, ip: Ipv4Addr, prefix_len: u8) -> Result<()> {
        let source = source_subnet(ip, prefix_len)?;
        let key = (upstream_ifname.to_string(), source.clone());
        let mut refcounts = self.refcounts.lock().unwrap();
        let Some(count) = refcounts.get_mut(&key) else {
            return Ok(());
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            refcounts.remove(&key);
            execute(&[
                "-t",
                "nat",
                "-D",
                "POSTROUTING",
                "-s",
                &source,
                "-o",
                upstream_ifname,
                "-j",
                "MASQUERADE",
            ])?;
        }
        Ok(())
    }
}
