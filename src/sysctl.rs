//! Kernel sysctl knobs needed for NAT-mode tethering to actually forward traffic.

use sysctl::Sysctl;

fn ensure_value(name: &str, value: &str) -> anyhow::Result<()> {
    tracing::debug!("setting sysctl {} to {}", name, value);
    let ctl = sysctl::Ctl::new(name)?;
    match ctl.value_string() {
        Ok(v) if v == value => Ok(()),
        _ => {
            ctl.set_value_string(value)?;
            Ok(())
        }
    }
}

/// Without this the kernel never routes packets between the bridge subnet
/// and the upstream route, regardless of how many NAT rules are installed.
pub fn enable_ipv4_forwarding() -> anyhow::Result<()> {
    ensure_value("net.ipv4.ip_forward", "1")
}

/// Don't hand bridged traffic to iptables/nftables a second time on the way
/// out; masquerade is applied once, on the bridge's NAT chain.
/// https://wiki.libvirt.org/Net.bridge.bridge-nf-call_and_sysctl.conf.html
pub fn disable_bridge_nf_call_iptables() -> anyhow::Result<()> {
    ensure_value("net.bridge.bridge-nf-call-iptables", "0")
}
