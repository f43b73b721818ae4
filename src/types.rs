//! Domain types decoupled from any wire format, shared by the engine, the
//! private network manager and every platform trait.

use std::net::Ipv4Addr;

/// Which of the two tethering topologies is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TetherMode {
    Nat,
    BridgedAp,
}

impl std::fmt::Display for TetherMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TetherMode::Nat => write!(f, "nat"),
            TetherMode::BridgedAp => write!(f, "bridged-ap"),
        }
    }
}

/// The three states of the engine's reference-counted enable/disable state
/// machine. Absence of an active mode is represented by `Option<TetherMode>`
/// everywhere else in this crate; this type exists mainly for status
/// reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Off,
    Nat,
    BridgedAp,
}

impl From<Option<TetherMode>> for EngineStatus {
    fn from(mode: Option<TetherMode>) -> Self {
        match mode {
            None => EngineStatus::Off,
            Some(TetherMode::Nat) => EngineStatus::Nat,
            Some(TetherMode::BridgedAp) => EngineStatus::BridgedAp,
        }
    }
}

/// A kernel network interface, identified by both name and index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub ifname: String,
    pub index: u32,
}

/// The reserved range of an IP pool slot, in the shape the engine and the
/// private network manager both need (gateway/broadcast/mask plus the
/// usable start/end of the range).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRange {
    pub gateway: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub prefix_len: u8,
    pub start_ip: Ipv4Addr,
    pub end_ip: Ipv4Addr,
}

impl PoolRange {
    pub fn subnet_mask(&self) -> Ipv4Addr {
        let bits = if self.prefix_len == 0 {
            0u32
        } else {
            u32::MAX << (32 - self.prefix_len)
        };
        Ipv4Addr::from(bits)
    }
}

/// `(mode, upstream_ifname)` captured at enable time, replayed into a
/// pool-reuse-triggered restart.
#[derive(Debug, Clone)]
pub struct RestartTicket {
    pub mode: TetherMode,
    pub upstream_ifname: String,
}

/// The reply a private-network request eventually produces, once link-up
/// fires and addressing completes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PrivateNetworkReply {
    pub path: String,
    pub server_ipv4: Ipv4Addr,
    pub peer_ipv4: Ipv4Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_dns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_dns: Option<String>,
    /// kept as a raw fd number for the HTTP surface; the real fd is owned by
    /// the `PrivateNetwork` entity and closed on teardown, not here.
    pub fd: i32,
}
