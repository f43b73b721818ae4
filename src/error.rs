//! Typed error boundary for the core library: one variant per failure
//! domain, `#[from]` conversions from the platform collaborators' own error
//! types. Binaries (`tetherd`, `tetherctl`) convert this into `anyhow::Error`
//! at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bridge device {0} not found")]
    BridgeNotFound(String),

    #[error("upstream interface {0} not found")]
    UpstreamNotFound(String),

    #[error("upstream interface {0} has no connected service")]
    NoUpstreamService(String),

    #[error("upstream service for interface {0} has no network")]
    NoUpstreamNetwork(String),

    #[error("tethering is already enabled in {0} mode; disable it before switching modes")]
    ModeCrossingNotSupported(crate::types::TetherMode),

    #[error("private network {0} already exists")]
    AlreadyExists(String),

    #[error("private network {0} not found")]
    NotFound(String),

    #[error("ip pool exhausted")]
    PoolExhausted,

    #[error("dhcp server error: {0}")]
    Dhcp(String),

    #[error("nat error: {0}")]
    Nat(String),

    #[error("tunnel device error: {0}")]
    Tunnel(#[from] std::io::Error),

    #[error("netlink error: {0}")]
    Netlink(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
