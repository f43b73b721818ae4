//! Tethering core: the platform-agnostic engine behind `tetherd`.
//!
//! `tetherd` owns the HTTP control surface and process wiring; everything in
//! this crate is transport-agnostic so it can be unit tested against the
//! mocks in `platform::mocks` without a real network namespace.

pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
mod periodic;
pub mod platform;
pub mod private_network;
pub mod restart;
pub mod sysctl;
pub mod types;
pub mod wire;

pub use config::Config;
pub use engine::TetheringEngine;
pub use error::{Error, Result};
pub use platform::Platform;
pub use private_network::PrivateNetworkManager;
pub use types::{Device, EngineStatus, PoolRange, PrivateNetworkReply, RestartTicket, TetherMode};
