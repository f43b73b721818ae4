//! Pool-reuse restart worker: when the IP pool reports that some subnet the
//! Engine believes it owns was claimed externally, the fix is a full
//! disable→enable cycle with the mode and upstream interface captured at the
//! original enable time (the `RestartTicket`).
//!
//! A dedicated background thread owns the receiving end of a
//! `crossbeam::channel` mailbox, so the pool's own poll thread never calls
//! back into the Engine directly and can't re-enter its lock.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::engine::TetheringEngine;
use crate::types::RestartTicket;

pub fn spawn_restart_worker(
    engine: Arc<TetheringEngine>,
    rx: Receiver<RestartTicket>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for ticket in rx.iter() {
            tracing::info!(
                mode = %ticket.mode,
                upstream = %ticket.upstream_ifname,
                "pool reused externally, restarting tether"
            );
            engine.disable(ticket.mode);
            if let Err(err) = engine.enable(ticket.mode, &ticket.upstream_ifname) {
                tracing::error!(
                    mode = %ticket.mode,
                    upstream = %ticket.upstream_ifname,
                    "failed to restart tether after pool reuse: {}",
                    err
                );
            }
        }
    })
}

pub fn restart_channel() -> (Sender<RestartTicket>, Receiver<RestartTicket>) {
    crossbeam::channel::unbounded()
}
