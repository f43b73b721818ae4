//! Link-up watcher (part of C2/C9's "wait for the peer's tun device to come
//! up before configuring addresses" requirement).
//!
//! Polls link state through `netavark::network::netlink::Socket` on a
//! background thread rather than subscribing to netlink multicast groups,
//! pushing the up transition to a channel the caller can block on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use netavark::network::netlink::{self, LinkID};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct LinkUpEvent {
    pub ifname: String,
}

pub trait LinkWatcher: Send + Sync {
    /// Start watching `ifname` for an `IFF_UP` transition. The event fires
    /// at most once per call; callers that need to watch again must call
    /// `watch` again.
    fn watch(&self, ifname: &str) -> Receiver<LinkUpEvent>;
    fn stop(&self, ifname: &str);
}

pub struct PollingLinkWatcher {
    poll_interval: Duration,
    stop_flags: std::sync::Mutex<std::collections::HashMap<String, Arc<AtomicBool>>>,
}

impl PollingLinkWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            stop_flags: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn is_up(ifname: &str) -> Result<bool> {
        const IFF_UP: u32 = 0x1;
        let mut socket = netlink::Socket::new().map_err(|e| Error::Netlink(e.to_string()))?;
        let link = socket
            .get_link(LinkID::Name(ifname.to_string()))
            .map_err(|e| Error::Netlink(e.to_string()))?;
        Ok(link.header.flags & IFF_UP != 0)
    }
}

impl Default for PollingLinkWatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

impl LinkWatcher for PollingLinkWatcher {
    fn watch(&self, ifname: &str) -> Receiver<LinkUpEvent> {
        let (tx, rx): (Sender<LinkUpEvent>, Receiver<LinkUpEvent>) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        self.stop_flags
            .lock()
            .unwrap()
            .insert(ifname.to_string(), stop.clone());

        let ifname = ifname.to_string();
        let interval = self.poll_interval;
        thread::spawn(move || {
            let mut was_up = false;
            while !stop.load(Ordering::Relaxed) {
                match Self::is_up(&ifname) {
                    Ok(up) if up && !was_up => {
                        let _ = tx.send(LinkUpEvent {
                            ifname: ifname.clone(),
                        });
                        return;
                    }
                    Ok(up) => was_up = up,
                    Err(err) => tracing::trace!(ifname = ifname.as_str(), "link poll error: {}", err),
                }
                thread::sleep(interval);
            }
        });

        rx
    }

    fn stop(&self, ifname: &str) {
        if let Some(flag) = self.stop_flags.lock().unwrap().remove(ifname) {
            flag.store(true, Ordering::Relaxed);
        }
    }
}
