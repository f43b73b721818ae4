//! Owner-liveness tracking for private networks: each owner renews a lease
//! over HTTP, and anything that misses its deadline gets torn down.
//!
//! Built on `periodic.rs`'s `MinInstantHeap`, reused as-is to always know
//! the next deadline without re-scanning every owner on every tick.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::periodic::{MinInstantEntry, MinInstantHeap};

/// Tracks a liveness deadline per owner id. `tetherd`'s HTTP handlers call
/// `touch` on every successful request carrying an `owner_id`; a background
/// reaper thread (spawned by the caller, see `Reaper::spawn`) calls
/// `expired` periodically and asks the `PrivateNetworkManager` to remove
/// anything that comes back.
pub struct OwnerLiveness {
    timeout: Duration,
    state: Mutex<State>,
}

struct State {
    deadlines: HashMap<String, Instant>,
    heap: MinInstantHeap<String>,
}

impl OwnerLiveness {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(State {
                deadlines: HashMap::new(),
                heap: MinInstantHeap::new(),
            }),
        }
    }

    /// Refresh (or start tracking) `owner`'s deadline.
    pub fn touch(&self, owner: &str) {
        let mut state = self.state.lock().unwrap();
        let deadline = Instant::now() + self.timeout;
        state.deadlines.insert(owner.to_string(), deadline);
        state.heap.push(MinInstantEntry {
            timestamp: deadline,
            task: owner.to_string(),
        });
    }

    pub fn forget(&self, owner: &str) {
        self.state.lock().unwrap().deadlines.remove(owner);
    }

    /// Pops every owner whose *current* deadline has passed. Stale heap
    /// entries (superseded by a later `touch`) are discarded silently.
    pub fn expired(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some(entry) = state.heap.peek() {
            if entry.timestamp > now {
                break;
            }
            let entry = state.heap.pop().unwrap();
            let owner = entry.task;
            match state.deadlines.get(&owner) {
                Some(current) if *current <= now => {
                    state.deadlines.remove(&owner);
                    expired.push(owner);
                }
                _ => {
                    // superseded by a later touch, or already reaped.
                }
            }
        }
        expired
    }
}

/// Spawns the background thread that periodically reaps expired owners,
/// calling `on_expired` for each.
pub fn spawn_reaper(
    liveness: std::sync::Arc<OwnerLiveness>,
    poll_interval: Duration,
    on_expired: impl Fn(&str) + Send + 'static,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        std::thread::sleep(poll_interval);
        for owner in liveness.expired() {
            on_expired(&owner);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_timeout() {
        let liveness = OwnerLiveness::new(Duration::from_millis(10));
        liveness.touch("caller-1");
        assert!(liveness.expired().is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(liveness.expired(), vec!["caller-1".to_string()]);
        assert!(liveness.expired().is_empty());
    }

    #[test]
    fn repeated_touch_supersedes_stale_entry() {
        let liveness = OwnerLiveness::new(Duration::from_millis(15));
        liveness.touch("caller-1");
        std::thread::sleep(Duration::from_millis(8));
        liveness.touch("caller-1");
        std::thread::sleep(Duration::from_millis(10));
        assert!(liveness.expired().is_empty());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(liveness.expired(), vec!["caller-1".to_string()]);
    }
}
