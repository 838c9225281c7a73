//! Host discovery and bookkeeping. Owns the three disjoint host sets
//! (`available`, `assigned` lives in the driver, `blacklisted`) and the
//! per-host eviction signal.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use log::{debug, info};
use parking_lot::Mutex;

use crate::error::DriverResult;
use crate::event::HostEvent;

/// A host reported by discovery: a name and a slot capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub slots: u32,
}

/// Contract for the injected discovery source. Must be idempotent and free
/// of side effects visible to the driver; may be called concurrently only
/// by the host-manager's own polling task. Order is the discovery order the
/// Assigner and reconfiguration logic rely on when appending newly found
/// hosts.
pub trait Discovery: Send + Sync {
    fn find_available_hosts_and_slots(&self) -> DriverResult<IndexMap<String, u32>>;
}

struct State {
    /// Last published available set (host -> slots) in discovery order,
    /// already blacklist-filtered.
    available: IndexMap<String, u32>,
    blacklisted: HashSet<String>,
    host_events: HashMap<String, HostEvent>,
}

pub struct HostManager<D> {
    discovery: D,
    state: Mutex<State>,
}

impl<D: Discovery> HostManager<D> {
    pub fn new(discovery: D) -> Self {
        HostManager {
            discovery,
            state: Mutex::new(State {
                available: IndexMap::new(),
                blacklisted: HashSet::new(),
                host_events: HashMap::new(),
            }),
        }
    }

    /// Queries discovery and republishes the available set. Returns `true`
    /// iff the effective (blacklist-filtered) set differs from the previous
    /// publication. Fires the host-change event for every host that left.
    pub fn update_available_hosts(&self) -> DriverResult<bool> {
        let reported = self.discovery.find_available_hosts_and_slots()?;

        let mut state = self.state.lock();
        let effective: IndexMap<String, u32> = reported
            .into_iter()
            .filter(|(host, _)| !state.blacklisted.contains(host))
            .collect();

        if effective == state.available {
            return Ok(false);
        }

        let left: Vec<String> = state
            .available
            .keys()
            .filter(|host| !effective.contains_key(*host))
            .cloned()
            .collect();

        debug!(
            "available hosts changed: {} -> {} ({} left)",
            state.available.len(),
            effective.len(),
            left.len()
        );

        state.available = effective;
        for host in left {
            if let Some(event) = state.host_events.get(&host) {
                event.set();
            }
        }

        Ok(true)
    }

    pub fn count_available_slots(&self) -> u32 {
        self.state.lock().available.values().sum()
    }

    /// Idempotent. Also fires the host's change event, since blacklisting
    /// is itself an eviction from the caller's perspective.
    pub fn blacklist(&self, host: &str) {
        let mut state = self.state.lock();
        if state.blacklisted.insert(host.to_string()) {
            info!("blacklisting host {host}");
            state.available.shift_remove(host);
            if let Some(event) = state.host_events.get(host) {
                event.set();
            }
        }
    }

    pub fn is_blacklisted(&self, host: &str) -> bool {
        self.state.lock().blacklisted.contains(host)
    }

    /// Retains only entries still in `available \ blacklisted`, preserving order.
    pub fn filter_available_hosts(&self, hosts: &[String]) -> Vec<String> {
        let state = self.state.lock();
        hosts
            .iter()
            .filter(|host| state.available.contains_key(host.as_str()))
            .cloned()
            .collect()
    }

    pub fn get_slots(&self, host: &str) -> Option<u32> {
        self.state.lock().available.get(host).copied()
    }

    /// The current available set, in discovery order.
    pub fn available_hosts(&self) -> Vec<Host> {
        self.state
            .lock()
            .available
            .iter()
            .map(|(name, slots)| Host {
                name: name.clone(),
                slots: *slots,
            })
            .collect()
    }

    /// Returns the per-host event, creating it on first access.
    pub fn get_host_event(&self, host: &str) -> HostEvent {
        let mut state = self.state.lock();
        state
            .host_events
            .entry(host.to_string())
            .or_insert_with(HostEvent::new)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeDiscovery(StdMutex<IndexMap<String, u32>>);

    impl Discovery for FakeDiscovery {
        fn find_available_hosts_and_slots(&self) -> DriverResult<IndexMap<String, u32>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn hosts(pairs: &[(&str, u32)]) -> IndexMap<String, u32> {
        pairs.iter().map(|(h, s)| (h.to_string(), *s)).collect()
    }

    #[test]
    fn update_reports_change_then_stabilizes() {
        let discovery = FakeDiscovery(StdMutex::new(hosts(&[("h1", 2), ("h2", 2)])));
        let manager = HostManager::new(discovery);

        assert!(manager.update_available_hosts().unwrap());
        assert!(!manager.update_available_hosts().unwrap());
        assert_eq!(manager.count_available_slots(), 4);
    }

    #[test]
    fn blacklist_is_sticky_and_excludes_from_available() {
        let discovery = FakeDiscovery(StdMutex::new(hosts(&[("h1", 2), ("h2", 2)])));
        let manager = HostManager::new(discovery);
        manager.update_available_hosts().unwrap();

        manager.blacklist("h1");
        manager.blacklist("h1");
        assert!(manager.is_blacklisted("h1"));
        assert_eq!(manager.count_available_slots(), 2);

        *manager.discovery.0.lock().unwrap() = hosts(&[("h1", 2), ("h2", 2), ("h3", 2)]);
        manager.update_available_hosts().unwrap();
        assert_eq!(manager.count_available_slots(), 4);
    }

    #[test]
    fn leaving_host_fires_its_event() {
        let discovery = FakeDiscovery(StdMutex::new(hosts(&[("h1", 2), ("h2", 2)])));
        let manager = HostManager::new(discovery);
        manager.update_available_hosts().unwrap();

        let event = manager.get_host_event("h1");
        assert!(!event.is_set());

        *manager.discovery.0.lock().unwrap() = hosts(&[("h2", 2)]);
        manager.update_available_hosts().unwrap();
        assert!(event.is_set());
    }

    #[test]
    fn filter_preserves_order_and_drops_unavailable() {
        let discovery = FakeDiscovery(StdMutex::new(hosts(&[("h1", 2), ("h3", 2)])));
        let manager = HostManager::new(discovery);
        manager.update_available_hosts().unwrap();

        let filtered = manager.filter_available_hosts(&[
            "h1".to_string(),
            "h2".to_string(),
            "h3".to_string(),
        ]);
        assert_eq!(filtered, vec!["h1".to_string(), "h3".to_string()]);
    }

    #[test]
    fn available_hosts_preserves_discovery_order() {
        let discovery = FakeDiscovery(StdMutex::new(hosts(&[("h3", 1), ("h1", 2)])));
        let manager = HostManager::new(discovery);
        manager.update_available_hosts().unwrap();

        let names: Vec<String> = manager.available_hosts().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["h3".to_string(), "h1".to_string()]);
    }
}
