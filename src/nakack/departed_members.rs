use rustc_hash::FxHashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::messaging::node_addr::NodeAddr;

#[derive(Debug, Clone, Copy)]
struct Departure {
    since: Instant,
    tables_removed: bool,
}

/// Members that left the view. Their messages are discarded, retransmission requests to them
///  stop, and their tables are removed after a grace period.
#[derive(Debug, Default)]
pub struct DepartedMembers {
    departed: RwLock<FxHashMap<NodeAddr, Departure>>,
}

impl DepartedMembers {
    pub fn new() -> DepartedMembers {
        Default::default()
    }

    pub fn mark_departed(&self, addr: NodeAddr, now: Instant) {
        if let Ok(mut departed) = self.departed.write() {
            departed.entry(addr)
                .or_insert(Departure {
                    since: now,
                    tables_removed: false,
                });
        }
    }

    /// a member that joins the view again is not considered departed any more
    pub fn mark_rejoined(&self, addr: &NodeAddr) {
        if let Ok(mut departed) = self.departed.write() {
            departed.remove(addr);
        }
    }

    pub fn contains(&self, addr: &NodeAddr) -> bool {
        self.departed.read()
            .map(|d| d.contains_key(addr))
            .unwrap_or_default()
    }

    /// Returns members that departed at least `grace_period` ago and whose tables were not
    ///  removed yet. They are marked as removed.
    pub fn take_expired(&self, grace_period: Duration, now: Instant) -> Vec<NodeAddr> {
        let Ok(mut departed) = self.departed.write() else {
            return Vec::new();
        };

        departed.iter_mut()
            .filter(|(_, d)| !d.tables_removed && now.saturating_duration_since(d.since) >= grace_period)
            .map(|(addr, d)| {
                d.tables_removed = true;
                *addr
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut departed) = self.departed.write() {
            departed.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::node::test_node_addr_from_number;

    #[test]
    fn test_departure_lifecycle() {
        let departed = DepartedMembers::new();
        let a = test_node_addr_from_number(1);
        let b = test_node_addr_from_number(2);
        let t0 = Instant::now();

        departed.mark_departed(a, t0);
        departed.mark_departed(b, t0 + Duration::from_secs(2));
        assert!(departed.contains(&a));

        // departing again does not restart the grace period
        departed.mark_departed(a, t0 + Duration::from_secs(3));

        let grace = Duration::from_secs(5);
        assert!(departed.take_expired(grace, t0 + Duration::from_secs(4)).is_empty());
        assert_eq!(departed.take_expired(grace, t0 + Duration::from_secs(5)), vec![a]);
        assert!(departed.take_expired(grace, t0 + Duration::from_secs(6)).is_empty());
        assert_eq!(departed.take_expired(grace, t0 + Duration::from_secs(7)), vec![b]);

        // removed tables don't make a member less departed
        assert!(departed.contains(&a));
        departed.mark_rejoined(&a);
        assert!(!departed.contains(&a));

        departed.clear();
        assert!(!departed.contains(&b));
    }
}
