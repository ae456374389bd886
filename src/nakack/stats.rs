use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of the engine's activity. They are updated without synchronizing with each other, so
///  a snapshot is not necessarily consistent across counters.
#[derive(Debug, Default)]
pub struct NakAckStats {
    pub messages_sent: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub single_deliveries: AtomicU64,
    pub batch_deliveries: AtomicU64,
    pub duplicates_discarded: AtomicU64,
    pub stale_discarded: AtomicU64,
    pub retransmit_requests_sent: AtomicU64,
    pub retransmit_requests_received: AtomicU64,
    pub messages_retransmitted: AtomicU64,
    pub messages_purged: AtomicU64,
    pub unrecoverable_gaps: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct NakAckStatsSnapshot {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub single_deliveries: u64,
    pub batch_deliveries: u64,
    pub duplicates_discarded: u64,
    pub stale_discarded: u64,
    pub retransmit_requests_sent: u64,
    pub retransmit_requests_received: u64,
    pub messages_retransmitted: u64,
    pub messages_purged: u64,
    pub unrecoverable_gaps: u64,
}

impl NakAckStats {
    pub fn inc(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NakAckStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);

        NakAckStatsSnapshot {
            messages_sent: get(&self.messages_sent),
            messages_delivered: get(&self.messages_delivered),
            single_deliveries: get(&self.single_deliveries),
            batch_deliveries: get(&self.batch_deliveries),
            duplicates_discarded: get(&self.duplicates_discarded),
            stale_discarded: get(&self.stale_discarded),
            retransmit_requests_sent: get(&self.retransmit_requests_sent),
            retransmit_requests_received: get(&self.retransmit_requests_received),
            messages_retransmitted: get(&self.messages_retransmitted),
            messages_purged: get(&self.messages_purged),
            unrecoverable_gaps: get(&self.unrecoverable_gaps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = NakAckStats::default();
        NakAckStats::inc(&stats.messages_sent);
        NakAckStats::add(&stats.messages_delivered, 5);
        NakAckStats::inc(&stats.batch_deliveries);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.messages_delivered, 5);
        assert_eq!(snapshot.batch_deliveries, 1);
        assert_eq!(snapshot.single_deliveries, 0);
    }
}
