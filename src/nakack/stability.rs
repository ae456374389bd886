//! Stability: every member periodically multicasts a digest of its tables. Once every member of
//!  the current view reported having delivered a message, nobody will ask for it again, and all
//!  members purge it.
//!
//! A member's digest also contains the highest seqno of each of its own streams, which lets
//!  receivers notice messages that were lost at the end of a stream.
//!
//! Only the latest digest of each member is kept. Since `high_delivered` never decreases within
//!  an epoch, an outdated digest understates progress and can only delay purging, never make it
//!  unsafe. Digests of members that left the view are dropped, so a departed member never holds
//!  back stability.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::membership::{Membership, View};
use crate::messaging::message::StreamId;
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::transport::Transport;
use crate::messaging::wire::NakAckPdu;
use crate::nakack::digest::Digest;
use crate::nakack::nakack_config::NakAckConfig;
use crate::nakack::sender_tables::SenderTables;
use crate::nakack::stats::NakAckStats;
use crate::util::profiler::{Profiler, SAMPLES_PER_REPORT};

pub struct StabilityManager {
    config: Arc<NakAckConfig>,
    tables: Arc<SenderTables>,
    transport: Arc<dyn Transport>,
    membership: Arc<dyn Membership>,
    stats: Arc<NakAckStats>,
    digests: RwLock<FxHashMap<NodeAddr, Digest>>,
}

impl StabilityManager {
    pub fn new(
        config: Arc<NakAckConfig>,
        tables: Arc<SenderTables>,
        transport: Arc<dyn Transport>,
        membership: Arc<dyn Membership>,
        stats: Arc<NakAckStats>,
    ) -> StabilityManager {
        StabilityManager {
            config,
            tables,
            transport,
            membership,
            stats,
            digests: Default::default(),
        }
    }

    fn myself(&self) -> NodeAddr {
        self.config.self_addr
    }

    pub async fn on_digest(&self, from: NodeAddr, digest: Digest) {
        if !self.membership.current_view().contains(&from) {
            debug!("ignoring stability digest from {:?} which is not a member of the current view", from);
            return;
        }
        trace!("stability digest from {:?}: {:?}", from, digest);

        for (stream, entry) in digest.iter() {
            let relevant = stream.sender == from && match stream.dest {
                None => true,
                Some(dest) => dest == self.myself(),
            };
            if !relevant || entry.high_received == 0 {
                continue;
            }

            let table = self.tables.get_or_create(*stream, entry.epoch).await;
            if table.lock().await.note_high_sent(entry.epoch, entry.high_received) {
                debug!("{:?} reported messages up to #{} which were not received yet", stream, entry.high_received);
            }
        }

        self.digests.write().await.insert(from, digest);
    }

    /// drops the digests of members that left the view
    pub async fn forget(&self, departed: &[NodeAddr]) {
        let mut digests = self.digests.write().await;
        for addr in departed {
            if digests.remove(addr).is_some() {
                debug!("dropped stability digest of departed member {:?}", addr);
            }
        }
    }

    pub async fn clear(&self) {
        self.digests.write().await.clear();
    }

    /// One stability round: publish the local digest, then purge based on what all members
    ///  reported so far
    pub async fn tick(&self) {
        let digest = self.tables.digest().await;
        if let Err(e) = NakAckPdu::StabilityDigest(digest).send(self.transport.as_ref(), None).await {
            warn!("error sending stability digest: {}", e);
        }

        self.purge().await;
    }

    /// Purges everything that is stable, returning the number of purged messages
    pub async fn purge(&self) -> usize {
        let view = self.membership.current_view();
        let digests = self.digests.read().await;

        let mut num_purged = 0;
        for table in self.tables.all().await {
            let mut table = table.lock().await;
            let stream = table.stream();

            let stable = match stream.dest {
                // point-to-point messages to the local member are delivered only here
                Some(dest) if dest == self.myself() => Some(table.high_delivered()),
                Some(dest) => self.reported_high_delivered(&digests, dest, &stream, table.epoch()),
                None => self.stable_in_view(&view, &digests, &stream, table.epoch()),
            };

            if let Some(stable) = stable {
                num_purged += table.purge(stable);
            }
        }

        if num_purged > 0 {
            debug!("purged {} stable messages", num_purged);
            NakAckStats::add(&self.stats.messages_purged, num_purged as u64);
        }
        num_purged
    }

    fn reported_high_delivered(&self, digests: &FxHashMap<NodeAddr, Digest>, member: NodeAddr, stream: &StreamId, epoch: u64) -> Option<u64> {
        let entry = digests.get(&member)?
            .get(stream)?;
        if entry.epoch != epoch {
            return None;
        }
        Some(entry.high_delivered)
    }

    /// The highest seqno of a multicast stream that all other members of the view delivered, if
    ///  all of them reported on it. The local table's own `high_delivered` caps purging anyway.
    fn stable_in_view(&self, view: &View, digests: &FxHashMap<NodeAddr, Digest>, stream: &StreamId, epoch: u64) -> Option<u64> {
        let mut result = u64::MAX;
        for &member in view.members() {
            if member == self.myself() {
                continue;
            }
            result = result.min(self.reported_high_delivered(digests, member, stream, epoch)?);
        }
        Some(result)
    }
}

pub async fn run_stability(config: Arc<NakAckConfig>, stability: Arc<StabilityManager>) {
    let mut ticks = interval(config.stability_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut profiler = Profiler::new();
    profiler.enable(config.profiling_enabled);

    loop {
        ticks.tick().await;

        profiler.start();
        stability.tick().await;
        profiler.stop();

        if profiler.should_report(SAMPLES_PER_REPORT) {
            debug!("stability rounds: {}", profiler);
            profiler.reset();
        }
    }
}
