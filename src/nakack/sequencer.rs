//! Sequence numbers for the local member's outgoing streams.
//!
//! Sequence numbers start at 1 in every epoch. A new epoch is started on every connect, so
//!  receivers can tell a reconnected sender's messages apart from those of its previous
//!  incarnation: an epoch is strictly greater than all previous epochs of the same sender.
//!
//! A point-to-point stream can additionally be restarted on its own when its destination
//!  reconnects. The restarted stream gets an epoch of its own, again greater than all epochs
//!  handed out before.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::messaging::node_addr::NodeAddr;

#[derive(Debug, Default)]
struct PointToPointSeq {
    /// 0 while the stream uses the member's epoch
    epoch: u64,
    last_seqno: u64,
    /// the destination's epoch that the stream was last restarted for
    dest_epoch: u64,
}

#[derive(Debug, Default)]
pub struct Sequencer {
    epoch: AtomicU64,
    /// the highest epoch handed out so far, for the member or any point-to-point stream
    highest_epoch: AtomicU64,
    /// the last seqno that was assigned for multicast messages
    multicast: AtomicU64,
    point_to_point: RwLock<FxHashMap<NodeAddr, Arc<Mutex<PointToPointSeq>>>>,
}

impl Sequencer {
    pub fn new() -> Sequencer {
        Default::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn allocate_epoch(&self) -> u64 {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let prev = self.highest_epoch.fetch_max(now_millis, Ordering::AcqRel);
        if prev < now_millis {
            return now_millis;
        }
        self.highest_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Starts a new epoch, restarting all sequence spaces. This must not run concurrently with
    ///  [Sequencer::next_seqno], which the engine ensures by doing it while disconnected.
    pub fn new_epoch(&self) -> u64 {
        let epoch = self.allocate_epoch();

        self.multicast.store(0, Ordering::Release);
        match self.point_to_point.write() {
            Ok(mut p2p) => p2p.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        self.epoch.store(epoch, Ordering::Release);
        epoch
    }

    /// Restarts the point-to-point stream to `dest` in a new epoch, because `dest` reconnected in
    ///  `dest_epoch`. Returns the stream's new epoch, or `None` if the stream was restarted for
    ///  that incarnation of `dest` before.
    pub fn restart_point_to_point(&self, dest: NodeAddr, dest_epoch: u64) -> Option<u64> {
        let seq = self.point_to_point_seq(dest);
        let mut seq = seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if dest_epoch <= seq.dest_epoch {
            return None;
        }

        let epoch = self.allocate_epoch();
        *seq = PointToPointSeq {
            epoch,
            last_seqno: 0,
            dest_epoch,
        };
        Some(epoch)
    }

    /// Returns the stream's epoch and the next seqno for the given destination (`None` for
    ///  multicast). Seqnos are consecutive without gaps, even under concurrent calls.
    pub fn next_seqno(&self, dest: Option<NodeAddr>) -> (u64, u64) {
        match dest {
            None => (self.epoch(), self.multicast.fetch_add(1, Ordering::AcqRel) + 1),
            Some(dest) => {
                let seq = self.point_to_point_seq(dest);
                let mut seq = seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                seq.last_seqno += 1;
                let epoch = if seq.epoch == 0 { self.epoch() } else { seq.epoch };
                let seqno = seq.last_seqno;
                (epoch, seqno)
            }
        }
    }

    fn point_to_point_seq(&self, dest: NodeAddr) -> Arc<Mutex<PointToPointSeq>> {
        if let Ok(p2p) = self.point_to_point.read() {
            if let Some(seq) = p2p.get(&dest) {
                return seq.clone();
            }
        }

        match self.point_to_point.write() {
            Ok(mut p2p) => p2p.entry(dest)
                .or_default()
                .clone(),
            Err(poisoned) => poisoned.into_inner()
                .entry(dest)
                .or_default()
                .clone(),
        }
    }
}
