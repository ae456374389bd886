use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::messaging::message::StreamId;
use crate::messaging::node_addr::NodeAddr;
use crate::nakack::digest::Digest;
use crate::nakack::nakack_config::NakAckConfig;
use crate::nakack::sender_table::SenderTable;

pub type SharedSenderTable = Arc<Mutex<SenderTable>>;

/// All per-stream tables of the local member. Each table is locked individually, the map itself
///  is only locked for looking tables up and for adding or removing them.
pub struct SenderTables {
    config: Arc<NakAckConfig>,
    tables: RwLock<FxHashMap<StreamId, SharedSenderTable>>,
}

impl SenderTables {
    pub fn new(config: Arc<NakAckConfig>) -> SenderTables {
        SenderTables {
            config,
            tables: Default::default(),
        }
    }

    pub async fn get(&self, stream: &StreamId) -> Option<SharedSenderTable> {
        self.tables.read().await
            .get(stream)
            .cloned()
    }

    /// Tables are created on demand when the first message of a stream is seen
    pub async fn get_or_create(&self, stream: StreamId, epoch: u64) -> SharedSenderTable {
        if let Some(table) = self.get(&stream).await {
            return table;
        }

        self.tables.write().await
            .entry(stream)
            .or_insert_with(|| {
                debug!("creating table for {:?} in epoch {}", stream, epoch);
                Arc::new(Mutex::new(SenderTable::new(&self.config, stream, epoch)))
            })
            .clone()
    }

    pub async fn all(&self) -> Vec<SharedSenderTable> {
        self.tables.read().await
            .values()
            .cloned()
            .collect()
    }

    pub async fn streams(&self) -> Vec<StreamId> {
        self.tables.read().await
            .keys()
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }

    /// Removes all tables of streams sent by the given member, and of point-to-point streams
    ///  to it. Returns the number of removed tables.
    pub async fn remove_member(&self, addr: &NodeAddr) -> usize {
        let mut tables = self.tables.write().await;
        let len_before = tables.len();
        tables.retain(|stream, _| stream.sender != *addr && stream.dest != Some(*addr));
        len_before - tables.len()
    }

    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }

    /// Starts the table of one of the local member's streams over in a new epoch
    pub async fn restart(&self, stream: StreamId, epoch: u64) {
        let table = self.get_or_create(stream, epoch).await;
        let mut table = table.lock().await;
        if table.epoch() < epoch {
            table.reset(epoch);
        }
    }

    pub async fn digest(&self) -> Digest {
        let mut digest = Digest::default();
        for table in self.all().await {
            let table = table.lock().await;
            digest.insert(table.stream(), table.digest_entry());
        }
        digest
    }

    /// Seeds the tables of other members' multicast streams from a digest received at join time.
    ///  Returns the tables that were modified: they may have messages that are ready for delivery.
    pub async fn merge_join_digest(&self, digest: &Digest) -> Vec<SharedSenderTable> {
        let mut modified = Vec::new();
        for (stream, entry) in digest.iter() {
            if stream.dest.is_some() || stream.sender == self.config.self_addr {
                continue;
            }

            let table = self.get_or_create(*stream, entry.epoch).await;
            if table.lock().await.merge_digest(entry) {
                debug!("seeded {:?} from join digest: {:?}", stream, entry);
                modified.push(table.clone());
            }
        }
        modified
    }

    /// Takes the epoch and the highest seqno of `from`'s point-to-point stream to the local
    ///  member from `from`'s own digest. Nothing is marked as delivered: the stream's sender
    ///  starts it over in a new epoch whenever the local member connects.
    pub async fn merge_point_to_point_entry(&self, from: NodeAddr, digest: &Digest) {
        let stream = StreamId::point_to_point(from, self.config.self_addr);
        let Some(entry) = digest.get(&stream) else {
            return;
        };

        let table = self.get_or_create(stream, entry.epoch).await;
        let mut table = table.lock().await;
        let prev_epoch = table.epoch();
        table.note_high_sent(entry.epoch, entry.high_received);
        if table.epoch() != prev_epoch {
            debug!("{:?} was restarted in epoch {}", stream, entry.epoch);
        }
    }
}
