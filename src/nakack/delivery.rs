use std::sync::Arc;
use tracing::trace;

use crate::messaging::message::{Message, MessageBatch};
use crate::nakack::delivery_policy::DeliveryPolicies;
use crate::nakack::receiver::{Delivery, Receiver};
use crate::nakack::sender_table::AddOutcome;
use crate::nakack::sender_tables::{SenderTables, SharedSenderTable};
use crate::nakack::stats::NakAckStats;

/// Inserts messages into their stream's table and hands everything that becomes deliverable to
///  the application.
///
/// At most one task delivers a given table's messages at any time (see
///  [crate::nakack::sender_table::SenderTable::begin_delivery]), and the table is not locked
///  while the application handles a delivery. This keeps ordered delivery per stream without
///  blocking receive paths, and different streams are delivered concurrently.
pub struct DeliveryEngine {
    tables: Arc<SenderTables>,
    policies: DeliveryPolicies,
    receiver: Arc<dyn Receiver>,
    stats: Arc<NakAckStats>,
}

impl DeliveryEngine {
    pub fn new(tables: Arc<SenderTables>, policies: DeliveryPolicies, receiver: Arc<dyn Receiver>, stats: Arc<NakAckStats>) -> DeliveryEngine {
        DeliveryEngine {
            tables,
            policies,
            receiver,
            stats,
        }
    }

    pub async fn on_message(&self, msg: Message) {
        trace!("received {:?}", msg);

        let table = self.tables.get_or_create(msg.stream_id(), msg.epoch).await;
        let destination_class = msg.destination_class();
        let oob_copy = msg.is_oob().then(|| msg.clone());

        let outcome = table.lock().await.add(msg);
        if !self.count_added(outcome) {
            return;
        }

        if let (AddOutcome::Added { deliver_now: true }, Some(msg)) = (outcome, oob_copy) {
            self.deliver(self.policies.plan_oob(destination_class, vec![msg])).await;
        }
        self.deliver_ready(&table).await;
    }

    /// All messages of the batch are inserted under a single lock, so that closing several gaps
    ///  at once results in a single contiguous run for delivery
    pub async fn on_batch(&self, batch: MessageBatch) {
        trace!("received batch of {} messages for {:?}", batch.len(), batch.stream_id());

        let destination_class = batch.destination_class();
        let epoch = batch.iter()
            .map(|m| m.epoch)
            .max()
            .unwrap_or_default();
        let table = self.tables.get_or_create(batch.stream_id(), epoch).await;

        let mut oob = Vec::new();
        let mut any_added = false;
        {
            let mut table = table.lock().await;
            for msg in batch {
                let oob_copy = msg.is_oob().then(|| msg.clone());
                let outcome = table.add(msg);
                any_added |= self.count_added(outcome);
                if let (AddOutcome::Added { deliver_now: true }, Some(msg)) = (outcome, oob_copy) {
                    oob.push(msg);
                }
            }
        }

        if !oob.is_empty() {
            self.deliver(self.policies.plan_oob(destination_class, oob)).await;
        }
        if any_added {
            self.deliver_ready(&table).await;
        }
    }

    fn count_added(&self, outcome: AddOutcome) -> bool {
        match outcome {
            AddOutcome::Added { .. } => true,
            AddOutcome::Duplicate => {
                NakAckStats::inc(&self.stats.duplicates_discarded);
                false
            }
            AddOutcome::Stale => {
                NakAckStats::inc(&self.stats.stale_discarded);
                false
            }
        }
    }

    /// Delivers the table's contiguous runs, unless some other task is doing so already
    pub async fn deliver_ready(&self, table: &SharedSenderTable) {
        let mut first = true;
        loop {
            let (destination_class, run) = {
                let mut table = table.lock().await;
                if first {
                    if !table.begin_delivery() {
                        return;
                    }
                    first = false;
                }
                (table.stream().destination_class(), table.take_ready())
            };

            if run.is_empty() {
                return;
            }
            self.deliver(self.policies.plan_ordered(destination_class, run)).await;
        }
    }

    async fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match &delivery {
                Delivery::Single(_) => NakAckStats::inc(&self.stats.single_deliveries),
                Delivery::Batch(_) => NakAckStats::inc(&self.stats.batch_deliveries),
            }
            NakAckStats::add(&self.stats.messages_delivered, delivery.len() as u64);

            delivery.dispatch(self.receiver.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::{MessageFlags, StreamId};
    use crate::messaging::node_addr::NodeAddr;
    use crate::nakack::delivery_policy::{Batch, Unbatch};
    use crate::nakack::nakack_config::NakAckConfig;
    use crate::test_util::node::test_node_addr_from_number;
    use crate::test_util::receiver::RecordingReceiver;
    use bytes::Bytes;
    use std::time::Duration;

    fn myself() -> NodeAddr {
        test_node_addr_from_number(1)
    }

    fn sender() -> NodeAddr {
        test_node_addr_from_number(2)
    }

    fn msg(epoch: u64, seqno: u64, flags: MessageFlags) -> Message {
        Message {
            sender: sender(),
            dest: None,
            epoch,
            seqno,
            flags,
            payload: Bytes::from(format!("m{}", seqno)),
        }
    }

    fn engine(batch: bool) -> (DeliveryEngine, Arc<RecordingReceiver>, Arc<NakAckStats>) {
        let tables = Arc::new(SenderTables::new(Arc::new(NakAckConfig::new(myself()))));
        let policies = if batch {
            DeliveryPolicies::new(Arc::new(Batch { min_batch_size: 1 }), Arc::new(Batch { min_batch_size: 1 }), false)
        }
        else {
            DeliveryPolicies::new(Arc::new(Unbatch), Arc::new(Unbatch), false)
        };
        let receiver = Arc::new(RecordingReceiver::new());
        let stats = Arc::new(NakAckStats::default());
        (DeliveryEngine::new(tables, policies, receiver.clone(), stats.clone()), receiver, stats)
    }

    #[tokio::test]
    async fn test_ordered_with_gap() {
        let (engine, receiver, _) = engine(false);
        engine.on_message(msg(1, 1, MessageFlags::empty())).await;
        engine.on_message(msg(1, 3, MessageFlags::empty())).await;
        assert_eq!(receiver.seqnos_from(&StreamId::multicast(sender())).await, vec![1]);

        engine.on_message(msg(1, 2, MessageFlags::empty())).await;
        assert_eq!(receiver.seqnos_from(&StreamId::multicast(sender())).await, vec![1, 2, 3]);
        assert_eq!(receiver.num_single_calls().await, 3);
        assert_eq!(receiver.num_batch_calls().await, 0);
    }

    #[tokio::test]
    async fn test_batch_policy_groups_closed_gap() {
        let (engine, receiver, stats) = engine(true);
        for seqno in [2, 3, 4] {
            engine.on_message(msg(1, seqno, MessageFlags::empty())).await;
        }
        assert_eq!(receiver.num_messages().await, 0);

        engine.on_message(msg(1, 1, MessageFlags::empty())).await;
        assert_eq!(receiver.seqnos_from(&StreamId::multicast(sender())).await, vec![1, 2, 3, 4]);
        assert_eq!(receiver.batch_sizes().await, vec![4]);

        let stats = stats.snapshot();
        assert_eq!(stats.batch_deliveries, 1);
        assert_eq!(stats.messages_delivered, 4);
    }

    #[tokio::test]
    async fn test_oob_is_delivered_immediately_and_once() {
        let (engine, receiver, _) = engine(false);
        engine.on_message(msg(1, 2, MessageFlags::OOB)).await;
        assert_eq!(receiver.seqnos_from(&StreamId::multicast(sender())).await, vec![2]);

        engine.on_message(msg(1, 1, MessageFlags::empty())).await;
        engine.on_message(msg(1, 3, MessageFlags::empty())).await;
        assert_eq!(receiver.seqnos_from(&StreamId::multicast(sender())).await, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_duplicates_and_stale_are_discarded() {
        let (engine, receiver, stats) = engine(false);
        engine.on_message(msg(5, 1, MessageFlags::empty())).await;
        engine.on_message(msg(5, 1, MessageFlags::empty())).await;
        engine.on_message(msg(5, 1, MessageFlags::OOB)).await;
        engine.on_message(msg(4, 2, MessageFlags::empty())).await;

        assert_eq!(receiver.num_messages().await, 1);
        let stats = stats.snapshot();
        assert_eq!(stats.duplicates_discarded, 2);
        assert_eq!(stats.stale_discarded, 1);
    }

    #[tokio::test]
    async fn test_batch_closing_several_gaps() {
        let (engine, receiver, _) = engine(true);
        engine.on_message(msg(1, 1, MessageFlags::empty())).await;
        engine.on_message(msg(1, 5, MessageFlags::empty())).await;

        let retransmitted = MessageBatch::new(vec![
            msg(1, 2, MessageFlags::empty()),
            msg(1, 3, MessageFlags::OOB),
            msg(1, 4, MessageFlags::empty()),
        ]).unwrap();
        engine.on_batch(retransmitted).await;

        assert_eq!(receiver.seqnos_from(&StreamId::multicast(sender())).await, vec![1, 3, 2, 4, 5]);
        // 1 as a single message, the OOB message, then 2, 4, 5 as one run
        assert_eq!(receiver.num_single_calls().await, 2);
        assert_eq!(receiver.batch_sizes().await, vec![3]);
    }

    #[tokio::test]
    async fn test_oob_batch_grouping() {
        let (engine, receiver, _) = engine(true);
        let oob = MessageBatch::new((1..=3).map(|seqno| msg(1, seqno, MessageFlags::OOB)).collect()).unwrap();
        engine.on_batch(oob).await;

        assert_eq!(receiver.batch_sizes().await, vec![3]);
        assert_eq!(receiver.num_single_calls().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_deliver_in_order() {
        let (engine, receiver, _) = engine(true);
        let engine = Arc::new(engine);
        receiver.set_delivery_delay(Duration::from_millis(1)).await;

        let handles = (0..4u64)
            .map(|offs| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    for seqno in (1..=50u64).filter(|n| n % 4 == offs) {
                        engine.on_message(msg(1, seqno, MessageFlags::empty())).await;
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(receiver.seqnos_from(&StreamId::multicast(sender())).await, (1..=50).collect::<Vec<_>>());
    }
}
