use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::messaging::message::{Message, MessageBatch, StreamId};
use crate::nakack::receiver::{Delivery, Receiver};

/// A [Receiver] that records every delivery call, for asserting on both the delivered messages
///  and the shape of delivery (single messages vs. batches)
#[derive(Debug, Default)]
pub struct RecordingReceiver {
    deliveries: RwLock<Vec<Delivery>>,
    delivery_delay: RwLock<Option<Duration>>,
}

impl RecordingReceiver {
    pub fn new() -> RecordingReceiver {
        Default::default()
    }

    /// simulates an application that takes some time to handle each delivery
    pub async fn set_delivery_delay(&self, delay: Duration) {
        *self.delivery_delay.write().await = Some(delay);
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.read().await.clone()
    }

    /// all delivered messages, in delivery order
    pub async fn messages(&self) -> Vec<Message> {
        self.deliveries.read().await
            .iter()
            .flat_map(|d| match d {
                Delivery::Single(msg) => vec![msg.clone()],
                Delivery::Batch(batch) => batch.messages().to_vec(),
            })
            .collect()
    }

    pub async fn messages_from(&self, stream: &StreamId) -> Vec<Message> {
        self.messages().await
            .into_iter()
            .filter(|m| m.stream_id() == *stream)
            .collect()
    }

    pub async fn seqnos_from(&self, stream: &StreamId) -> Vec<u64> {
        self.messages_from(stream).await
            .iter()
            .map(|m| m.seqno)
            .collect()
    }

    pub async fn payloads_from(&self, stream: &StreamId) -> Vec<Bytes> {
        self.messages_from(stream).await
            .into_iter()
            .map(|m| m.payload)
            .collect()
    }

    pub async fn num_messages(&self) -> usize {
        self.deliveries.read().await
            .iter()
            .map(|d| d.len())
            .sum()
    }

    pub async fn num_single_calls(&self) -> usize {
        self.deliveries.read().await
            .iter()
            .filter(|d| matches!(d, Delivery::Single(_)))
            .count()
    }

    pub async fn num_batch_calls(&self) -> usize {
        self.batch_sizes().await.len()
    }

    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.deliveries.read().await
            .iter()
            .filter_map(|d| match d {
                Delivery::Batch(batch) => Some(batch.len()),
                Delivery::Single(_) => None,
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.deliveries.write().await.clear();
    }

    async fn record(&self, delivery: Delivery) {
        let delay = *self.delivery_delay.read().await;
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        self.deliveries.write().await.push(delivery);
    }
}

#[async_trait]
impl Receiver for RecordingReceiver {
    async fn on_message(&self, msg: Message) {
        self.record(Delivery::Single(msg)).await;
    }

    async fn on_batch(&self, batch: MessageBatch) {
        self.record(Delivery::Batch(batch)).await;
    }
}
