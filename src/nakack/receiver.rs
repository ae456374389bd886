use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::messaging::message::{Message, MessageBatch};

/// The application's handler for delivered messages. Whether a message arrives through
///  [Receiver::on_message] or as part of a batch through [Receiver::on_batch] is decided by the
///  active delivery policy, never by the application.
///
/// Delivery calls for the same stream never overlap, so an implementation may block a stream's
///  delivery by taking its time. Calls for different streams can happen concurrently.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Receiver: Send + Sync + 'static {
    async fn on_message(&self, msg: Message);

    /// The default implementation unwraps the batch
    async fn on_batch(&self, batch: MessageBatch) {
        for msg in batch {
            self.on_message(msg).await;
        }
    }
}

/// A unit of delivery to the application, as produced by a delivery policy
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Delivery {
    Single(Message),
    Batch(MessageBatch),
}
impl Delivery {
    pub fn len(&self) -> usize {
        match self {
            Delivery::Single(_) => 1,
            Delivery::Batch(batch) => batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn dispatch(self, receiver: &dyn Receiver) {
        match self {
            Delivery::Single(msg) => receiver.on_message(msg).await,
            Delivery::Batch(batch) => receiver.on_batch(batch).await,
        }
    }
}
