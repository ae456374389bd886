//! Delivery policies decide how runs of ready messages are handed to the application: as one
//!  batch or as a sequence of single messages. Multicast and point-to-point traffic can use
//!  different policies.

use std::fmt::Debug;
use std::sync::Arc;
use tracing::error;

use crate::messaging::message::{DestinationClass, Message, MessageBatch};
use crate::nakack::nakack_config::{DeliveryPolicyKind, NakAckConfig};
use crate::nakack::receiver::Delivery;

pub trait DeliveryPolicy: Debug + Send + Sync {
    /// `run` contains messages of a single stream in delivery order
    fn plan(&self, run: Vec<Message>) -> Vec<Delivery>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unbatch;
impl DeliveryPolicy for Unbatch {
    fn plan(&self, run: Vec<Message>) -> Vec<Delivery> {
        run.into_iter()
            .map(Delivery::Single)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Batch {
    pub min_batch_size: usize,
}
impl DeliveryPolicy for Batch {
    fn plan(&self, run: Vec<Message>) -> Vec<Delivery> {
        if run.len() < 2 || run.len() < self.min_batch_size {
            return Unbatch.plan(run);
        }

        match MessageBatch::new(run) {
            Ok(batch) => vec![Delivery::Batch(batch)],
            Err(e) => {
                // runs are assembled from a single table, so this is a bug
                error!("inconsistent run of messages: {}", e);
                Vec::new()
            }
        }
    }
}

/// The policies in effect for both destination classes
#[derive(Debug, Clone)]
pub struct DeliveryPolicies {
    multicast: Arc<dyn DeliveryPolicy>,
    point_to_point: Arc<dyn DeliveryPolicy>,
    skip_oob: bool,
}

impl DeliveryPolicies {
    pub fn new(multicast: Arc<dyn DeliveryPolicy>, point_to_point: Arc<dyn DeliveryPolicy>, skip_oob: bool) -> DeliveryPolicies {
        DeliveryPolicies {
            multicast,
            point_to_point,
            skip_oob,
        }
    }

    pub fn from_config(config: &NakAckConfig) -> DeliveryPolicies {
        let policy = |kind: DeliveryPolicyKind| -> Arc<dyn DeliveryPolicy> {
            match kind {
                DeliveryPolicyKind::Batch => Arc::new(Batch { min_batch_size: config.min_batch_size }),
                DeliveryPolicyKind::Unbatch => Arc::new(Unbatch),
            }
        };

        DeliveryPolicies::new(
            policy(config.policy_kind(DestinationClass::Multicast)),
            policy(config.policy_kind(DestinationClass::PointToPoint)),
            config.skip_oob,
        )
    }

    pub fn for_class(&self, destination_class: DestinationClass) -> &dyn DeliveryPolicy {
        match destination_class {
            DestinationClass::Multicast => self.multicast.as_ref(),
            DestinationClass::PointToPoint => self.point_to_point.as_ref(),
        }
    }

    /// Plans the delivery of a contiguous run of ordered messages
    pub fn plan_ordered(&self, destination_class: DestinationClass, run: Vec<Message>) -> Vec<Delivery> {
        self.for_class(destination_class).plan(run)
    }

    /// Plans the delivery of out-of-band messages that arrived together
    pub fn plan_oob(&self, destination_class: DestinationClass, messages: Vec<Message>) -> Vec<Delivery> {
        if self.skip_oob {
            return Unbatch.plan(messages);
        }
        self.for_class(destination_class).plan(messages)
    }
}
