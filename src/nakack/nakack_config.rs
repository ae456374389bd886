use anyhow::bail;
use std::str::FromStr;
use std::time::Duration;

use crate::messaging::message::DestinationClass;
use crate::messaging::node_addr::NodeAddr;

/// Selects how contiguous runs of ready messages are handed to the application
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeliveryPolicyKind {
    /// runs are delivered as a single batch call
    Batch,
    /// every message is delivered in a call of its own
    Unbatch,
}
impl FromStr for DeliveryPolicyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(DeliveryPolicyKind::Batch),
            "unbatch" => Ok(DeliveryPolicyKind::Unbatch),
            _ => bail!("invalid delivery policy '{}', expected 'batch' or 'unbatch'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NakAckConfig {
    pub self_addr: NodeAddr,

    pub multicast_policy: DeliveryPolicyKind,
    pub point_to_point_policy: DeliveryPolicyKind,
    /// if true, out-of-band messages are always delivered one by one, even if several of them
    ///  arrive together and the active policy is [DeliveryPolicyKind::Batch]
    pub skip_oob: bool,
    /// a batching policy groups runs of at least this size; a run of a single message is
    ///  always delivered as a single message
    pub min_batch_size: usize,

    pub retransmit_interval: Duration,
    /// backoff is measured in retransmission ticks
    pub retransmit_backoff_initial_ticks: u32,
    pub retransmit_backoff_max_ticks: u32,
    /// growth factor for the backoff, in eighths (i.e. 12 means 'times 1.5')
    pub retransmit_backoff_factor_eighths: u32,
    /// number of retransmission requests for a stream without progress before the stream's
    ///  sender is reported as suspect
    pub max_retransmit_attempts: u32,
    pub max_ranges_per_retransmit_request: usize,
    pub max_messages_per_retransmit_batch: usize,

    pub stability_interval: Duration,
    pub departed_member_grace_period: Duration,
    pub join_digest_timeout: Duration,

    pub profiling_enabled: bool,
}

impl NakAckConfig {
    pub fn new(self_addr: NodeAddr) -> NakAckConfig {
        NakAckConfig {
            self_addr,
            multicast_policy: DeliveryPolicyKind::Batch,
            point_to_point_policy: DeliveryPolicyKind::Batch,
            skip_oob: false,
            min_batch_size: 1,
            retransmit_interval: Duration::from_millis(40),
            retransmit_backoff_initial_ticks: 1,
            retransmit_backoff_max_ticks: 25,
            retransmit_backoff_factor_eighths: 12,
            max_retransmit_attempts: 50,
            max_ranges_per_retransmit_request: 100,
            max_messages_per_retransmit_batch: 64,
            stability_interval: Duration::from_millis(500),
            departed_member_grace_period: Duration::from_secs(5),
            join_digest_timeout: Duration::from_secs(2),
            profiling_enabled: false,
        }
    }

    pub fn policy_kind(&self, destination_class: DestinationClass) -> DeliveryPolicyKind {
        match destination_class {
            DestinationClass::Multicast => self.multicast_policy,
            DestinationClass::PointToPoint => self.point_to_point_policy,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_batch_size == 0 {
            bail!("min_batch_size must be at least 1");
        }
        if self.retransmit_interval.is_zero() {
            bail!("retransmit_interval must be positive");
        }
        if self.retransmit_backoff_initial_ticks == 0 {
            bail!("retransmit_backoff_initial_ticks must be at least 1");
        }
        if self.retransmit_backoff_max_ticks < self.retransmit_backoff_initial_ticks {
            bail!("retransmit_backoff_max_ticks must not be less than retransmit_backoff_initial_ticks");
        }
        if self.retransmit_backoff_factor_eighths < 8 {
            bail!("retransmit_backoff_factor_eighths must be at least 8, i.e. the backoff must not shrink");
        }
        if self.max_retransmit_attempts == 0 {
            bail!("max_retransmit_attempts must be at least 1");
        }
        if self.max_ranges_per_retransmit_request == 0 {
            bail!("max_ranges_per_retransmit_request must be at least 1");
        }
        if self.max_messages_per_retransmit_batch == 0 {
            bail!("max_messages_per_retransmit_batch must be at least 1");
        }
        if self.stability_interval.is_zero() {
            bail!("stability_interval must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("batch", Some(DeliveryPolicyKind::Batch))]
    #[case("unbatch", Some(DeliveryPolicyKind::Unbatch))]
    #[case(" Unbatch ", Some(DeliveryPolicyKind::Unbatch))]
    #[case("BATCH", Some(DeliveryPolicyKind::Batch))]
    #[case("", None)]
    #[case("batched", None)]
    fn test_parse_policy_kind(#[case] s: &str, #[case] expected: Option<DeliveryPolicyKind>) {
        assert_eq!(s.parse::<DeliveryPolicyKind>().ok(), expected);
    }

    #[test]
    fn test_defaults_are_valid() {
        NakAckConfig::new(NodeAddr::localhost(1)).validate().unwrap();
    }

    #[rstest]
    #[case::min_batch_size(|c: &mut NakAckConfig| c.min_batch_size = 0)]
    #[case::retransmit_interval(|c: &mut NakAckConfig| c.retransmit_interval = Duration::ZERO)]
    #[case::initial_ticks(|c: &mut NakAckConfig| c.retransmit_backoff_initial_ticks = 0)]
    #[case::max_ticks(|c: &mut NakAckConfig| c.retransmit_backoff_max_ticks = 0)]
    #[case::shrinking_backoff(|c: &mut NakAckConfig| c.retransmit_backoff_factor_eighths = 7)]
    #[case::attempts(|c: &mut NakAckConfig| c.max_retransmit_attempts = 0)]
    #[case::ranges(|c: &mut NakAckConfig| c.max_ranges_per_retransmit_request = 0)]
    #[case::batch(|c: &mut NakAckConfig| c.max_messages_per_retransmit_batch = 0)]
    #[case::stability_interval(|c: &mut NakAckConfig| c.stability_interval = Duration::ZERO)]
    fn test_validate_rejects(#[case] modify: fn(&mut NakAckConfig)) {
        let mut config = NakAckConfig::new(NodeAddr::localhost(1));
        modify(&mut config);
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case(DestinationClass::Multicast, DeliveryPolicyKind::Unbatch)]
    #[case(DestinationClass::PointToPoint, DeliveryPolicyKind::Batch)]
    fn test_policy_kind(#[case] destination_class: DestinationClass, #[case] expected: DeliveryPolicyKind) {
        let mut config = NakAckConfig::new(NodeAddr::localhost(1));
        config.multicast_policy = DeliveryPolicyKind::Unbatch;
        assert_eq!(config.policy_kind(destination_class), expected);
    }
}
