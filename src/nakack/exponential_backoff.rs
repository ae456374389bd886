use std::cmp::{max, min};

use crate::nakack::nakack_config::NakAckConfig;

/// Decides on which retransmission ticks a retransmit request for a stream is actually sent.
///
/// The number of ticks between requests starts at a configured initial threshold and grows by a
///  factor after each request, up to a maximum. Any progress on the stream resets it.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    counter: u32,
    send_threshold: u32,

    config_initial_threshold: u32,
    config_max_threshold: u32,
    config_threshold_factor_eighths: u32,
}

impl ExponentialBackoff {
    pub fn new(config: &NakAckConfig) -> Self {
        let result = ExponentialBackoff {
            counter: 0,
            send_threshold: config.retransmit_backoff_initial_ticks,
            config_initial_threshold: config.retransmit_backoff_initial_ticks,
            config_max_threshold: config.retransmit_backoff_max_ticks,
            config_threshold_factor_eighths: config.retransmit_backoff_factor_eighths,
        };

        assert!(result.config_threshold_factor_eighths >= 8);

        result
    }

    pub fn current_threshold(&self) -> u32 {
        self.send_threshold
    }

    /// `progress` means that messages arrived for the stream since the previous tick
    #[must_use]
    pub fn should_send(&mut self, progress: bool) -> bool {
        if progress {
            self.counter = 0;
            self.send_threshold = self.config_initial_threshold;
            return true;
        }

        self.counter += 1;
        if self.counter < self.send_threshold {
            return false;
        }

        self.counter = 0;
        let grown = ((self.send_threshold as u64 * self.config_threshold_factor_eighths as u64) >> 3) as u32;
        // small thresholds would never grow with factors below 2
        let grown = if self.config_threshold_factor_eighths > 8 {
            max(grown, self.send_threshold + 1)
        }
        else {
            grown
        };
        self.send_threshold = min(grown, self.config_max_threshold);
        true
    }
}
