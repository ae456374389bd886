use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::messaging::node_addr::NodeAddr;
use crate::messaging::transport::loopback::FrameFilter;
use crate::messaging::wire::NakAckPdu;

/// A filter for [crate::messaging::transport::loopback::LoopbackNetwork] that discards the first
///  `copies` regular transmissions of a given message for every recipient. Retransmissions are
///  batched and therefore pass.
pub fn discard_first_copies(sender: NodeAddr, seqno: u64, copies: usize) -> Arc<FrameFilter> {
    let discarded: Mutex<FxHashMap<NodeAddr, usize>> = Default::default();

    Arc::new(move |from: NodeAddr, to: NodeAddr, frame: &[u8]| {
        if from != sender {
            return false;
        }
        let Ok(NakAckPdu::Data(msg)) = NakAckPdu::try_from_frame(frame) else {
            return false;
        };
        if msg.seqno != seqno {
            return false;
        }

        let Ok(mut discarded) = discarded.lock() else {
            return false;
        };
        let count = discarded.entry(to).or_default();
        if *count < copies {
            *count += 1;
            true
        }
        else {
            false
        }
    })
}

/// A filter that discards everything that is sent by a given member, e.g. to simulate a member
///  that crashed without the membership noticing yet
pub fn discard_all_from(sender: NodeAddr) -> Arc<FrameFilter> {
    Arc::new(move |from: NodeAddr, _: NodeAddr, _: &[u8]| from == sender)
}

/// Polls `condition` until it holds or the timeout expires, returning whether it held
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
