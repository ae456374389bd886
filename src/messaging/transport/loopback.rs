//! An in-process transport connecting any number of members through channels. It is meant for
//!  tests and demos, and it allows dropping frames selectively to simulate an unreliable network.

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::messaging::node_addr::NodeAddr;
use crate::messaging::transport::{FrameHandler, Transport, TransportError};

pub const MAX_FRAME_SIZE: usize = 1024*1024;

/// A filter is called for every frame and every recipient (`from`, `to`, frame). Returning
///  `true` drops the frame for that recipient.
pub type FrameFilter = dyn Fn(NodeAddr, NodeAddr, &[u8]) -> bool + Send + Sync;

type FrameSender = mpsc::UnboundedSender<(NodeAddr, Bytes)>;

#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: RwLock<FxHashMap<NodeAddr, FrameSender>>,
    filter: RwLock<Option<Arc<FrameFilter>>>,
}
impl Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoopbackNetwork{{{} endpoints}}", self.endpoints.read().map(|e| e.len()).unwrap_or_default())
    }
}

impl LoopbackNetwork {
    pub fn new() -> Arc<LoopbackNetwork> {
        Arc::new(LoopbackNetwork::default())
    }

    pub fn transport(self: &Arc<Self>, myself: NodeAddr) -> Arc<LoopbackTransport> {
        let (shutdown, _) = watch::channel(0u64);
        Arc::new(LoopbackTransport {
            network: self.clone(),
            myself,
            shutdown,
            fail_sends: AtomicBool::new(false),
        })
    }

    pub fn set_filter(&self, filter: Option<Arc<FrameFilter>>) {
        if let Ok(mut f) = self.filter.write() {
            *f = filter;
        }
    }

    pub fn attached_endpoints(&self) -> Vec<NodeAddr> {
        self.endpoints.read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn attach(&self, addr: NodeAddr, sender: FrameSender) {
        if let Ok(mut endpoints) = self.endpoints.write() {
            endpoints.insert(addr, sender);
        }
    }

    fn detach(&self, addr: &NodeAddr) {
        if let Ok(mut endpoints) = self.endpoints.write() {
            endpoints.remove(addr);
        }
    }

    fn deliver(&self, from: NodeAddr, to: Option<NodeAddr>, frame: &[u8]) {
        let filter = self.filter.read().ok().and_then(|f| f.clone());
        let Ok(endpoints) = self.endpoints.read() else {
            return;
        };

        let recipients: Vec<(&NodeAddr, &FrameSender)> = match to {
            Some(to) => endpoints.get_key_value(&to).into_iter().collect(),
            None => endpoints.iter()
                .filter(|(addr, _)| **addr != from)
                .collect(),
        };

        if recipients.is_empty() {
            debug!("no attached recipient for frame from {:?} to {:?} - dropping", from, to);
        }

        let frame = Bytes::copy_from_slice(frame);
        for (&addr, sender) in recipients {
            if let Some(filter) = &filter {
                if filter(from, addr, &frame) {
                    trace!("dropping frame from {:?} to {:?}", from, addr);
                    continue;
                }
            }
            // a closed channel means the recipient is detaching
            let _ = sender.send((from, frame.clone()));
        }
    }
}

pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    myself: NodeAddr,
    shutdown: watch::Sender<u64>,
    fail_sends: AtomicBool,
}
impl Debug for LoopbackTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoopbackTransport{{myself:{:?}}}", &self.myself)
    }
}

impl LoopbackTransport {
    /// simulates a local I/O failure for all subsequent sends
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn self_addr(&self) -> NodeAddr {
        self.myself
    }

    async fn send(&self, to: Option<NodeAddr>, frame: &[u8]) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(TransportError::Io("simulated send failure".to_string()));
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        self.network.deliver(self.myself, to, frame);
        Ok(())
    }

    async fn recv_loop(&self, handler: Arc<dyn FrameHandler>) -> anyhow::Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        let (send, mut recv) = mpsc::unbounded_channel();
        self.network.attach(self.myself, send);
        debug!("{:?} attached to loopback network", self.myself);

        loop {
            select! {
                frame = recv.recv() => {
                    match frame {
                        Some((from, frame)) => handler.handle_frame(from, &frame).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        self.network.detach(&self.myself);
        debug!("{:?} detached from loopback network", self.myself);
        Ok(())
    }

    fn shut_down_recv_loop(&self) {
        self.shutdown.send_modify(|n| *n += 1);
    }
}
