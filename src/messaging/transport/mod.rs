pub mod loopback;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::sync::Arc;
use thiserror::Error;

use crate::messaging::node_addr::NodeAddr;

/// Errors a transport reports synchronously for a local send failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("the transport is not bound to a local endpoint")]
    NotBound,
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("I/O error: {0}")]
    Io(String),
}

/// The unreliable point-to-point / multicast transport the delivery core builds on. Frames may
///  be dropped, duplicated or reordered; they are never corrupted without the corruption being
///  detectable by the frame checksum.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn self_addr(&self) -> NodeAddr;

    /// Sends a frame to a single member, or to all other members of the group if `to` is `None`.
    ///  Returning `Ok` does not imply delivery.
    async fn send(&self, to: Option<NodeAddr>, frame: &[u8]) -> Result<(), TransportError>;

    /// Passes received frames to the handler until [Transport::shut_down_recv_loop] is called.
    async fn recv_loop(&self, handler: Arc<dyn FrameHandler>) -> anyhow::Result<()>;

    fn shut_down_recv_loop(&self);
}

/// This trait decouples the transport from the handling of a frame once it is received.
///
/// It is passed around as an `Arc<dyn ...>` to minimize dependencies of [Transport] implementations.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle_frame(&self, from: NodeAddr, frame: &[u8]);
}
