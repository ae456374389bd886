//! The membership contract consumed by the delivery core. Computing views is somebody else's
//!  job: the core only reads the current view, listens for view changes and reports members it
//!  suspects.

pub mod local_membership;
pub mod rendezvous;

use std::fmt::Debug;
use tokio::sync::broadcast;
use tracing::trace;

use crate::messaging::message::StreamId;
use crate::messaging::node_addr::NodeAddr;
use crate::nakack::seqno_range::SeqnoRange;

/// The agreed set of live members. Members are ordered by seniority, i.e. the first member is
///  the coordinator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct View {
    pub id: u64,
    members: Vec<NodeAddr>,
}
impl View {
    pub fn new(id: u64, members: impl IntoIterator<Item = NodeAddr>) -> View {
        let mut result = View {
            id,
            members: Vec::new(),
        };
        for m in members {
            if !result.members.contains(&m) {
                result.members.push(m);
            }
        }
        result
    }

    pub fn members(&self) -> &[NodeAddr] {
        &self.members
    }

    pub fn contains(&self, addr: &NodeAddr) -> bool {
        self.members.contains(addr)
    }

    pub fn coordinator(&self) -> Option<NodeAddr> {
        self.members.first().cloned()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ViewChange {
    pub old: View,
    pub new: View,
    pub joined: Vec<NodeAddr>,
    pub left: Vec<NodeAddr>,
}
impl ViewChange {
    pub fn new(old: View, new: View) -> ViewChange {
        let joined = new.members().iter()
            .filter(|m| !old.contains(m))
            .cloned()
            .collect();
        let left = old.members().iter()
            .filter(|m| !new.contains(m))
            .cloned()
            .collect();

        ViewChange { old, new, joined, left }
    }
}

/// Why the delivery core suspects a member. The core never evicts members itself, it only
///  reports the condition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SuspectReason {
    /// the sender reported that it does not hold the requested messages any more
    UnrecoverableGap { stream: StreamId, ranges: Vec<SeqnoRange> },
    /// retransmission was requested repeatedly without any progress
    RetransmissionExhausted { stream: StreamId, attempts: u32 },
    /// the sender left the view while messages were still missing
    DepartedWithGaps { stream: StreamId, ranges: Vec<SeqnoRange> },
}

pub trait Membership: Debug + Send + Sync + 'static {
    fn current_view(&self) -> View;

    fn subscribe(&self) -> broadcast::Receiver<ViewChange>;

    fn suspect(&self, addr: NodeAddr, reason: SuspectReason);
}


pub struct ViewChangeNotifier {
    sender: broadcast::Sender<ViewChange>,
}
impl Default for ViewChangeNotifier {
    fn default() -> Self {
        ViewChangeNotifier::new()
    }
}
impl ViewChangeNotifier {
    pub fn new() -> ViewChangeNotifier {
        let (sender, _) = broadcast::channel(128);

        ViewChangeNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: ViewChange) {
        trace!("view change: {:?}", event);
        let _ = self.sender.send(event);
    }
}
