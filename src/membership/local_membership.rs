use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::membership::{Membership, SuspectReason, View, ViewChange, ViewChangeNotifier};
use crate::messaging::node_addr::NodeAddr;

/// A [Membership] that is shared between all members living in the same process: views are
///  installed explicitly, and suspicions are recorded rather than acted upon.
pub struct LocalMembership {
    view: RwLock<View>,
    notifier: ViewChangeNotifier,
    suspicions: Mutex<Vec<(NodeAddr, SuspectReason)>>,
}
impl Debug for LocalMembership {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalMembership{{{:?}}}", self.current_view())
    }
}

impl LocalMembership {
    pub fn new() -> Arc<LocalMembership> {
        Arc::new(LocalMembership {
            view: Default::default(),
            notifier: ViewChangeNotifier::new(),
            suspicions: Default::default(),
        })
    }

    pub fn install_view(&self, members: impl IntoIterator<Item = NodeAddr>) -> View {
        let change = {
            let Ok(mut view) = self.view.write() else {
                warn!("view lock is poisoned - not installing view");
                return self.current_view();
            };
            let new_view = View::new(view.id + 1, members);
            let old_view = std::mem::replace(&mut *view, new_view.clone());
            ViewChange::new(old_view, new_view)
        };

        info!("installing view #{}: {:?}", change.new.id, change.new.members());
        let new_view = change.new.clone();
        self.notifier.send_event(change);
        new_view
    }

    pub fn join(&self, addr: NodeAddr) -> View {
        let mut members = self.current_view().members().to_vec();
        members.push(addr);
        self.install_view(members)
    }

    pub fn leave(&self, addr: NodeAddr) -> View {
        let members = self.current_view().members().iter()
            .filter(|&&m| m != addr)
            .cloned()
            .collect::<Vec<_>>();
        self.install_view(members)
    }

    pub fn suspicions(&self) -> Vec<(NodeAddr, SuspectReason)> {
        self.suspicions.lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl Membership for LocalMembership {
    fn current_view(&self) -> View {
        self.view.read()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.notifier.subscribe()
    }

    fn suspect(&self, addr: NodeAddr, reason: SuspectReason) {
        warn!("suspecting {:?}: {:?}", addr, reason);
        if let Ok(mut suspicions) = self.suspicions.lock() {
            suspicions.push((addr, reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::StreamId;
    use crate::test_util::node::test_node_addr_from_number;

    #[tokio::test]
    async fn test_view_changes_are_published() {
        let membership = LocalMembership::new();
        let mut events = membership.subscribe();

        membership.join(test_node_addr_from_number(1));
        membership.join(test_node_addr_from_number(2));
        let view = membership.leave(test_node_addr_from_number(1));

        assert_eq!(view.id, 3);
        assert_eq!(membership.current_view(), view);

        let first = events.recv().await.unwrap();
        assert_eq!(first.joined, vec![test_node_addr_from_number(1)]);
        let second = events.recv().await.unwrap();
        assert_eq!(second.joined, vec![test_node_addr_from_number(2)]);
        let third = events.recv().await.unwrap();
        assert_eq!(third.left, vec![test_node_addr_from_number(1)]);
        assert_eq!(third.new.members(), &[test_node_addr_from_number(2)]);
    }

    #[test]
    fn test_suspicions_are_recorded() {
        let membership = LocalMembership::new();
        let reason = SuspectReason::RetransmissionExhausted {
            stream: StreamId::multicast(test_node_addr_from_number(3)),
            attempts: 5,
        };
        membership.suspect(test_node_addr_from_number(3), reason.clone());
        assert_eq!(membership.suspicions(), vec![(test_node_addr_from_number(3), reason)]);
    }
}
