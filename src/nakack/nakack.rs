use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashSet;
use std::cmp::min;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::membership::{Membership, ViewChange};
use crate::messaging::message::{Message, MessageBatch, MessageFlags, StreamId};
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::transport::{FrameHandler, Transport, TransportError};
use crate::messaging::wire::NakAckPdu;
use crate::nakack::delivery::DeliveryEngine;
use crate::nakack::delivery_policy::DeliveryPolicies;
use crate::nakack::departed_members::DepartedMembers;
use crate::nakack::digest::Digest;
use crate::nakack::nakack_config::NakAckConfig;
use crate::nakack::receiver::Receiver;
use crate::nakack::retransmitter::{run_retransmitter, Retransmitter};
use crate::nakack::sender_tables::SenderTables;
use crate::nakack::sequencer::Sequencer;
use crate::nakack::stability::{run_stability, StabilityManager};
use crate::nakack::stats::{NakAckStats, NakAckStatsSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("the engine is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A join in progress: the digest request is repeated for members that did not answer yet
struct PendingJoin {
    awaiting: FxHashSet<NodeAddr>,
    digest_applied: bool,
    all_answered: Option<oneshot::Sender<()>>,
}

struct NakAckInner {
    config: Arc<NakAckConfig>,
    transport: Arc<dyn Transport>,
    membership: Arc<dyn Membership>,
    sequencer: Sequencer,
    tables: Arc<SenderTables>,
    delivery: DeliveryEngine,
    retransmitter: Arc<Retransmitter>,
    stability: Arc<StabilityManager>,
    departed: Arc<DepartedMembers>,
    stats: Arc<NakAckStats>,
    connected: AtomicBool,
    pending_join: tokio::sync::Mutex<Option<PendingJoin>>,
}

impl NakAckInner {
    fn myself(&self) -> NodeAddr {
        self.config.self_addr
    }

    /// Only other members' streams that are multicast or addressed to the local member are
    ///  accepted from the network
    fn accept(&self, from: NodeAddr, stream: &StreamId) -> bool {
        if stream.sender != from {
            warn!("received messages of {:?} from {:?} - discarding", stream, from);
            return false;
        }
        if stream.sender == self.myself() {
            warn!("received own messages of {:?} from the network - discarding", stream);
            return false;
        }
        if let Some(dest) = stream.dest {
            if dest != self.myself() {
                warn!("received point-to-point messages of {:?} that are not for this member - discarding", stream);
                return false;
            }
        }
        if self.departed.contains(&stream.sender) {
            trace!("discarding messages of {:?}: sender departed", stream);
            return false;
        }
        true
    }

    async fn on_data(&self, from: NodeAddr, msg: Message) {
        if self.accept(from, &msg.stream_id()) {
            self.delivery.on_message(msg).await;
        }
    }

    async fn on_batch(&self, from: NodeAddr, batch: MessageBatch) {
        if self.accept(from, &batch.stream_id()) {
            self.delivery.on_batch(batch).await;
        }
    }

    /// A digest request means that the requester (re)connected. Its new incarnation did not see
    ///  any of the point-to-point messages sent to it so far, so the stream to it starts over.
    async fn on_digest_request(&self, from: NodeAddr, requester_epoch: u64) {
        if let Some(epoch) = self.sequencer.restart_point_to_point(from, requester_epoch) {
            debug!("{:?} connected in epoch {} - restarting point-to-point stream to it in epoch {}", from, requester_epoch, epoch);
            self.tables.restart(StreamId::point_to_point(self.myself(), from), epoch).await;
        }

        let digest = self.tables.digest().await;
        debug!("sending digest with {} entries to {:?}", digest.len(), from);
        if let Err(e) = NakAckPdu::DigestResponse(digest).send(self.transport.as_ref(), Some(from)).await {
            warn!("error sending digest to {:?}: {}", from, e);
        }
    }

    /// The responder's point-to-point stream to the local member is taken from every response.
    ///  Multicast streams are only seeded from the first digest received while joining: once a
    ///  member is part of the group, its tables are more accurate than any other member's digest.
    async fn on_digest_response(&self, from: NodeAddr, digest: Digest) {
        self.tables.merge_point_to_point_entry(from, &digest).await;

        let mut pending_join = self.pending_join.lock().await;
        let Some(join) = pending_join.as_mut() else {
            debug!("ignoring multicast entries of digest from {:?}: not joining", from);
            return;
        };
        join.awaiting.remove(&from);

        let modified = if join.digest_applied {
            Vec::new()
        }
        else {
            info!("applying join digest from {:?} with {} entries", from, digest.len());
            join.digest_applied = true;
            self.tables.merge_join_digest(&digest).await
        };
        if join.awaiting.is_empty() {
            if let Some(all_answered) = join.all_answered.take() {
                let _ = all_answered.send(());
            }
        }
        drop(pending_join);

        for table in modified {
            self.delivery.deliver_ready(&table).await;
        }
    }

    async fn join_group(&self) {
        let others = self.membership.current_view().members().iter()
            .filter(|&&m| m != self.myself())
            .cloned()
            .collect::<FxHashSet<_>>();
        if others.is_empty() {
            debug!("no other members in the view - not requesting a join digest");
            return;
        }

        let (all_answered, mut all_answered_recv) = oneshot::channel();
        *self.pending_join.lock().await = Some(PendingJoin {
            awaiting: others,
            digest_applied: false,
            all_answered: Some(all_answered),
        });

        let epoch = self.sequencer.epoch();
        let deadline = Instant::now() + self.config.join_digest_timeout;
        let retry_interval = self.config.retransmit_interval.max(Duration::from_millis(10));
        loop {
            let awaiting = match self.pending_join.lock().await.as_ref() {
                Some(join) => join.awaiting.iter().cloned().collect::<Vec<_>>(),
                None => return,
            };
            for member in awaiting {
                if let Err(e) = NakAckPdu::DigestRequest(epoch).send(self.transport.as_ref(), Some(member)).await {
                    warn!("error requesting join digest from {:?}: {}", member, e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if timeout(min(retry_interval, deadline - now), &mut all_answered_recv).await.is_ok() {
                break;
            }
        }

        match self.pending_join.lock().await.take() {
            Some(join) if !join.digest_applied => {
                info!("no join digest received within {:?} - proceeding without", self.config.join_digest_timeout);
            }
            Some(join) if !join.awaiting.is_empty() => {
                info!("{:?} did not answer the digest request within {:?}", join.awaiting, self.config.join_digest_timeout);
            }
            Some(_) => debug!("all members answered the digest request"),
            None => {}
        }
    }

    async fn on_view_change(&self, change: ViewChange) {
        info!("view changed to #{}: {:?} joined, {:?} left", change.new.id, change.joined, change.left);

        let now = Instant::now();
        for &addr in &change.left {
            if addr != self.myself() {
                self.departed.mark_departed(addr, now);
            }
        }
        for addr in &change.joined {
            self.departed.mark_rejoined(addr);
        }
        self.stability.forget(&change.left).await;
    }

    /// After missing view changes, all senders that have tables but are not in the view are
    ///  treated as departed
    async fn resync_view(&self) {
        let view = self.membership.current_view();
        let now = Instant::now();
        let mut departed = Vec::new();
        for stream in self.tables.streams().await {
            for addr in [Some(stream.sender), stream.dest].into_iter().flatten() {
                if addr != self.myself() && !view.contains(&addr) && !departed.contains(&addr) {
                    departed.push(addr);
                }
            }
        }
        for &addr in &departed {
            self.departed.mark_departed(addr, now);
        }
        self.stability.forget(&departed).await;
    }

    async fn remove_expired_departures(&self) {
        for addr in self.departed.take_expired(self.config.departed_member_grace_period, Instant::now()) {
            let num_removed = self.tables.remove_member(&addr).await;
            info!("removed {} tables of departed member {:?}", num_removed, addr);
        }
    }
}

#[async_trait]
impl FrameHandler for NakAckInner {
    async fn handle_frame(&self, from: NodeAddr, frame: &[u8]) {
        if !self.connected.load(Ordering::Acquire) {
            return;
        }

        let pdu = match NakAckPdu::try_from_frame(frame) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!("received unparseable frame from {:?}: {} - discarding", from, e);
                return;
            }
        };

        match pdu {
            NakAckPdu::Data(msg) => self.on_data(from, msg).await,
            NakAckPdu::Batch(batch) => self.on_batch(from, batch).await,
            NakAckPdu::RetransmitRequest(request) => self.retransmitter.on_request(from, request).await,
            NakAckPdu::RetransmitUnavailable(response) => self.retransmitter.on_unavailable(from, response).await,
            NakAckPdu::StabilityDigest(digest) => self.stability.on_digest(from, digest).await,
            NakAckPdu::DigestRequest(epoch) => self.on_digest_request(from, epoch).await,
            NakAckPdu::DigestResponse(digest) => self.on_digest_response(from, digest).await,
        }
    }
}

async fn run_view_listener(inner: Arc<NakAckInner>, mut view_changes: broadcast::Receiver<ViewChange>) {
    let mut cleanup_ticks = interval(inner.config.retransmit_interval);
    cleanup_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            change = view_changes.recv() => {
                match change {
                    Ok(change) => inner.on_view_change(change).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!("missed {} view changes - resyncing with the current view", n);
                        inner.resync_view().await;
                    }
                    Err(RecvError::Closed) => {
                        error!("membership stopped publishing view changes - shutting down view listener");
                        return;
                    }
                }
            }
            _ = cleanup_ticks.tick() => {
                inner.remove_expired_departures().await;
            }
        }
    }
}

#[derive(Default)]
struct Workers {
    recv_loop: Option<JoinHandle<()>>,
    periodic: Vec<JoinHandle<()>>,
}
impl Workers {
    fn abort_all(&mut self) {
        if let Some(handle) = self.recv_loop.take() {
            handle.abort();
        }
        for handle in self.periodic.drain(..) {
            handle.abort();
        }
    }
}

/// The reliable multicast engine of a single member. It sequences the member's outgoing
///  messages, delivers incoming messages in per-sender order, recovers lost messages through
///  retransmission and purges messages once they are stable.
///
/// The engine is inactive until [NakAck::connect] is called, and it can be disconnected and
///  connected again. Each connect starts a new epoch for the member's outgoing streams.
pub struct NakAck {
    inner: Arc<NakAckInner>,
    workers: Mutex<Workers>,
}

impl Drop for NakAck {
    fn drop(&mut self) {
        self.inner.connected.store(false, Ordering::Release);
        self.inner.transport.shut_down_recv_loop();
        if let Ok(mut workers) = self.workers.lock() {
            workers.abort_all();
        }
    }
}

impl NakAck {
    pub fn new(
        config: NakAckConfig,
        transport: Arc<dyn Transport>,
        membership: Arc<dyn Membership>,
        receiver: Arc<dyn Receiver>,
    ) -> anyhow::Result<NakAck> {
        config.validate()?;
        if transport.self_addr() != config.self_addr {
            bail!("transport is bound to {:?}, but the configured address is {:?}", transport.self_addr(), config.self_addr);
        }

        let config = Arc::new(config);
        let tables = Arc::new(SenderTables::new(config.clone()));
        let departed = Arc::new(DepartedMembers::new());
        let stats = Arc::new(NakAckStats::default());

        let delivery = DeliveryEngine::new(tables.clone(), DeliveryPolicies::from_config(&config), receiver, stats.clone());
        let retransmitter = Arc::new(Retransmitter::new(config.clone(), tables.clone(), transport.clone(), membership.clone(), departed.clone(), stats.clone()));
        let stability = Arc::new(StabilityManager::new(config.clone(), tables.clone(), transport.clone(), membership.clone(), stats.clone()));

        Ok(NakAck {
            inner: Arc::new(NakAckInner {
                config,
                transport,
                membership,
                sequencer: Sequencer::new(),
                tables,
                delivery,
                retransmitter,
                stability,
                departed,
                stats,
                connected: AtomicBool::new(false),
                pending_join: Default::default(),
            }),
            workers: Default::default(),
        })
    }

    pub fn myself(&self) -> NodeAddr {
        self.inner.myself()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// The epoch of the local member's outgoing streams
    pub fn epoch(&self) -> u64 {
        self.inner.sequencer.epoch()
    }

    /// Starts a new epoch with empty tables, starts receiving and the periodic work, and requests
    ///  a digest from the other members of the view to know where to start delivering their
    ///  messages
    pub async fn connect(&self) -> anyhow::Result<()> {
        if self.inner.connected.load(Ordering::Acquire) {
            bail!("already connected");
        }

        let epoch = self.inner.sequencer.new_epoch();
        self.inner.tables.clear().await;
        self.inner.stability.clear().await;
        self.inner.departed.clear();
        info!("connecting {:?} in epoch {}", self.myself(), epoch);

        let view_changes = self.inner.membership.subscribe();
        self.inner.connected.store(true, Ordering::Release);

        let recv_loop = {
            let transport = self.inner.transport.clone();
            let handler: Arc<dyn FrameHandler> = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.recv_loop(handler).await {
                    error!("receive loop terminated with error: {}", e);
                }
            })
        };
        let stability = tokio::spawn(run_stability(self.inner.config.clone(), self.inner.stability.clone()));
        let view_listener = tokio::spawn(run_view_listener(self.inner.clone(), view_changes));
        if let Ok(mut workers) = self.workers.lock() {
            workers.recv_loop = Some(recv_loop);
            workers.periodic.push(stability);
            workers.periodic.push(view_listener);
        }

        // gaps are only meaningful once the join digest defined where delivery starts
        self.inner.join_group().await;

        let retransmitter = tokio::spawn(run_retransmitter(self.inner.config.clone(), self.inner.retransmitter.clone()));
        if let Ok(mut workers) = self.workers.lock() {
            workers.periodic.push(retransmitter);
        }
        Ok(())
    }

    /// Stops all work and discards all tables. Messages that were not delivered yet are lost.
    pub async fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("disconnecting {:?}", self.myself());

        self.inner.transport.shut_down_recv_loop();
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Workers::default(),
        };
        let Workers { recv_loop, periodic } = workers;
        for handle in periodic {
            handle.abort();
        }
        if let Some(mut recv_loop) = recv_loop {
            if timeout(Duration::from_secs(1), &mut recv_loop).await.is_err() {
                warn!("receive loop did not terminate - aborting it");
                recv_loop.abort();
            }
        }

        self.inner.pending_join.lock().await.take();
        self.inner.tables.clear().await;
        self.inner.stability.clear().await;
        self.inner.departed.clear();
    }

    /// Sends a message to a single member or, if `dest` is `None`, to all members of the view.
    ///  Returns the message's seqno in its stream.
    ///
    /// A seqno is consumed even if the transport fails to send the message. The message is
    ///  retained for retransmission in that case, so receivers will recover it once the
    ///  transport works again and they notice the gap.
    pub async fn send(&self, dest: Option<NodeAddr>, payload: Bytes, flags: MessageFlags) -> Result<u64, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        let (epoch, seqno) = self.inner.sequencer.next_seqno(dest);
        let msg = Message {
            sender: self.myself(),
            dest,
            epoch,
            seqno,
            flags,
            payload,
        };
        trace!("sending {:?}", msg);
        NakAckStats::inc(&self.inner.stats.messages_sent);

        let pdu = NakAckPdu::Data(msg.clone());
        self.inner.delivery.on_message(msg).await;

        if dest != Some(self.myself()) {
            pdu.send(self.inner.transport.as_ref(), dest).await?;
        }
        Ok(seqno)
    }

    pub async fn digest(&self) -> Digest {
        self.inner.tables.digest().await
    }

    pub fn stats(&self) -> NakAckStatsSnapshot {
        self.inner.stats.snapshot()
    }
}
