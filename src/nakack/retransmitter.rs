//! Negative acknowledgement: receivers periodically look for gaps in their tables and ask the
//!  gaps' original sender to send the messages again. A sender answers from its own retention
//!  table, or reports ranges it purged already as unavailable.

use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use crate::membership::{Membership, SuspectReason};
use crate::messaging::message::{Message, MessageBatch, StreamId};
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::transport::Transport;
use crate::messaging::wire::{NakAckPdu, RetransmitRequest};
use crate::nakack::departed_members::DepartedMembers;
use crate::nakack::nakack_config::NakAckConfig;
use crate::nakack::sender_table::RetransmitDecision;
use crate::nakack::sender_tables::SenderTables;
use crate::nakack::seqno_range::SeqnoRange;
use crate::nakack::stats::NakAckStats;
use crate::util::profiler::{Profiler, SAMPLES_PER_REPORT};

pub struct Retransmitter {
    config: Arc<NakAckConfig>,
    tables: Arc<SenderTables>,
    transport: Arc<dyn Transport>,
    membership: Arc<dyn Membership>,
    departed: Arc<DepartedMembers>,
    stats: Arc<NakAckStats>,
}

impl Retransmitter {
    pub fn new(
        config: Arc<NakAckConfig>,
        tables: Arc<SenderTables>,
        transport: Arc<dyn Transport>,
        membership: Arc<dyn Membership>,
        departed: Arc<DepartedMembers>,
        stats: Arc<NakAckStats>,
    ) -> Retransmitter {
        Retransmitter {
            config,
            tables,
            transport,
            membership,
            departed,
            stats,
        }
    }

    fn myself(&self) -> NodeAddr {
        self.config.self_addr
    }

    /// Scans all tables for gaps, sending retransmit requests as the tables' backoff permits
    pub async fn tick(&self) {
        for table in self.tables.all().await {
            let (stream, epoch, decision) = {
                let mut table = table.lock().await;
                if table.is_own() {
                    continue;
                }

                let stream = table.stream();
                if self.departed.contains(&stream.sender) {
                    let missing = table.missing_ranges(self.config.max_ranges_per_retransmit_request);
                    if !missing.is_empty() && table.mark_departure_reported() {
                        warn!("{:?} departed with messages still missing: {:?}", stream.sender, missing);
                        NakAckStats::inc(&self.stats.unrecoverable_gaps);
                        self.membership.suspect(stream.sender, SuspectReason::DepartedWithGaps { stream, ranges: missing });
                    }
                    continue;
                }

                (stream, table.epoch(), table.retransmit_tick(self.config.max_ranges_per_retransmit_request, self.config.max_retransmit_attempts))
            };

            match decision {
                RetransmitDecision::Idle | RetransmitDecision::Wait => {}
                RetransmitDecision::Request(ranges) => {
                    self.send_request(stream, epoch, ranges).await;
                }
                RetransmitDecision::Exhausted { attempts, ranges } => {
                    warn!("no progress for {:?} after {} retransmit requests - suspecting {:?}", stream, attempts, stream.sender);
                    self.membership.suspect(stream.sender, SuspectReason::RetransmissionExhausted { stream, attempts });
                    self.send_request(stream, epoch, ranges).await;
                }
            }
        }
    }

    async fn send_request(&self, stream: StreamId, epoch: u64, ranges: Vec<SeqnoRange>) {
        debug!("requesting retransmission of {:?} from {:?}", ranges, stream);
        NakAckStats::inc(&self.stats.retransmit_requests_sent);

        let pdu = NakAckPdu::RetransmitRequest(RetransmitRequest { stream, epoch, ranges });
        if let Err(e) = pdu.send(self.transport.as_ref(), Some(stream.sender)).await {
            warn!("error sending retransmit request to {:?}: {}", stream.sender, e);
        }
    }

    /// Answers a retransmit request for one of the local member's streams
    pub async fn on_request(&self, from: NodeAddr, request: RetransmitRequest) {
        NakAckStats::inc(&self.stats.retransmit_requests_received);
        trace!("retransmit request from {:?}: {:?}", from, request);

        if request.stream.sender != self.myself() {
            warn!("received retransmit request from {:?} for a stream sent by somebody else: {:?} - ignoring", from, request.stream);
            return;
        }

        let mut retained: Vec<Message> = Vec::new();
        let mut unavailable: Vec<SeqnoRange> = Vec::new();
        match self.tables.get(&request.stream).await {
            Some(table) => {
                let table = table.lock().await;
                if table.epoch() == request.epoch {
                    for &range in &request.ranges {
                        let (messages, purged) = table.messages_in_range(range);
                        retained.extend(messages);
                        unavailable.extend(purged);
                    }
                }
                else {
                    unavailable = request.ranges.clone();
                }
            }
            None => unavailable = request.ranges.clone(),
        }

        for chunk in retained.chunks(self.config.max_messages_per_retransmit_batch) {
            let batch = match MessageBatch::new(chunk.to_vec()) {
                Ok(batch) => batch,
                Err(e) => {
                    error!("inconsistent retransmission batch: {}", e);
                    continue;
                }
            };
            NakAckStats::add(&self.stats.messages_retransmitted, batch.len() as u64);

            if let Err(e) = NakAckPdu::Batch(batch).send(self.transport.as_ref(), Some(from)).await {
                warn!("error retransmitting messages to {:?}: {}", from, e);
                return;
            }
        }

        if !unavailable.is_empty() {
            warn!("{:?} requested {:?} of {:?} which are not available any more", from, unavailable, request.stream);
            let pdu = NakAckPdu::RetransmitUnavailable(RetransmitRequest {
                stream: request.stream,
                epoch: request.epoch,
                ranges: unavailable,
            });
            if let Err(e) = pdu.send(self.transport.as_ref(), Some(from)).await {
                warn!("error sending retransmit response to {:?}: {}", from, e);
            }
        }
    }

    /// The sender of a stream reported that it does not have messages the local member is
    ///  missing
    pub async fn on_unavailable(&self, from: NodeAddr, response: RetransmitRequest) {
        if response.stream.sender != from {
            warn!("{:?} reported unavailable messages for a stream it does not send: {:?} - ignoring", from, response.stream);
            return;
        }

        let Some(table) = self.tables.get(&response.stream).await else {
            return;
        };
        let new_ranges = {
            let mut table = table.lock().await;
            if table.epoch() != response.epoch {
                debug!("ignoring unavailable messages report for a previous epoch of {:?}", response.stream);
                return;
            }
            table.mark_unavailable(&response.ranges)
        };
        if new_ranges.is_empty() {
            trace!("unavailable messages {:?} of {:?} were reported before", response.ranges, response.stream);
            return;
        }

        warn!("unrecoverable gap in {:?}: {:?}", response.stream, new_ranges);
        NakAckStats::inc(&self.stats.unrecoverable_gaps);
        self.membership.suspect(from, SuspectReason::UnrecoverableGap {
            stream: response.stream,
            ranges: new_ranges,
        });
    }
}

pub async fn run_retransmitter(config: Arc<NakAckConfig>, retransmitter: Arc<Retransmitter>) {
    let mut ticks = interval(config.retransmit_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut profiler = Profiler::new();
    profiler.enable(config.profiling_enabled);

    loop {
        ticks.tick().await;

        profiler.start();
        retransmitter.tick().await;
        profiler.stop();

        if profiler.should_report(SAMPLES_PER_REPORT) {
            debug!("retransmission ticks: {}", profiler);
            profiler.reset();
        }
    }
}
