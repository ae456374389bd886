use std::cmp::{max, min};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::messaging::message::{Message, MessageFlags, StreamId};
use crate::nakack::digest::DigestEntry;
use crate::nakack::exponential_backoff::ExponentialBackoff;
use crate::nakack::nakack_config::NakAckConfig;
use crate::nakack::seqno_range::SeqnoRange;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddOutcome {
    /// the message belongs to an older epoch of the stream's sender
    Stale,
    Duplicate,
    /// `deliver_now` is set for out-of-band messages that must be delivered right away
    Added { deliver_now: bool },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RetransmitDecision {
    /// no gaps
    Idle,
    /// there are gaps, but backoff says to wait
    Wait,
    Request(Vec<SeqnoRange>),
    /// like `Request`, but the number of requests without progress exceeded the configured maximum
    Exhausted { attempts: u32, ranges: Vec<SeqnoRange> },
}

#[derive(Debug)]
struct TableEntry {
    msg: Message,
    /// set for entries that were handed out out-of-band or must not be delivered locally at all.
    ///  Advancing the contiguous prefix consumes them without delivering them again.
    delivered: bool,
}

/// The messages of a single stream, as seen by the local member, and the stream's watermarks:
///
/// * Everything up to and including `low` was purged after becoming stable
/// * Everything in `(low, high_delivered]` was delivered and is retained for retransmission until
///    it becomes stable
/// * In `(high_delivered, high_received]`, entries are present for all messages that arrived,
///    and absent messages are gaps
///
/// For the local member's own multicast stream, the same table is the retention buffer that
///  retransmission requests are served from. The local member's point-to-point streams to other
///  members are pure retention tables: their messages are never delivered locally.
#[derive(Debug)]
pub struct SenderTable {
    stream: StreamId,
    own: bool,
    local_delivery: bool,

    epoch: u64,
    low: u64,
    high_delivered: u64,
    high_received: u64,
    entries: BTreeMap<u64, TableEntry>,

    /// set while some task delivers this table's ready messages to the application; other tasks
    ///  only insert and leave delivery to that task
    delivering: bool,

    backoff: ExponentialBackoff,
    received_since_tick: bool,
    attempts_without_progress: u32,
    high_delivered_at_last_request: u64,
    departure_reported: bool,
    /// ranges the sender reported as no longer available in the current epoch
    unavailable: Vec<SeqnoRange>,
}

impl SenderTable {
    pub fn new(config: &NakAckConfig, stream: StreamId, epoch: u64) -> SenderTable {
        let own = stream.sender == config.self_addr;
        let local_delivery = match stream.dest {
            None => true,
            Some(dest) => dest == config.self_addr,
        };

        SenderTable {
            stream,
            own,
            local_delivery,
            epoch,
            low: 0,
            high_delivered: 0,
            high_received: 0,
            entries: Default::default(),
            delivering: false,
            backoff: ExponentialBackoff::new(config),
            received_since_tick: false,
            attempts_without_progress: 0,
            high_delivered_at_last_request: 0,
            departure_reported: false,
            unavailable: Vec::new(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn low(&self) -> u64 {
        self.low
    }

    pub fn high_delivered(&self) -> u64 {
        self.high_delivered
    }

    pub fn high_received(&self) -> u64 {
        self.high_received
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_own(&self) -> bool {
        self.own
    }

    /// Starts over for a new epoch of the stream's sender. A task that is currently delivering
    ///  keeps doing so, picking up the new epoch's messages.
    pub fn reset(&mut self, epoch: u64) {
        debug!("{:?}: new epoch {} (was {}), resetting table", self.stream, epoch, self.epoch);
        self.epoch = epoch;
        self.low = 0;
        self.high_delivered = 0;
        self.high_received = 0;
        self.entries.clear();
        self.received_since_tick = false;
        self.attempts_without_progress = 0;
        self.high_delivered_at_last_request = 0;
        self.departure_reported = false;
        self.unavailable.clear();
    }

    pub fn add(&mut self, msg: Message) -> AddOutcome {
        if msg.epoch < self.epoch {
            trace!("{:?}: discarding {:?} from stale epoch", self.stream, msg);
            return AddOutcome::Stale;
        }
        if msg.epoch > self.epoch {
            self.reset(msg.epoch);
        }

        if msg.seqno <= self.high_delivered || self.entries.contains_key(&msg.seqno) {
            trace!("{:?}: discarding duplicate {:?}", self.stream, msg);
            return AddOutcome::Duplicate;
        }

        let suppressed = !self.local_delivery || (self.own && msg.flags.contains(MessageFlags::DONT_LOOPBACK));
        let deliver_now = msg.is_oob() && !suppressed;

        self.high_received = max(self.high_received, msg.seqno);
        self.received_since_tick = true;
        self.entries.insert(msg.seqno, TableEntry {
            msg,
            delivered: suppressed || deliver_now,
        });

        AddOutcome::Added { deliver_now }
    }

    /// Returns `false` if another task is already delivering this table's messages. Otherwise
    ///  the caller becomes the delivering task and must call [SenderTable::take_ready] until it
    ///  returns an empty run.
    pub fn begin_delivery(&mut self) -> bool {
        if self.delivering {
            return false;
        }
        self.delivering = true;
        true
    }

    /// Advances `high_delivered` over the contiguous prefix of received messages, returning the
    ///  messages that still need delivery. An empty run ends the current delivery.
    pub fn take_ready(&mut self) -> Vec<Message> {
        let mut run = Vec::new();
        while let Some(entry) = self.entries.get_mut(&(self.high_delivered + 1)) {
            self.high_delivered += 1;
            if !entry.delivered {
                entry.delivered = true;
                run.push(entry.msg.clone());
            }
        }

        if run.is_empty() {
            self.delivering = false;
        }
        run
    }

    /// The gaps in `(high_delivered, high_received]`, the earliest first
    pub fn missing_ranges(&self, max_ranges: usize) -> Vec<SeqnoRange> {
        let mut result = Vec::new();
        let mut expected = self.high_delivered + 1;

        for &seqno in self.entries.range(expected..).map(|(k, _)| k) {
            if seqno > expected {
                result.push(SeqnoRange::new(expected, seqno - 1));
                if result.len() == max_ranges {
                    return result;
                }
            }
            expected = seqno + 1;
        }
        if expected <= self.high_received && result.len() < max_ranges {
            result.push(SeqnoRange::new(expected, self.high_received));
        }
        result
    }

    /// Looks up messages for a retransmission request. Returns the retained messages in the
    ///  range, and the part of the range that was already purged. Seqnos that were never received
    ///  are in neither.
    pub fn messages_in_range(&self, range: SeqnoRange) -> (Vec<Message>, Option<SeqnoRange>) {
        let purged = if range.from <= self.low {
            Some(SeqnoRange::new(range.from, min(range.to, self.low)))
        }
        else {
            None
        };

        let from = max(range.from, self.low + 1);
        let to = min(range.to, self.high_received);
        let retained = if from <= to {
            self.entries.range(from..=to)
                .map(|(_, e)| e.msg.clone())
                .collect()
        }
        else {
            Vec::new()
        };

        (retained, purged)
    }

    /// Discards delivered messages up to and including `up_to`, returning the number of purged
    ///  messages. Undelivered messages are never purged.
    pub fn purge(&mut self, up_to: u64) -> usize {
        let new_low = min(up_to, self.high_delivered);
        if new_low <= self.low {
            return 0;
        }

        let retained = self.entries.split_off(&(new_low + 1));
        let num_purged = self.entries.len();
        self.entries = retained;
        self.low = new_low;
        trace!("{:?}: purged {} messages up to #{}", self.stream, num_purged, new_low);
        num_purged
    }

    pub fn digest_entry(&self) -> DigestEntry {
        DigestEntry {
            epoch: self.epoch,
            low: self.low,
            high_delivered: self.high_delivered,
            high_received: self.high_received,
        }
    }

    /// Seeds the table from a remote member's digest at join time: everything the group
    ///  delivered before is considered delivered, and the rest is requested by retransmission.
    ///  Returns `true` if the table was modified.
    pub fn merge_digest(&mut self, entry: &DigestEntry) -> bool {
        if entry.epoch < self.epoch {
            return false;
        }
        if entry.epoch > self.epoch {
            self.reset(entry.epoch);
        }

        let mut modified = false;
        if entry.high_delivered > self.high_delivered {
            self.entries = self.entries.split_off(&(entry.high_delivered + 1));
            self.low = entry.high_delivered;
            self.high_delivered = entry.high_delivered;
            modified = true;
        }
        let high_received = max(self.high_received, max(entry.high_received, self.high_delivered));
        if high_received != self.high_received {
            self.high_received = high_received;
            modified = true;
        }
        modified
    }

    /// The stream's sender reported that it sent messages up to `high_sent`. This reveals gaps
    ///  at the end of the stream that no later message would reveal. Returns `true` if a new gap
    ///  was revealed.
    pub fn note_high_sent(&mut self, epoch: u64, high_sent: u64) -> bool {
        if epoch < self.epoch {
            return false;
        }
        if epoch > self.epoch {
            self.reset(epoch);
        }
        if high_sent <= self.high_received {
            return false;
        }
        trace!("{:?}: sender reported #{}, highest received was #{}", self.stream, high_sent, self.high_received);
        self.high_received = high_sent;
        self.received_since_tick = true;
        true
    }

    /// Called on every retransmission tick to decide whether the stream's sender is asked for
    ///  missing messages
    pub fn retransmit_tick(&mut self, max_ranges: usize, max_attempts: u32) -> RetransmitDecision {
        let progress = std::mem::take(&mut self.received_since_tick);

        // every unavailable range lies within a single gap
        let missing = self.missing_ranges(max_ranges + self.unavailable.len())
            .into_iter()
            .flat_map(|range| range.subtract(&self.unavailable))
            .take(max_ranges)
            .collect::<Vec<_>>();
        if missing.is_empty() {
            self.attempts_without_progress = 0;
            return RetransmitDecision::Idle;
        }

        if self.high_delivered > self.high_delivered_at_last_request {
            self.attempts_without_progress = 0;
        }
        if !self.backoff.should_send(progress) {
            return RetransmitDecision::Wait;
        }

        self.high_delivered_at_last_request = self.high_delivered;
        self.attempts_without_progress += 1;
        if self.attempts_without_progress > max_attempts {
            let attempts = self.attempts_without_progress;
            self.attempts_without_progress = 0;
            return RetransmitDecision::Exhausted { attempts, ranges: missing };
        }
        RetransmitDecision::Request(missing)
    }

    /// Records ranges that the sender reported as unavailable, returning those that were not
    ///  reported before. They are not requested again in this epoch.
    pub fn mark_unavailable(&mut self, ranges: &[SeqnoRange]) -> Vec<SeqnoRange> {
        let new_ranges = ranges.iter()
            .flat_map(|range| range.subtract(&self.unavailable))
            .collect::<Vec<_>>();
        self.unavailable.extend_from_slice(&new_ranges);
        new_ranges
    }

    /// Marks the sender's departure as reported, returning `false` if it was reported before
    pub fn mark_departure_reported(&mut self) -> bool {
        !std::mem::replace(&mut self.departure_reported, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::node_addr::NodeAddr;
    use bytes::Bytes;
    use rstest::rstest;

    fn myself() -> NodeAddr {
        NodeAddr::localhost(1)
    }
    fn other() -> NodeAddr {
        NodeAddr::localhost(2)
    }

    fn config() -> NakAckConfig {
        NakAckConfig::new(myself())
    }

    fn msg_with(stream: StreamId, epoch: u64, seqno: u64, flags: MessageFlags) -> Message {
        Message {
            sender: stream.sender,
            dest: stream.dest,
            epoch,
            seqno,
            flags,
            payload: Bytes::from(format!("{}", seqno)),
        }
    }

    fn msg(seqno: u64) -> Message {
        msg_with(StreamId::multicast(other()), 1, seqno, MessageFlags::empty())
    }

    fn oob(seqno: u64) -> Message {
        msg_with(StreamId::multicast(other()), 1, seqno, MessageFlags::OOB)
    }

    fn table_with(seqnos: &[u64]) -> SenderTable {
        let mut table = SenderTable::new(&config(), StreamId::multicast(other()), 1);
        for &seqno in seqnos {
            table.add(msg(seqno));
        }
        table
    }

    fn seqnos(run: &[Message]) -> Vec<u64> {
        run.iter().map(|m| m.seqno).collect()
    }

    fn deliver_all(table: &mut SenderTable) -> Vec<u64> {
        assert!(table.begin_delivery());
        let mut result = Vec::new();
        loop {
            let run = table.take_ready();
            if run.is_empty() {
                return result;
            }
            result.extend(seqnos(&run));
        }
    }

    #[test]
    fn test_in_order() {
        let mut table = table_with(&[1, 2, 3]);
        assert_eq!(deliver_all(&mut table), vec![1, 2, 3]);
        assert_eq!(table.high_delivered(), 3);
        assert_eq!(table.high_received(), 3);
        assert_eq!(table.low(), 0);
        assert_eq!(table.num_entries(), 3);
    }

    #[test]
    fn test_gap_holds_back_delivery() {
        let mut table = table_with(&[1, 2, 4, 5]);
        assert_eq!(deliver_all(&mut table), vec![1, 2]);
        assert_eq!(table.missing_ranges(10), vec![SeqnoRange::new(3, 3)]);

        assert_eq!(table.add(msg(3)), AddOutcome::Added { deliver_now: false });
        assert_eq!(deliver_all(&mut table), vec![3, 4, 5]);
        assert!(table.missing_ranges(10).is_empty());
    }

    #[rstest]
    #[case::delivered(1)]
    #[case::received(4)]
    fn test_duplicate(#[case] seqno: u64) {
        let mut table = table_with(&[1, 2, 4]);
        deliver_all(&mut table);
        assert_eq!(table.add(msg(seqno)), AddOutcome::Duplicate);
    }

    #[test]
    fn test_oob_is_not_delivered_twice() {
        let mut table = table_with(&[1, 2]);
        assert_eq!(table.add(oob(4)), AddOutcome::Added { deliver_now: true });
        assert_eq!(deliver_all(&mut table), vec![1, 2]);

        table.add(msg(3));
        table.add(msg(5));
        assert_eq!(deliver_all(&mut table), vec![3, 5]);
        assert_eq!(table.high_delivered(), 5);
    }

    #[test]
    fn test_dont_loopback_own_message() {
        let own = StreamId::multicast(myself());
        let mut table = SenderTable::new(&config(), own, 1);
        assert!(table.is_own());
        assert_eq!(table.add(msg_with(own, 1, 1, MessageFlags::DONT_LOOPBACK)), AddOutcome::Added { deliver_now: false });
        assert_eq!(table.add(msg_with(own, 1, 2, MessageFlags::OOB | MessageFlags::DONT_LOOPBACK)), AddOutcome::Added { deliver_now: false });
        table.add(msg_with(own, 1, 3, MessageFlags::empty()));
        assert_eq!(deliver_all(&mut table), vec![3]);
        assert_eq!(table.high_delivered(), 3);
    }

    #[test]
    fn test_point_to_point_retention_table() {
        let stream = StreamId::point_to_point(myself(), other());
        let mut table = SenderTable::new(&config(), stream, 1);
        table.add(msg_with(stream, 1, 1, MessageFlags::empty()));
        assert_eq!(table.add(msg_with(stream, 1, 2, MessageFlags::OOB)), AddOutcome::Added { deliver_now: false });
        assert!(deliver_all(&mut table).is_empty());
        assert_eq!(table.high_delivered(), 2);

        let (retained, purged) = table.messages_in_range(SeqnoRange::new(1, 2));
        assert_eq!(seqnos(&retained), vec![1, 2]);
        assert!(purged.is_none());
    }

    #[test]
    fn test_delivery_flag() {
        let mut table = table_with(&[1]);
        assert!(table.begin_delivery());
        assert!(!table.begin_delivery());
        assert_eq!(seqnos(&table.take_ready()), vec![1]);
        table.add(msg(2));
        assert!(!table.begin_delivery());
        assert_eq!(seqnos(&table.take_ready()), vec![2]);
        assert!(table.take_ready().is_empty());
        assert!(table.begin_delivery());
    }

    #[test]
    fn test_epochs() {
        let mut table = table_with(&[1, 2, 3]);
        deliver_all(&mut table);

        let new_epoch = msg_with(StreamId::multicast(other()), 2, 1, MessageFlags::empty());
        assert_eq!(table.add(new_epoch), AddOutcome::Added { deliver_now: false });
        assert_eq!(table.epoch(), 2);
        assert_eq!(table.high_received(), 1);
        assert_eq!(deliver_all(&mut table), vec![1]);

        assert_eq!(table.add(msg(4)), AddOutcome::Stale);
    }

    #[rstest]
    #[case::none(&[1, 2, 3], 10, vec![])]
    #[case::single(&[1, 3], 10, vec![SeqnoRange::new(2, 2)])]
    #[case::several(&[2, 5, 6, 9], 10, vec![SeqnoRange::new(1, 1), SeqnoRange::new(3, 4), SeqnoRange::new(7, 8)])]
    #[case::limited(&[2, 5, 6, 9], 2, vec![SeqnoRange::new(1, 1), SeqnoRange::new(3, 4)])]
    fn test_missing_ranges(#[case] received: &[u64], #[case] max_ranges: usize, #[case] expected: Vec<SeqnoRange>) {
        let mut table = table_with(received);
        deliver_all(&mut table);
        assert_eq!(table.missing_ranges(max_ranges), expected);
    }

    #[test]
    fn test_missing_ranges_up_to_high_received() {
        let mut table = table_with(&[1]);
        table.merge_digest(&DigestEntry { epoch: 1, low: 0, high_delivered: 0, high_received: 4 });
        deliver_all(&mut table);
        assert_eq!(table.missing_ranges(10), vec![SeqnoRange::new(2, 4)]);
    }

    #[rstest]
    #[case::nothing_delivered(&[2, 3], 5, 0, 0, 2)]
    #[case::partially(&[1, 2, 3, 5], 2, 2, 2, 2)]
    #[case::capped_at_delivered(&[1, 2, 3, 5], 10, 3, 3, 1)]
    #[case::noop(&[1, 2, 3], 0, 3, 0, 3)]
    fn test_purge(
        #[case] received: &[u64],
        #[case] up_to: u64,
        #[case] expected_purged: usize,
        #[case] expected_low: u64,
        #[case] expected_remaining: usize,
    ) {
        let mut table = table_with(received);
        deliver_all(&mut table);
        assert_eq!(table.purge(up_to), expected_purged);
        assert_eq!(table.low(), expected_low);
        assert_eq!(table.num_entries(), expected_remaining);
        assert!(table.high_delivered() >= table.low());
    }

    #[test]
    fn test_messages_in_range() {
        let mut table = table_with(&[1, 2, 3, 4, 6]);
        deliver_all(&mut table);
        table.purge(2);

        let (retained, purged) = table.messages_in_range(SeqnoRange::new(1, 10));
        assert_eq!(seqnos(&retained), vec![3, 4, 6]);
        assert_eq!(purged, Some(SeqnoRange::new(1, 2)));

        let (retained, purged) = table.messages_in_range(SeqnoRange::new(4, 4));
        assert_eq!(seqnos(&retained), vec![4]);
        assert_eq!(purged, None);

        let (retained, purged) = table.messages_in_range(SeqnoRange::new(7, 9));
        assert!(retained.is_empty());
        assert_eq!(purged, None);
    }

    #[test]
    fn test_merge_digest_seeds_table() {
        let mut table = table_with(&[8, 12]);
        assert!(table.merge_digest(&DigestEntry { epoch: 1, low: 3, high_delivered: 10, high_received: 11 }));
        assert_eq!(table.low(), 10);
        assert_eq!(table.high_delivered(), 10);
        assert_eq!(table.high_received(), 12);
        assert_eq!(table.num_entries(), 1);
        assert_eq!(table.missing_ranges(10), vec![SeqnoRange::new(11, 11)]);

        // messages the group delivered before are discarded
        assert_eq!(table.add(msg(9)), AddOutcome::Duplicate);
    }

    #[test]
    fn test_merge_digest_keeps_higher_watermark() {
        let mut table = table_with(&[1, 2, 3, 4, 5]);
        deliver_all(&mut table);
        table.purge(4);

        assert!(!table.merge_digest(&DigestEntry { epoch: 1, low: 0, high_delivered: 2, high_received: 3 }));
        assert_eq!(table.low(), 4);
        assert_eq!(table.high_delivered(), 5);
    }

    #[rstest]
    #[case::older_epoch(0, false, 1)]
    #[case::newer_epoch(2, true, 2)]
    fn test_merge_digest_epochs(#[case] digest_epoch: u64, #[case] expected_modified: bool, #[case] expected_epoch: u64) {
        let mut table = table_with(&[1, 2]);
        deliver_all(&mut table);
        assert_eq!(table.merge_digest(&DigestEntry { epoch: digest_epoch, low: 0, high_delivered: 1, high_received: 1 }), expected_modified);
        assert_eq!(table.epoch(), expected_epoch);
    }

    #[test]
    fn test_note_high_sent() {
        let mut table = table_with(&[1, 2]);
        deliver_all(&mut table);

        assert!(!table.note_high_sent(1, 2));
        assert!(!table.note_high_sent(0, 7));
        assert!(table.note_high_sent(1, 4));
        assert_eq!(table.missing_ranges(10), vec![SeqnoRange::new(3, 4)]);

        assert!(table.note_high_sent(2, 1));
        assert_eq!(table.epoch(), 2);
        assert_eq!(table.missing_ranges(10), vec![SeqnoRange::new(1, 1)]);
    }

    #[test]
    fn test_retransmit_tick() {
        let mut config = config();
        config.retransmit_backoff_initial_ticks = 2;
        config.retransmit_backoff_factor_eighths = 8;
        let mut table = SenderTable::new(&config, StreamId::multicast(other()), 1);
        assert_eq!(table.retransmit_tick(10, 100), RetransmitDecision::Idle);

        table.add(msg(1));
        table.add(msg(3));
        deliver_all(&mut table);

        let gap = vec![SeqnoRange::new(2, 2)];
        assert_eq!(table.retransmit_tick(10, 100), RetransmitDecision::Request(gap.clone()));
        assert_eq!(table.retransmit_tick(10, 100), RetransmitDecision::Wait);
        assert_eq!(table.retransmit_tick(10, 100), RetransmitDecision::Request(gap.clone()));

        table.add(msg(2));
        deliver_all(&mut table);
        assert_eq!(table.retransmit_tick(10, 100), RetransmitDecision::Idle);
    }

    #[test]
    fn test_retransmit_exhausted() {
        let mut config = config();
        config.retransmit_backoff_initial_ticks = 1;
        config.retransmit_backoff_factor_eighths = 8;
        let mut table = SenderTable::new(&config, StreamId::multicast(other()), 1);
        table.add(msg(2));

        let gap = vec![SeqnoRange::new(1, 1)];
        assert_eq!(table.retransmit_tick(10, 2), RetransmitDecision::Request(gap.clone()));
        assert_eq!(table.retransmit_tick(10, 2), RetransmitDecision::Request(gap.clone()));
        assert_eq!(table.retransmit_tick(10, 2), RetransmitDecision::Exhausted { attempts: 3, ranges: gap.clone() });
        assert_eq!(table.retransmit_tick(10, 2), RetransmitDecision::Request(gap));
    }

    #[test]
    fn test_unavailable_ranges() {
        let mut config = config();
        config.retransmit_backoff_initial_ticks = 1;
        config.retransmit_backoff_factor_eighths = 8;
        let mut table = SenderTable::new(&config, StreamId::multicast(other()), 1);
        table.add(msg(4));
        table.add(msg(7));
        deliver_all(&mut table);

        assert_eq!(table.mark_unavailable(&[SeqnoRange::new(1, 2)]), vec![SeqnoRange::new(1, 2)]);
        assert_eq!(table.retransmit_tick(10, 100), RetransmitDecision::Request(vec![SeqnoRange::new(3, 3), SeqnoRange::new(5, 6)]));
        assert_eq!(table.retransmit_tick(1, 100), RetransmitDecision::Request(vec![SeqnoRange::new(3, 3)]));

        assert_eq!(table.mark_unavailable(&[SeqnoRange::new(1, 3)]), vec![SeqnoRange::new(3, 3)]);
        assert!(table.mark_unavailable(&[SeqnoRange::new(2, 3)]).is_empty());
        assert_eq!(table.retransmit_tick(1, 100), RetransmitDecision::Request(vec![SeqnoRange::new(5, 6)]));

        table.mark_unavailable(&[SeqnoRange::new(5, 6)]);
        assert_eq!(table.retransmit_tick(10, 100), RetransmitDecision::Idle);
        assert_eq!(table.missing_ranges(10).len(), 2);

        // a new epoch starts over
        table.reset(2);
        assert_eq!(table.mark_unavailable(&[SeqnoRange::new(1, 2)]), vec![SeqnoRange::new(1, 2)]);
    }

    #[test]
    fn test_departure_reported_once() {
        let mut table = table_with(&[2]);
        assert!(table.mark_departure_reported());
        assert!(!table.mark_departure_reported());
    }
}
