use anyhow::{anyhow, bail};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes};
use std::fmt::{Debug, Formatter};

use crate::messaging::node_addr::NodeAddr;
use crate::util::buf::{put_bytes, try_get_bytes};

bitflags! {
    /// Flags travel with a message on the wire. Unknown bits are ignored on reception.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u8 {
        /// out-of-band: delivered as soon as it is received, regardless of per-sender order
        const OOB = 0b0000_0001;
        /// the sending member does not deliver its own multicast message locally
        const DONT_LOOPBACK = 0b0000_0010;
    }
}

/// Point-to-point and multicast traffic can be configured with different delivery policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationClass {
    Multicast,
    PointToPoint,
}

/// Each sender has one sequence space for its multicast messages and one per destination for
///  its point-to-point messages. A [StreamId] identifies one such sequence space.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StreamId {
    pub sender: NodeAddr,
    pub dest: Option<NodeAddr>,
}
impl Debug for StreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.dest {
            None => write!(f, "{:?}->*", self.sender),
            Some(dest) => write!(f, "{:?}->{:?}", self.sender, dest),
        }
    }
}
impl StreamId {
    pub fn multicast(sender: NodeAddr) -> StreamId {
        StreamId { sender, dest: None }
    }

    pub fn point_to_point(sender: NodeAddr, dest: NodeAddr) -> StreamId {
        StreamId { sender, dest: Some(dest) }
    }

    pub fn destination_class(&self) -> DestinationClass {
        match self.dest {
            None => DestinationClass::Multicast,
            Some(_) => DestinationClass::PointToPoint,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        self.sender.ser(buf);
        match &self.dest {
            None => buf.put_u8(0),
            Some(dest) => {
                buf.put_u8(1);
                dest.ser(buf);
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<StreamId> {
        let sender = NodeAddr::try_deser(buf)?;
        let dest = match buf.try_get_u8()? {
            0 => None,
            1 => Some(NodeAddr::try_deser(buf)?),
            n => bail!("invalid destination discriminator: {}", n),
        };
        Ok(StreamId { sender, dest })
    }
}

/// An application message, tagged with the stream it belongs to and its position in that
///  stream. A message is immutable once it is sent, and retransmitted copies are identical to
///  the original.
#[derive(Clone, Eq, PartialEq)]
pub struct Message {
    pub sender: NodeAddr,
    /// `None` for multicast messages
    pub dest: Option<NodeAddr>,
    pub epoch: u64,
    pub seqno: u64,
    pub flags: MessageFlags,
    pub payload: Bytes,
}
impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message{{{:?} e{} #{} {:?} len={}}}", self.stream_id(), self.epoch, self.seqno, self.flags, self.payload.len())
    }
}

impl Message {
    pub fn stream_id(&self) -> StreamId {
        StreamId {
            sender: self.sender,
            dest: self.dest,
        }
    }

    pub fn is_oob(&self) -> bool {
        self.flags.contains(MessageFlags::OOB)
    }

    pub fn destination_class(&self) -> DestinationClass {
        self.stream_id().destination_class()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        self.stream_id().ser(buf);
        buf.put_u64(self.epoch);
        buf.put_u64(self.seqno);
        buf.put_u8(self.flags.bits());
        put_bytes(buf, &self.payload);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Message> {
        let stream = StreamId::try_deser(buf)?;
        let epoch = buf.try_get_u64()?;
        let seqno = buf.try_get_u64()?;
        if seqno == 0 {
            bail!("sequence numbers start at 1");
        }
        let flags = MessageFlags::from_bits_truncate(buf.try_get_u8()?);
        let payload = try_get_bytes(buf)?;

        Ok(Message {
            sender: stream.sender,
            dest: stream.dest,
            epoch,
            seqno,
            flags,
            payload,
        })
    }
}

/// An ordered, non-empty run of messages of a single stream, delivered to the application in a
///  single call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageBatch {
    stream: StreamId,
    messages: Vec<Message>,
}
impl MessageBatch {
    pub fn new(messages: Vec<Message>) -> anyhow::Result<MessageBatch> {
        let stream = messages.first()
            .ok_or_else(|| anyhow!("a message batch must not be empty"))?
            .stream_id();

        if messages.iter().any(|m| m.stream_id() != stream) {
            bail!("all messages in a batch must belong to the same stream");
        }
        Ok(MessageBatch { stream, messages })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream
    }

    pub fn sender(&self) -> NodeAddr {
        self.stream.sender
    }

    pub fn destination_class(&self) -> DestinationClass {
        self.stream.destination_class()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl IntoIterator for MessageBatch {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
