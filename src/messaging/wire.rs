//! Framing and encoding of the protocol data units exchanged between members.
//!
//! All numbers are in network byte order (BE). A frame looks like this:
//!
//! ```ascii
//! 0: protocol version (u8)
//! 1: checksum (u64): CRC-64 of everything after the checksum
//! 9: PDU kind (u8), followed by the PDU's content
//! ```
//!
//! PDU kinds have stable, explicit codes - they are part of the wire format and must never be
//!  derived from declaration order.

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use crc::{Crc, CRC_64_REDIS};

use crate::messaging::message::{Message, MessageBatch, StreamId};
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::transport::{Transport, TransportError};
use crate::nakack::digest::Digest;
use crate::nakack::seqno_range::SeqnoRange;

pub const PROTOCOL_VERSION: u8 = 1;

const CHECKSUM: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

const ID_DATA: u8 = 1;
const ID_BATCH: u8 = 2;
const ID_RETRANSMIT_REQUEST: u8 = 3;
const ID_RETRANSMIT_UNAVAILABLE: u8 = 4;
const ID_STABILITY_DIGEST: u8 = 5;
const ID_DIGEST_REQUEST: u8 = 6;
const ID_DIGEST_RESPONSE: u8 = 7;

/// A request to re-send the given (inclusive) ranges of a stream, sent to the stream's sender.
///  The same structure is used by the sender to report ranges that are not available any more.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetransmitRequest {
    pub stream: StreamId,
    pub epoch: u64,
    pub ranges: Vec<SeqnoRange>,
}
impl RetransmitRequest {
    fn ser(&self, buf: &mut impl BufMut) {
        self.stream.ser(buf);
        buf.put_u64(self.epoch);
        buf.put_usize_varint(self.ranges.len());
        for range in &self.ranges {
            range.ser(buf);
        }
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<RetransmitRequest> {
        let stream = StreamId::try_deser(buf)?;
        let epoch = buf.try_get_u64()?;
        let num_ranges = buf.try_get_usize_varint()?;
        let mut ranges = Vec::new();
        for _ in 0..num_ranges {
            ranges.push(SeqnoRange::try_deser(buf)?);
        }
        Ok(RetransmitRequest { stream, epoch, ranges })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NakAckPdu {
    Data(Message),
    /// several messages of the same stream, e.g. a response to a retransmit request
    Batch(MessageBatch),
    RetransmitRequest(RetransmitRequest),
    RetransmitUnavailable(RetransmitRequest),
    /// the sender's local digest, sent periodically for stability rounds
    StabilityDigest(Digest),
    /// sent by a joining member, carrying the epoch it connected in
    DigestRequest(u64),
    DigestResponse(Digest),
}

impl NakAckPdu {
    pub fn id(&self) -> u8 {
        match self {
            NakAckPdu::Data(_) => ID_DATA,
            NakAckPdu::Batch(_) => ID_BATCH,
            NakAckPdu::RetransmitRequest(_) => ID_RETRANSMIT_REQUEST,
            NakAckPdu::RetransmitUnavailable(_) => ID_RETRANSMIT_UNAVAILABLE,
            NakAckPdu::StabilityDigest(_) => ID_STABILITY_DIGEST,
            NakAckPdu::DigestRequest(_) => ID_DIGEST_REQUEST,
            NakAckPdu::DigestResponse(_) => ID_DIGEST_RESPONSE,
        }
    }

    /// serialize the PDU into a complete frame, including version and checksum
    pub fn to_frame(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u64(0); // placeholder for the checksum

        buf.put_u8(self.id());
        match self {
            NakAckPdu::Data(msg) => msg.ser(&mut buf),
            NakAckPdu::Batch(batch) => {
                buf.put_usize_varint(batch.len());
                for msg in batch.iter() {
                    msg.ser(&mut buf);
                }
            }
            NakAckPdu::RetransmitRequest(req) => req.ser(&mut buf),
            NakAckPdu::RetransmitUnavailable(req) => req.ser(&mut buf),
            NakAckPdu::StabilityDigest(digest) => digest.ser(&mut buf),
            NakAckPdu::DigestRequest(epoch) => buf.put_u64(*epoch),
            NakAckPdu::DigestResponse(digest) => digest.ser(&mut buf),
        }

        let checksum = CHECKSUM.checksum(&buf[9..]);
        (&mut buf[1..9]).put_u64(checksum);
        buf
    }

    pub fn try_from_frame(frame: &[u8]) -> anyhow::Result<NakAckPdu> {
        let mut buf = frame;
        let version = buf.try_get_u8()?;
        if version != PROTOCOL_VERSION {
            bail!("unsupported protocol version {}", version);
        }
        let checksum = buf.try_get_u64()?;
        if CHECKSUM.checksum(buf) != checksum {
            bail!("checksum error");
        }

        let pdu = match buf.try_get_u8()? {
            ID_DATA => NakAckPdu::Data(Message::try_deser(&mut buf)?),
            ID_BATCH => {
                let len = buf.try_get_usize_varint()?;
                let mut messages = Vec::new();
                for _ in 0..len {
                    messages.push(Message::try_deser(&mut buf)?);
                }
                NakAckPdu::Batch(MessageBatch::new(messages)?)
            }
            ID_RETRANSMIT_REQUEST => NakAckPdu::RetransmitRequest(RetransmitRequest::try_deser(&mut buf)?),
            ID_RETRANSMIT_UNAVAILABLE => NakAckPdu::RetransmitUnavailable(RetransmitRequest::try_deser(&mut buf)?),
            ID_STABILITY_DIGEST => NakAckPdu::StabilityDigest(Digest::try_deser(&mut buf)?),
            ID_DIGEST_REQUEST => NakAckPdu::DigestRequest(buf.try_get_u64()?),
            ID_DIGEST_RESPONSE => NakAckPdu::DigestResponse(Digest::try_deser(&mut buf)?),
            id => return Err(anyhow!("invalid PDU discriminator {}", id)),
        };

        if buf.has_remaining() {
            bail!("{} trailing bytes after PDU", buf.remaining());
        }
        Ok(pdu)
    }

    /// `to` is `None` for multicast
    pub async fn send(&self, transport: &dyn Transport, to: Option<NodeAddr>) -> Result<(), TransportError> {
        transport.send(to, &self.to_frame()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::MessageFlags;
    use crate::messaging::transport::MockTransport;
    use crate::nakack::digest::DigestEntry;
    use bytes::Bytes;
    use rstest::rstest;

    fn msg(seqno: u64, flags: MessageFlags) -> Message {
        Message {
            sender: NodeAddr::localhost(1),
            dest: None,
            epoch: 5,
            seqno,
            flags,
            payload: Bytes::from(vec![seqno as u8; 3]),
        }
    }

    fn digest() -> Digest {
        let mut digest = Digest::default();
        digest.insert(StreamId::multicast(NodeAddr::localhost(1)), DigestEntry { epoch: 5, low: 2, high_delivered: 7, high_received: 9 });
        digest.insert(StreamId::point_to_point(NodeAddr::localhost(2), NodeAddr::localhost(1)), DigestEntry { epoch: 1, low: 0, high_delivered: 0, high_received: 3 });
        digest
    }

    fn request() -> RetransmitRequest {
        RetransmitRequest {
            stream: StreamId::multicast(NodeAddr::localhost(3)),
            epoch: 12,
            ranges: vec![SeqnoRange::new(3, 3), SeqnoRange::new(5, 9)],
        }
    }

    #[rstest]
    #[case::data(NakAckPdu::Data(msg(1, MessageFlags::OOB)), ID_DATA)]
    #[case::batch(NakAckPdu::Batch(MessageBatch::new(vec![msg(1, MessageFlags::empty()), msg(2, MessageFlags::empty())]).unwrap()), ID_BATCH)]
    #[case::retransmit_request(NakAckPdu::RetransmitRequest(request()), ID_RETRANSMIT_REQUEST)]
    #[case::retransmit_unavailable(NakAckPdu::RetransmitUnavailable(request()), ID_RETRANSMIT_UNAVAILABLE)]
    #[case::stability_digest(NakAckPdu::StabilityDigest(digest()), ID_STABILITY_DIGEST)]
    #[case::empty_digest(NakAckPdu::StabilityDigest(Digest::default()), ID_STABILITY_DIGEST)]
    #[case::digest_request(NakAckPdu::DigestRequest(1_700_000_000_123), ID_DIGEST_REQUEST)]
    #[case::digest_response(NakAckPdu::DigestResponse(digest()), ID_DIGEST_RESPONSE)]
    fn test_frame(#[case] pdu: NakAckPdu, #[case] id: u8) {
        assert_eq!(pdu.id(), id);

        let frame = pdu.to_frame();
        assert_eq!(frame[0], PROTOCOL_VERSION);
        assert_eq!(frame[9], id);
        assert_eq!(NakAckPdu::try_from_frame(&frame).unwrap(), pdu);
    }

    #[test]
    fn test_corrupted_frame_is_rejected() {
        let mut frame = NakAckPdu::Data(msg(4, MessageFlags::empty())).to_frame();
        let last = frame.len() - 1;
        frame[last] ^= 0x55;
        assert!(NakAckPdu::try_from_frame(&frame).is_err());
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let mut frame = NakAckPdu::DigestRequest(3).to_frame();
        frame[0] = PROTOCOL_VERSION + 1;
        assert!(NakAckPdu::try_from_frame(&frame).is_err());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::version_only(vec![PROTOCOL_VERSION])]
    fn test_truncated_frame_is_rejected(#[case] frame: Vec<u8>) {
        assert!(NakAckPdu::try_from_frame(&frame).is_err());
    }

    #[test]
    fn test_unknown_pdu_kind_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u64(CHECKSUM.checksum(&[99]));
        buf.put_u8(99);
        assert!(NakAckPdu::try_from_frame(&buf).is_err());
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u64(CHECKSUM.checksum(&[ID_DIGEST_REQUEST, 0]));
        buf.put_u8(ID_DIGEST_REQUEST);
        buf.put_u8(0);
        assert!(NakAckPdu::try_from_frame(&buf).is_err());
    }

    #[tokio::test]
    async fn test_send() {
        let pdu = NakAckPdu::RetransmitRequest(request());
        let frame = pdu.to_frame().to_vec();

        let mut transport = MockTransport::new();
        transport.expect_send()
            .withf(move |to, f| *to == Some(NodeAddr::localhost(3)) && f == frame.as_slice())
            .once()
            .returning(|_, _| Ok(()));

        pdu.send(&transport, Some(NodeAddr::localhost(3))).await.unwrap();
    }
}
