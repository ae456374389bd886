//! A digest is a per-stream summary of a member's tables. Digests are exchanged in stability
//!  rounds and handed to joining members so they know where to start delivering.

use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use std::collections::BTreeMap;

use crate::messaging::message::StreamId;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DigestEntry {
    pub epoch: u64,
    /// everything up to and including `low` was purged
    pub low: u64,
    pub high_delivered: u64,
    pub high_received: u64,
}
impl DigestEntry {
    fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.epoch);
        buf.put_u64_varint(self.low);
        buf.put_u64_varint(self.high_delivered);
        buf.put_u64_varint(self.high_received);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<DigestEntry> {
        Ok(DigestEntry {
            epoch: buf.try_get_u64()?,
            low: buf.try_get_u64_varint()?,
            high_delivered: buf.try_get_u64_varint()?,
            high_received: buf.try_get_u64_varint()?,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Digest {
    entries: BTreeMap<StreamId, DigestEntry>,
}
impl Digest {
    pub fn insert(&mut self, stream: StreamId, entry: DigestEntry) {
        self.entries.insert(stream, entry);
    }

    pub fn get(&self, stream: &StreamId) -> Option<&DigestEntry> {
        self.entries.get(stream)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StreamId, &DigestEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_usize_varint(self.entries.len());
        for (stream, entry) in &self.entries {
            stream.ser(buf);
            entry.ser(buf);
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Digest> {
        let num_entries = buf.try_get_usize_varint()?;
        let mut entries = BTreeMap::new();
        for _ in 0..num_entries {
            let stream = StreamId::try_deser(buf)?;
            let entry = DigestEntry::try_deser(buf)?;
            entries.insert(stream, entry);
        }
        Ok(Digest { entries })
    }
}
