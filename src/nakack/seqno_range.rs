use anyhow::bail;
use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use std::fmt::{Debug, Formatter};

/// An inclusive range of sequence numbers
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SeqnoRange {
    pub from: u64,
    pub to: u64,
}
impl Debug for SeqnoRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.from == self.to {
            write!(f, "#{}", self.from)
        }
        else {
            write!(f, "#{}-{}", self.from, self.to)
        }
    }
}

impl SeqnoRange {
    pub fn new(from: u64, to: u64) -> SeqnoRange {
        assert!(from <= to, "invalid range {}-{}", from, to);
        SeqnoRange { from, to }
    }

    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn contains(&self, seqno: u64) -> bool {
        self.from <= seqno && seqno <= self.to
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> {
        self.from..=self.to
    }

    /// collapses an ascending sequence of numbers into ranges of consecutive numbers
    pub fn from_ascending(seqnos: impl IntoIterator<Item = u64>) -> Vec<SeqnoRange> {
        let mut result: Vec<SeqnoRange> = Vec::new();
        for seqno in seqnos {
            match result.last_mut() {
                Some(last) if last.to + 1 == seqno => last.to = seqno,
                _ => result.push(SeqnoRange::new(seqno, seqno)),
            }
        }
        result
    }

    /// The parts of this range that are not covered by any of `others`
    pub fn subtract(&self, others: &[SeqnoRange]) -> Vec<SeqnoRange> {
        let mut result = vec![*self];
        for other in others {
            let mut remaining = Vec::new();
            for r in result {
                if r.to < other.from || r.from > other.to {
                    remaining.push(r);
                    continue;
                }
                if r.from < other.from {
                    remaining.push(SeqnoRange::new(r.from, other.from - 1));
                }
                if r.to > other.to {
                    remaining.push(SeqnoRange::new(other.to + 1, r.to));
                }
            }
            result = remaining;
        }
        result
    }

    /// the length is encoded as a varint since ranges are typically short
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.from);
        buf.put_u64_varint(self.to - self.from);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<SeqnoRange> {
        let from = buf.try_get_u64()?;
        let len_minus_one = buf.try_get_u64_varint()?;
        let Some(to) = from.checked_add(len_minus_one) else {
            bail!("range {} + {} overflows", from, len_minus_one);
        };
        Ok(SeqnoRange { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::empty(vec![], vec![])]
    #[case::single(vec![4], vec![SeqnoRange::new(4, 4)])]
    #[case::consecutive(vec![4,5,6], vec![SeqnoRange::new(4, 6)])]
    #[case::gaps(vec![1,3,4,7], vec![SeqnoRange::new(1, 1), SeqnoRange::new(3, 4), SeqnoRange::new(7, 7)])]
    fn test_from_ascending(#[case] seqnos: Vec<u64>, #[case] expected: Vec<SeqnoRange>) {
        assert_eq!(SeqnoRange::from_ascending(seqnos), expected);
    }

    #[rstest]
    #[case(SeqnoRange::new(1, 1), 1)]
    #[case(SeqnoRange::new(3, 9), 7)]
    fn test_len(#[case] range: SeqnoRange, #[case] expected: u64) {
        assert_eq!(range.len(), expected);
        assert_eq!(range.iter().count() as u64, expected);
    }

    #[rstest]
    #[case::disjoint(vec![SeqnoRange::new(1, 2), SeqnoRange::new(9, 12)], vec![SeqnoRange::new(3, 8)])]
    #[case::prefix(vec![SeqnoRange::new(1, 4)], vec![SeqnoRange::new(5, 8)])]
    #[case::inner(vec![SeqnoRange::new(5, 6)], vec![SeqnoRange::new(3, 4), SeqnoRange::new(7, 8)])]
    #[case::several(vec![SeqnoRange::new(3, 3), SeqnoRange::new(8, 20)], vec![SeqnoRange::new(4, 7)])]
    #[case::covered(vec![SeqnoRange::new(2, 9)], vec![])]
    fn test_subtract(#[case] others: Vec<SeqnoRange>, #[case] expected: Vec<SeqnoRange>) {
        assert_eq!(SeqnoRange::new(3, 8).subtract(&others), expected);
    }

    #[rstest]
    #[case(SeqnoRange::new(1, 1))]
    #[case(SeqnoRange::new(1000, 1400))]
    #[case(SeqnoRange::new(u64::MAX, u64::MAX))]
    fn test_ser_deser(#[case] range: SeqnoRange) {
        let mut buf = BytesMut::new();
        range.ser(&mut buf);
        let mut b: &[u8] = &buf;
        assert_eq!(SeqnoRange::try_deser(&mut b).unwrap(), range);
    }

    #[test]
    fn test_deser_overflow() {
        let mut buf = BytesMut::new();
        buf.put_u64(u64::MAX);
        buf.put_u64_varint(1);
        let mut b: &[u8] = &buf;
        assert!(SeqnoRange::try_deser(&mut b).is_err());
    }

    #[test]
    #[should_panic]
    fn test_invalid_range() {
        SeqnoRange::new(5, 4);
    }
}
