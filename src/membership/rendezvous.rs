//! Message kinds exchanged with a rendezvous service (discovery of peers by group name). The
//!  rendezvous protocol itself lives outside the delivery core, but its header is shared.

use anyhow::bail;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::messaging::node_addr::NodeAddr;
use crate::util::buf::{put_string, try_get_string};

/// The wire codes are explicit and stable. New kinds get new codes, existing codes are never
///  re-used or re-ordered.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum RendezvousKind {
    Register = 1,
    Unregister = 2,
    GetMembers = 3,
    GetMembersResponse = 4,
    Message = 5,
    /// request *and* response
    Heartbeat = 6,
    Suspect = 7,
    /// the last of a sequence of [RendezvousKind::GetMembersResponse]s
    GetMembersResponseLast = 8,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RendezvousHeader {
    pub kind: RendezvousKind,
    pub group: String,
    pub addr: Option<NodeAddr>,
}
impl RendezvousHeader {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind.into());
        put_string(buf, &self.group);
        match &self.addr {
            None => buf.put_u8(0),
            Some(addr) => {
                buf.put_u8(1);
                addr.ser(buf);
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<RendezvousHeader> {
        let kind = RendezvousKind::try_from_primitive(buf.try_get_u8()?)?;
        let group = try_get_string(buf)?;
        let addr = match buf.try_get_u8()? {
            0 => None,
            1 => Some(NodeAddr::try_deser(buf)?),
            n => bail!("invalid address discriminator: {}", n),
        };
        Ok(RendezvousHeader { kind, group, addr })
    }
}
