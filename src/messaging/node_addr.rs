use anyhow::anyhow;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};


/// The address of a cluster member. It is opaque to the delivery core apart from being
///  comparable, hashable and totally ordered.
///
/// A member that restarts on the same network address must not be confused with its previous
///  incarnation, so a `unique` part is added to the network address (initialized with the
///  milliseconds since epoch when created from a plain socket address).
///
/// NB: Restarting a member is something different from reconnecting the sender of a member:
///      the latter keeps the address and starts a new epoch (see [crate::nakack::sequencer])
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeAddr {
    pub unique: u64,
    pub socket_addr: SocketAddr,
}
impl Hash for NodeAddr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique.hash(state);
        match self.socket_addr {
            SocketAddr::V4(s) => s.ip().to_bits().hash(state),
            SocketAddr::V6(s) => s.ip().to_bits().hash(state),
        };
        self.socket_addr.port().hash(state);
    }
}

impl Debug for NodeAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}@{}]", self.socket_addr, self.unique)
    }
}

impl NodeAddr {
    /// all members on the same loopback port, told apart by their `unique` part
    pub fn localhost(unique: u64) -> NodeAddr {
        NodeAddr {
            unique,
            socket_addr: SocketAddr::from(([127, 0, 0, 1], 16385)),
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.unique);

        match &self.socket_addr {
            SocketAddr::V4(data) => {
                buf.put_u8(4);
                buf.put_u32(data.ip().to_bits());
                buf.put_u16(data.port());
            }
            SocketAddr::V6(data) => {
                buf.put_u8(6);
                buf.put_u128(data.ip().to_bits());
                buf.put_u16(data.port());
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<NodeAddr> {
        let unique = buf.try_get_u64()?;

        let addr = match buf.try_get_u8()? {
            4 => {
                let ip = buf.try_get_u32()?;
                let port = buf.try_get_u16()?;
                SocketAddr::V4(SocketAddrV4::new(ip.into(), port))
            }
            6 => {
                let ip = buf.try_get_u128()?;
                let port = buf.try_get_u16()?;
                SocketAddr::V6(SocketAddrV6::new(ip.into(), port, 0, 0))
            }
            n => {
                return Err(anyhow!("invalid socket address discriminator: {}", n));
            }
        };
        Ok(NodeAddr {
            unique,
            socket_addr: addr,
        })
    }
}

impl From<SocketAddr> for NodeAddr {
    fn from(addr: SocketAddr) -> Self {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        NodeAddr {
            unique,
            socket_addr: addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::messaging::node_addr::NodeAddr;
    use bytes::BytesMut;
    use rstest::rstest;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[rstest]
    #[case(NodeAddr { unique: 5, socket_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9876).into() })]
    #[case(NodeAddr { unique: 758964, socket_addr: "4.5.6.7:89".parse().unwrap() })]
    #[case(NodeAddr { unique: u64::MAX, socket_addr: "[2001:db8::1]:8080".parse().unwrap() })]
    fn test_ser_deser(#[case] addr: NodeAddr) {
        let mut buf = BytesMut::new();
        addr.ser(&mut buf);
        let deser = NodeAddr::try_deser(&mut buf);
        assert_eq!(deser.unwrap(), addr);
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_unique(vec![0,0,0,0,0,0,1])]
    #[case::invalid_discriminator(vec![0,0,0,0,0,0,0,1, 5, 1,2,3,4, 0,1])]
    #[case::truncated_port(vec![0,0,0,0,0,0,0,1, 4, 1,2,3,4, 0])]
    fn test_deser_invalid(#[case] buf: Vec<u8>) {
        let mut buf = buf.as_slice();
        assert!(NodeAddr::try_deser(&mut buf).is_err());
    }

    #[test]
    fn test_ordering_includes_unique_part() {
        let a = NodeAddr::localhost(1);
        let b = NodeAddr::localhost(2);
        assert!(a < b);
        assert_ne!(a, b);
    }
}
