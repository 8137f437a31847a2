use std::fmt;
use std::net::IpAddr;

/// Identity of one direction of a TCP connection.
///
/// Two keys that mirror each other (source and destination swapped) are different flows.
/// A TCP connection is therefore tracked as two independent [`FlowKey`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    src: IpAddr,
    dst: IpAddr,
    src_port: u16,
    dst_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    V4,
    V6,
}

impl FlowKey {
    pub fn new(src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16) -> Self {
        debug_assert_eq!(
            src.is_ipv4(),
            dst.is_ipv4(),
            "source and destination must be of the same address family"
        );

        Self {
            src,
            dst,
            src_port,
            dst_port,
        }
    }

    pub fn src(&self) -> IpAddr {
        self.src
    }

    pub fn dst(&self) -> IpAddr {
        self.dst
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    pub fn family(&self) -> AddressFamily {
        match self.src {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// The key of the opposite direction of the same connection.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family() {
            AddressFamily::V4 => write!(
                f,
                "{}:{} -> {}:{}",
                self.src, self.src_port, self.dst, self.dst_port
            ),
            AddressFamily::V6 => write!(
                f,
                "[{}]:{} -> [{}]:{}",
                self.src, self.src_port, self.dst, self.dst_port
            ),
        }
    }
}
