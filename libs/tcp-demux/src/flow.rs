use chrono::{DateTime, Utc};
use std::fmt;

/// Creation order of a stream within one run.
///
/// Unique across all streams, including successive instances of the same [`FlowKey`](ip_datagram::FlowKey).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub(crate) fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadata of one half-duplex flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub id: StreamId,
    pub vlan: Option<u16>,
    pub start: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub packets: u64,
    /// How many earlier instances of the same 5-tuple were retired because of a sequence discontinuity.
    pub connection_count: u64,
}

impl FlowRecord {
    pub(crate) fn new(
        id: StreamId,
        vlan: Option<u16>,
        now: DateTime<Utc>,
        connection_count: u64,
    ) -> Self {
        Self {
            id,
            vlan,
            start: now,
            last_seen: now,
            packets: 0,
            connection_count,
        }
    }

    pub(crate) fn on_packet(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
        self.packets += 1;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Unknown,
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Unknown => f.write_str("unknown"),
            Direction::ClientToServer => f.write_str("client-to-server"),
            Direction::ServerToClient => f.write_str("server-to-client"),
        }
    }
}
