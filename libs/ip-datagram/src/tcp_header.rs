use etherparse::TcpHeader;

const FIN: u8 = 0b0000_0001;
const SYN: u8 = 0b0000_0010;
const ACK: u8 = 0b0001_0000;

/// Read-only view over the fixed 20 bytes of a TCP header.
///
/// Unlike [`etherparse::TcpHeaderSlice`], this does not require the options announced by the data offset to be present.
/// Captures are frequently truncated and we still want the ports and the sequence number.
pub(crate) struct TcpHeaderView<'a> {
    slice: &'a [u8],
}

impl<'a> TcpHeaderView<'a> {
    pub(crate) fn from_slice(slice: &'a [u8]) -> Option<Self> {
        if slice.len() < TcpHeader::MIN_LEN {
            return None;
        }

        Some(Self { slice })
    }

    pub(crate) fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.slice[0], self.slice[1]])
    }

    pub(crate) fn destination_port(&self) -> u16 {
        u16::from_be_bytes([self.slice[2], self.slice[3]])
    }

    pub(crate) fn sequence_number(&self) -> u32 {
        u32::from_be_bytes([self.slice[4], self.slice[5], self.slice[6], self.slice[7]])
    }

    /// Length of the header including options, as announced by the data offset.
    pub(crate) fn header_len(&self) -> usize {
        usize::from(self.slice[12] >> 4) * 4
    }

    pub(crate) fn flags(&self) -> TcpFlags {
        let bits = self.slice[13];

        TcpFlags {
            syn: bits & SYN != 0,
            ack: bits & ACK != 0,
            fin: bits & FIN != 0,
        }
    }

    /// Everything after the announced header; empty if the announced header is longer than the capture.
    pub(crate) fn payload(&self) -> &'a [u8] {
        self.slice.get(self.header_len()..).unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
}
