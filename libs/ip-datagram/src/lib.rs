//! Decoding of captured IP datagrams into TCP segments.
//!
//! Only what is needed to demultiplex TCP streams is understood:
//!
//! - IPv4 with options; fragments other than the first are dropped.
//! - IPv6 fixed header; extension headers are not walked.
//! - The fixed part of the TCP header.
//!
//! Every rejection is silent from the caller's point of view: [`decode`] returns `None`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod flow_key;
mod tcp_header;

pub use flow_key::{AddressFamily, FlowKey};
pub use tcp_header::TcpFlags;

use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, Ipv6Header, Ipv6HeaderSlice, TcpHeader};
use std::net::IpAddr;
use tcp_header::TcpHeaderView;

/// A TCP segment, decoded from an IP datagram.
///
/// All fields are in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub key: FlowKey,
    pub seq: u32,
    pub flags: TcpFlags,
    pub payload: &'a [u8],
}

/// Decodes a captured IP datagram (link layer already stripped).
///
/// `datagram` holds exactly the captured bytes, which may be fewer than the datagram's declared length.
pub fn decode(datagram: &[u8]) -> Option<TcpSegment<'_>> {
    if datagram.len() < Ipv4Header::MIN_LEN {
        tracing::trace!(len = datagram.len(), "Cannot determine IP version of truncated datagram");
        return None;
    }

    match datagram[0] >> 4 {
        6 => decode_ipv6(datagram),
        _ => decode_ipv4(datagram),
    }
}

fn decode_ipv4(datagram: &[u8]) -> Option<TcpSegment<'_>> {
    let header = Ipv4HeaderSlice::from_slice(datagram)
        .inspect_err(|e| tracing::trace!("Dropping malformed IPv4 datagram: {e}"))
        .ok()?;

    if header.protocol() != IpNumber::TCP {
        tracing::trace!(protocol = ?header.protocol(), "Dropping non-TCP datagram");
        return None;
    }

    let total_len = usize::from(header.total_len());
    if datagram.len() < total_len {
        tracing::debug!(
            captured = datagram.len(),
            %total_len,
            "Captured only part of IP datagram"
        );
    }

    if header.fragments_offset().value() != 0 {
        tracing::debug!(
            src = %header.source_addr(),
            dst = %header.destination_addr(),
            offset = header.fragments_offset().value(),
            "Dropping IP fragment; reassembly is not supported"
        );
        return None;
    }

    let header_len = header.slice().len();
    if header_len > total_len {
        tracing::trace!(%header_len, %total_len, "Dropping IPv4 datagram with inconsistent length");
        return None;
    }

    let end = total_len.min(datagram.len());

    decode_tcp(
        header.source_addr().into(),
        header.destination_addr().into(),
        &datagram[header_len..end],
    )
}

fn decode_ipv6(datagram: &[u8]) -> Option<TcpSegment<'_>> {
    let header = Ipv6HeaderSlice::from_slice(datagram)
        .inspect_err(|e| tracing::trace!("Dropping malformed IPv6 datagram: {e}"))
        .ok()?;

    if header.next_header() != IpNumber::TCP {
        tracing::trace!(next_header = ?header.next_header(), "Dropping non-TCP datagram");
        return None;
    }

    let payload_len = usize::from(header.payload_length());
    if payload_len == 0 {
        tracing::trace!("Dropping IPv6 datagram without payload");
        return None;
    }

    let end = (Ipv6Header::LEN + payload_len).min(datagram.len());

    decode_tcp(
        header.source_addr().into(),
        header.destination_addr().into(),
        &datagram[Ipv6Header::LEN..end],
    )
}

fn decode_tcp(src: IpAddr, dst: IpAddr, segment: &[u8]) -> Option<TcpSegment<'_>> {
    let Some(tcp) = TcpHeaderView::from_slice(segment) else {
        tracing::trace!(len = segment.len(), "Dropping truncated TCP segment");
        return None;
    };

    if tcp.header_len() < TcpHeader::MIN_LEN {
        tracing::trace!(header_len = tcp.header_len(), "Dropping TCP segment with invalid data offset");
        return None;
    }

    Some(TcpSegment {
        key: FlowKey::new(src, dst, tcp.source_port(), tcp.destination_port()),
        seq: tcp.sequence_number(),
        flags: tcp.flags(),
        payload: tcp.payload(),
    })
}
