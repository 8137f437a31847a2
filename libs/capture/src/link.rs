use etherparse::{
    EtherType, Ethernet2Header, Ethernet2HeaderSlice, LinuxSllHeaderSlice, LinuxSllProtocolType,
    SingleVlanHeader, SingleVlanHeaderSlice,
};
use pcap_file::DataLink;

const NULL_HEADER_LEN: usize = 4;

/// An IP datagram extracted from a link-layer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub datagram: &'a [u8],
    /// The innermost 802.1Q VLAN id.
    pub vlan: Option<u16>,
}

/// Whether frames of `datalink` can be stripped.
pub fn is_supported(datalink: DataLink) -> bool {
    matches!(
        datalink,
        DataLink::ETHERNET
            | DataLink::LINUX_SLL
            | DataLink::NULL
            | DataLink::LOOP
            | DataLink::RAW
            | DataLink::IPV4
            | DataLink::IPV6
    )
}

/// Strips the link-layer header of `frame`.
///
/// Returns `None` for frames that do not carry IP.
#[expect(
    clippy::wildcard_enum_match_arm,
    reason = "Most link types are not supported."
)]
pub fn strip(datalink: DataLink, frame: &[u8]) -> Option<Frame<'_>> {
    match datalink {
        DataLink::ETHERNET => strip_ethernet(frame),
        DataLink::LINUX_SLL => strip_linux_sll(frame),
        // The address family is in the byte order of the capturing host, so we go by the IP version instead.
        DataLink::NULL | DataLink::LOOP => untagged(frame.get(NULL_HEADER_LEN..)?),
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => untagged(frame),
        _ => None,
    }
}

fn strip_ethernet(frame: &[u8]) -> Option<Frame<'_>> {
    let ethernet = Ethernet2HeaderSlice::from_slice(frame)
        .inspect_err(|e| tracing::trace!("Skipping truncated Ethernet frame: {e}"))
        .ok()?;

    let mut ether_type = ethernet.ether_type();
    let mut rest = &frame[Ethernet2Header::LEN..];
    let mut vlan = None;

    while is_vlan_tag(ether_type) {
        let tag = SingleVlanHeaderSlice::from_slice(rest)
            .inspect_err(|e| tracing::trace!("Skipping truncated VLAN tag: {e}"))
            .ok()?;

        vlan = Some(tag.vlan_identifier().value());
        ether_type = tag.ether_type();
        rest = &rest[SingleVlanHeader::LEN..];
    }

    ip_payload(ether_type, rest, vlan)
}

fn strip_linux_sll(frame: &[u8]) -> Option<Frame<'_>> {
    let header = LinuxSllHeaderSlice::from_slice(frame)
        .inspect_err(|e| tracing::trace!("Skipping malformed Linux cooked capture frame: {e}"))
        .ok()?;

    let LinuxSllProtocolType::EtherType(ether_type) = header.protocol_type() else {
        return None;
    };

    ip_payload(ether_type, &frame[header.slice().len()..], None)
}

fn is_vlan_tag(ether_type: EtherType) -> bool {
    ether_type == EtherType::VLAN_TAGGED_FRAME
        || ether_type == EtherType::PROVIDER_BRIDGING
        || ether_type == EtherType::VLAN_DOUBLE_TAGGED_FRAME
}

fn ip_payload(ether_type: EtherType, payload: &[u8], vlan: Option<u16>) -> Option<Frame<'_>> {
    if ether_type != EtherType::IPV4 && ether_type != EtherType::IPV6 {
        tracing::trace!(?ether_type, "Skipping non-IP frame");

        return None;
    }

    Some(Frame {
        datagram: payload,
        vlan,
    })
}

fn untagged(datagram: &[u8]) -> Option<Frame<'_>> {
    match datagram.first()? >> 4 {
        4 | 6 => Some(Frame {
            datagram,
            vlan: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use test_case::test_case;

    fn ethernet_frame() -> Vec<u8> {
        let mut buf = Vec::new();
        PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(1, 2, 3, 1024)
            .write(&mut buf, b"data")
            .unwrap();

        buf
    }

    #[test]
    fn strips_ethernet() {
        let buf = ethernet_frame();

        let frame = strip(DataLink::ETHERNET, &buf).unwrap();

        assert_eq!(frame.datagram, &buf[14..]);
        assert_eq!(frame.vlan, None);
    }

    #[test]
    fn reports_innermost_vlan() {
        let buf = ethernet_frame();
        let mut tagged = buf[..12].to_vec();
        tagged.extend_from_slice(&[0x88, 0xA8, 0x00, 0x0A]); // Outer tag, VLAN 10.
        tagged.extend_from_slice(&[0x81, 0x00, 0x20, 0x2A]); // Inner tag, priority 1, VLAN 42.
        tagged.extend_from_slice(&buf[12..]);

        let frame = strip(DataLink::ETHERNET, &tagged).unwrap();

        assert_eq!(frame.vlan, Some(42));
        assert_eq!(frame.datagram, &buf[14..]);
    }

    #[test]
    fn skips_arp() {
        let mut buf = ethernet_frame();
        buf[12] = 0x08;
        buf[13] = 0x06;

        assert_eq!(strip(DataLink::ETHERNET, &buf), None);
    }

    #[test]
    fn strips_linux_cooked_capture() {
        let ethernet = ethernet_frame();
        let ip = &ethernet[14..];
        let mut buf = vec![0, 0, 0, 1, 0, 6, 1, 1, 1, 1, 1, 1, 0, 0, 0x08, 0x00];
        buf.extend_from_slice(ip);

        let frame = strip(DataLink::LINUX_SLL, &buf).unwrap();

        assert_eq!(frame.datagram, ip);
    }

    #[test_case(DataLink::NULL, &[2, 0, 0, 0]; "null little endian")]
    #[test_case(DataLink::LOOP, &[0, 0, 0, 2]; "loop")]
    #[test_case(DataLink::RAW, &[]; "raw")]
    fn strips_headerless_links(datalink: DataLink, header: &[u8]) {
        let ethernet = ethernet_frame();
        let ip = &ethernet[14..];
        let mut buf = header.to_vec();
        buf.extend_from_slice(ip);

        let frame = strip(datalink, &buf).unwrap();

        assert_eq!(frame.datagram, ip);
    }

    #[test]
    fn truncated_frames_are_skipped() {
        assert_eq!(strip(DataLink::ETHERNET, &[0; 13]), None);
        assert_eq!(
            strip(
                DataLink::ETHERNET,
                &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x81, 0x00, 0]
            ),
            None
        );
        assert_eq!(strip(DataLink::NULL, &[2, 0, 0, 0]), None);
    }

    #[test]
    fn unsupported_link_type() {
        assert!(!is_supported(DataLink::IEEE802_11));
        assert_eq!(strip(DataLink::IEEE802_11, &ethernet_frame()), None);
    }
}
