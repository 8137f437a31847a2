//! Reading IP datagrams from pcap capture files.
//!
//! Live capture from network interfaces is not supported.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod link;

pub use link::{Frame, is_supported, strip};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use pcap_file::DataLink;
use pcap_file::pcap::PcapReader;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A captured IP datagram with its link layer removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub timestamp: DateTime<Utc>,
    pub datagram: Vec<u8>,
    pub vlan: Option<u16>,
}

/// Iterates the IP datagrams of a pcap file.
pub struct PcapSource {
    path: PathBuf,
    reader: PcapReader<BufReader<File>>,
    datalink: DataLink,
    frames: u64,
    skipped: u64,
}

impl PcapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let reader = PcapReader::new(BufReader::new(file))
            .with_context(|| format!("Failed to read pcap header of {}", path.display()))?;
        let datalink = reader.header().datalink;

        if !link::is_supported(datalink) {
            tracing::warn!(path = %path.display(), ?datalink, "Unsupported link type; all frames will be skipped");
        }

        tracing::debug!(path = %path.display(), ?datalink, "Opened capture file");

        Ok(Self {
            path: path.to_owned(),
            reader,
            datalink,
            frames: 0,
            skipped: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn datalink(&self) -> DataLink {
        self.datalink
    }

    /// Frames read so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames that did not carry an IP datagram.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Reads the next IP datagram, skipping frames that don't carry one.
    pub fn next_datagram(&mut self) -> Option<Result<Captured>> {
        loop {
            let packet = match self.reader.next_packet()? {
                Ok(packet) => packet,
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e).context(format!(
                        "Failed to read packet from {}",
                        self.path.display()
                    ))));
                }
            };
            self.frames += 1;

            let Some(frame) = link::strip(self.datalink, &packet.data) else {
                self.skipped += 1;
                continue;
            };

            return Some(Ok(Captured {
                timestamp: to_datetime(packet.timestamp),
                datagram: frame.datagram.to_vec(),
                vlan: frame.vlan,
            }));
        }
    }
}

impl Iterator for PcapSource {
    type Item = Result<Captured>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_datagram()
    }
}

fn to_datetime(since_epoch: Duration) -> DateTime<Utc> {
    i64::try_from(since_epoch.as_secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, since_epoch.subsec_nanos()))
        .unwrap_or_default()
}
