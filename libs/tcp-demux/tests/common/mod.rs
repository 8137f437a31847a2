#![allow(dead_code)]

use chrono::{DateTime, TimeZone as _, Utc};
use etherparse::PacketBuilder;
use ip_datagram::FlowKey;
use std::net::SocketAddrV4;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tcp_demux::{Config, Demultiplexer, FinalizedFlow, NoLock};

pub const CLIENT: &str = "10.0.0.1:1234";
pub const SERVER: &str = "10.0.0.2:80";

#[derive(Debug, Default, Clone, Copy)]
pub struct Flags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
}

pub const SYN: Flags = Flags {
    syn: true,
    ack: false,
    fin: false,
};
pub const ACK: Flags = Flags {
    syn: false,
    ack: true,
    fin: false,
};
pub const FIN: Flags = Flags {
    syn: false,
    ack: true,
    fin: true,
};

pub fn addr(s: &str) -> SocketAddrV4 {
    s.parse().unwrap()
}

pub fn key(src: &str, dst: &str) -> FlowKey {
    let src = addr(src);
    let dst = addr(dst);

    FlowKey::new((*src.ip()).into(), (*dst.ip()).into(), src.port(), dst.port())
}

/// Builds an IPv4/TCP datagram.
pub fn datagram(src: &str, dst: &str, seq: u32, flags: Flags, payload: &[u8]) -> Vec<u8> {
    let src = addr(src);
    let dst = addr(dst);

    let mut builder = PacketBuilder::ipv4(src.ip().octets(), dst.ip().octets(), 64).tcp(
        src.port(),
        dst.port(),
        seq,
        65535,
    );
    if flags.syn {
        builder = builder.syn();
    }
    if flags.ack {
        builder = builder.ack(1);
    }
    if flags.fin {
        builder = builder.fin();
    }

    let mut buf = Vec::new();
    builder.write(&mut buf, payload).unwrap();

    buf
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
}

pub fn demux(dir: &Path, config: Config, capacity: usize) -> Demultiplexer {
    Demultiplexer::new(
        dir,
        config,
        NonZeroUsize::new(capacity).unwrap(),
        Box::new(NoLock),
    )
}

/// Sends a segment from `src` to `dst`.
pub fn send(demux: &mut Demultiplexer, src: &str, dst: &str, seq: u32, flags: Flags, payload: &[u8]) {
    demux.process_datagram(now(), &datagram(src, dst, seq, flags, payload), None);
}

pub fn drain(demux: &mut Demultiplexer) -> Vec<FinalizedFlow> {
    std::iter::from_fn(|| demux.poll_finalized()).collect()
}

pub fn files(dir: &Path) -> Vec<PathBuf> {
    let mut files = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect::<Vec<_>>();
    files.sort();

    files
}

pub fn read(path: impl AsRef<Path>) -> Vec<u8> {
    std::fs::read(path).unwrap()
}
