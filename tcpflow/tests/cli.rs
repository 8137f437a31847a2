#![allow(clippy::unwrap_used)]

use etherparse::PacketBuilder;
use pcap_file::DataLink;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use std::fs::File;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const CLIENT: ([u8; 4], u16) = ([10, 0, 0, 1], 1234);
const SERVER: ([u8; 4], u16) = ([10, 0, 0, 2], 80);

const CLIENT_FILE: &str = "010.000.000.001.01234-010.000.000.002.00080";
const SERVER_FILE: &str = "010.000.000.002.00080-010.000.000.001.01234";

#[derive(Clone, Copy)]
enum Kind {
    Syn,
    SynAck,
    Data,
    Fin,
}

fn frame(from: ([u8; 4], u16), to: ([u8; 4], u16), seq: u32, kind: Kind, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
        .ipv4(from.0, to.0, 64)
        .tcp(from.1, to.1, seq, 65535);
    let builder = match kind {
        Kind::Syn => builder.syn(),
        Kind::SynAck => builder.syn().ack(1),
        Kind::Data => builder.ack(1),
        Kind::Fin => builder.ack(1).fin(),
    };

    let mut buf = Vec::new();
    builder.write(&mut buf, payload).unwrap();

    buf
}

fn write_capture(path: &Path, frames: &[Vec<u8>]) {
    let header = PcapHeader {
        datalink: DataLink::ETHERNET,
        ..PcapHeader::default()
    };
    let mut writer = PcapWriter::with_header(File::create(path).unwrap(), header).unwrap();

    for (i, frame) in frames.iter().enumerate() {
        let timestamp = Duration::from_secs(1_700_000_000 + i as u64);

        writer
            .write_packet(&PcapPacket::new(timestamp, frame.len() as u32, frame))
            .unwrap();
    }
}

fn conversation() -> Vec<Vec<u8>> {
    vec![
        frame(CLIENT, SERVER, 100, Kind::Syn, b""),
        frame(SERVER, CLIENT, 500, Kind::SynAck, b""),
        frame(CLIENT, SERVER, 101, Kind::Data, b"hello"),
        frame(SERVER, CLIENT, 501, Kind::Data, b"world"),
        frame(CLIENT, SERVER, 106, Kind::Fin, b""),
        frame(SERVER, CLIENT, 506, Kind::Fin, b""),
    ]
}

fn tcpflow(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tcpflow"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("TCPFLOW_OUTDIR")
        .env_remove("TCPFLOW_LOCK")
        .env_remove("TCPFLOW_LOG_JSON")
        .output()
        .unwrap()
}

fn read_report(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn reconstructs_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("conversation.pcap");
    let outdir = dir.path().join("out");
    write_capture(&capture, &conversation());

    let output = tcpflow(&[
        "-r",
        capture.to_str().unwrap(),
        "-o",
        outdir.to_str().unwrap(),
        "-F",
        "M",
    ]);

    assert!(output.status.success(), "{output:?}");
    assert_eq!(std::fs::read(outdir.join(CLIENT_FILE)).unwrap(), b"hello");
    assert_eq!(std::fs::read(outdir.join(SERVER_FILE)).unwrap(), b"world");

    let report = read_report(&outdir.join("report.json"));
    let flows = report["flows"].as_array().unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(report["totals"]["flows"], 2);
    assert_eq!(report["totals"]["packets"], 6);

    let client = flows
        .iter()
        .find(|flow| flow["src_port"] == 1234)
        .unwrap();
    assert_eq!(client["bytes"], 5);
    assert_eq!(client["packets"], 3);
    assert_eq!(client["isn"], 100);
    assert_eq!(client["retired"], "fin");
    assert_eq!(
        client["digests"]["sha256"],
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

#[test]
fn finish_only_capture_does_not_create_flows() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("conversation.pcap");
    let outdir = dir.path().join("out");
    let report = dir.path().join("custom-report.json");
    write_capture(&capture, &conversation());

    let output = tcpflow(&[
        "-R",
        capture.to_str().unwrap(),
        "-o",
        outdir.to_str().unwrap(),
        "-X",
        report.to_str().unwrap(),
    ]);

    assert!(output.status.success(), "{output:?}");
    assert!(!outdir.join(CLIENT_FILE).exists());
    assert!(!outdir.join("report.json").exists());

    let report = read_report(&report);
    assert_eq!(report["flows"].as_array().unwrap().len(), 0);
    assert_eq!(report["totals"]["unknown_flow_drops"], 6);
}

#[test]
fn missing_capture_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = tcpflow(&[
        "-r",
        dir.path().join("missing.pcap").to_str().unwrap(),
        "-o",
        dir.path().to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.pcap"));
}

#[test]
fn unreadable_capture_still_reports_earlier_flows() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("conversation.pcap");
    let outdir = dir.path().join("out");
    let mut unfinished = conversation();
    unfinished.truncate(4);
    write_capture(&capture, &unfinished);

    let output = tcpflow(&[
        "-r",
        capture.to_str().unwrap(),
        "-r",
        dir.path().join("missing.pcap").to_str().unwrap(),
        "-o",
        outdir.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.pcap"));
    assert_eq!(std::fs::read(outdir.join(CLIENT_FILE)).unwrap(), b"hello");

    let report = read_report(&outdir.join("report.json"));
    let flows = report["flows"].as_array().unwrap();
    assert_eq!(flows.len(), 2);
    assert!(flows.iter().all(|flow| flow["retired"] == "shutdown"));
}

#[test]
fn no_output_still_reports_flows() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("conversation.pcap");
    let outdir = dir.path().join("out");
    write_capture(&capture, &conversation());

    let output = tcpflow(&[
        "-r",
        capture.to_str().unwrap(),
        "-o",
        outdir.to_str().unwrap(),
        "-F",
        "X",
    ]);

    assert!(output.status.success(), "{output:?}");
    assert!(!outdir.join(CLIENT_FILE).exists());

    let report = read_report(&outdir.join("report.json"));
    let flows = report["flows"].as_array().unwrap();
    assert_eq!(flows.len(), 2);
    assert!(flows.iter().all(|flow| flow["path"].is_null()));
}
