//! The JSON report written at the end of a run.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tcp_demux::{FinalizedFlow, ProcessorOutput, Stats};

#[derive(Debug, Serialize)]
pub struct Report {
    tool: &'static str,
    version: &'static str,
    command_line: Vec<String>,
    started: DateTime<Utc>,
    finished: Option<DateTime<Utc>>,
    flows: Vec<FlowEntry>,
    totals: Totals,
}

#[derive(Debug, Serialize)]
struct FlowEntry {
    id: u64,
    path: Option<PathBuf>,
    src: IpAddr,
    src_port: u16,
    dst: IpAddr,
    dst_port: u16,
    vlan: Option<u16>,
    connection_count: u64,
    packets: u64,
    bytes: u64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    isn: u32,
    syn_count: u32,
    violations: u32,
    direction: String,
    retired: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    digests: BTreeMap<&'static str, String>,
}

#[derive(Debug, Default, Serialize)]
struct Totals {
    flows: u64,
    packets: u64,
    undecodable_datagrams: u64,
    unknown_flow_drops: u64,
}

impl Report {
    pub fn new(command_line: Vec<String>, started: DateTime<Utc>) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            command_line,
            started,
            finished: None,
            flows: Vec::new(),
            totals: Totals::default(),
        }
    }

    pub fn add_flow(&mut self, flow: &FinalizedFlow, outputs: Vec<ProcessorOutput>) {
        self.flows.push(FlowEntry {
            id: flow.record.id.as_u64(),
            path: flow.path.clone(),
            src: flow.key.src(),
            src_port: flow.key.src_port(),
            dst: flow.key.dst(),
            dst_port: flow.key.dst_port(),
            vlan: flow.record.vlan,
            connection_count: flow.record.connection_count,
            packets: flow.record.packets,
            bytes: flow.bytes,
            start: flow.record.start,
            end: flow.record.last_seen,
            isn: flow.isn,
            syn_count: flow.syn_count,
            violations: flow.violations,
            direction: flow.direction.to_string(),
            retired: flow.reason.to_string(),
            digests: outputs.into_iter().map(|o| (o.name, o.value)).collect(),
        });
    }

    pub fn finish(&mut self, stats: Stats, now: DateTime<Utc>) {
        self.finished = Some(now);
        self.totals = Totals {
            flows: stats.flows_created,
            packets: stats.packets,
            undecodable_datagrams: stats.undecodable,
            unknown_flow_drops: stats.unknown_flow_drops,
        };
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create report {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, self).context("Failed to serialize report")?;
        writer.write_all(b"\n")?;
        writer
            .flush()
            .with_context(|| format!("Failed to write report {}", path.display()))?;

        Ok(())
    }
}
