#![cfg_attr(test, allow(clippy::unwrap_used))]

use anyhow::{Context as _, Result};
use capture::PcapSource;
use chrono::Utc;
use clap::{ArgGroup, Parser};
use digest::Sha256Digest;
use report::Report;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tcp_demux::{
    Config, DEFAULT_MAX_SEEK, DEFAULT_TEMPLATE, Demultiplexer, FilenameTemplate, LockFile, NoLock,
    PostProcessor, WriteLock,
};

mod digest;
mod report;

fn main() -> ExitCode {
    let cli = Cli::parse();

    #[expect(clippy::print_stderr, reason = "No logger has been set up yet")]
    if let Err(e) = logging::setup_global_subscriber(cli.log_directives(), cli.log_json) {
        eprintln!("Failed to set up logging: {e:#}");

        return ExitCode::FAILURE;
    }

    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");

            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "`tcpflow` started");
    tracing::debug!(?cli);

    let config = cli.config()?;
    let output_enabled = config.output_enabled;

    std::fs::create_dir_all(&cli.outdir)
        .with_context(|| format!("Failed to create output directory {}", cli.outdir.display()))?;
    anyhow::ensure!(
        cli.outdir.is_dir(),
        "{} is not a directory",
        cli.outdir.display()
    );

    let capacity =
        tcp_demux::ring_capacity(cli.max_fds).context("Failed to determine file budget")?;
    tracing::debug!(%capacity, "Sized file ring");

    let lock: Box<dyn WriteLock> = match &cli.lock {
        Some(path) => Box::new(
            LockFile::open(path)
                .with_context(|| format!("Failed to open lock file {}", path.display()))?,
        ),
        None => Box::new(NoLock),
    };

    let mut processors: Vec<Box<dyn PostProcessor>> = Vec::new();
    if cli.has_format(FormatFlag::Digest) {
        if !output_enabled {
            tracing::warn!("Digests need file output; no digests will be computed");
        }

        processors.push(Box::new(Sha256Digest));
    }

    let stop = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let stop = stop.clone();

        move || stop.store(true, Ordering::Relaxed)
    })
    .context("Failed to install signal handler")?;

    let mut demux = Demultiplexer::new(&cli.outdir, config, capacity, lock);
    let mut report = Report::new(std::env::args().collect(), Utc::now());

    let captures = cli
        .read
        .iter()
        .map(|path| (path, true))
        .chain(cli.finish.iter().map(|path| (path, false)));

    let mut unreadable = Vec::new();

    for (path, admit_new_flows) in captures {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let _span = tracing::info_span!("capture", path = %path.display()).entered();

        demux.set_admit_new_flows(admit_new_flows);

        if let Err(e) = read_capture(path, &mut demux, &mut processors, &mut report, &stop) {
            tracing::error!("{e:#}");
            unreadable.push(path.display().to_string());
        }
    }

    if stop.load(Ordering::Relaxed) {
        tracing::info!("Interrupted; closing all streams");
    }

    demux.shutdown();
    drain(&mut demux, &mut processors, &mut report);

    let stats = demux.stats();
    report.finish(stats, Utc::now());

    let report_path = cli
        .report
        .clone()
        .unwrap_or_else(|| cli.outdir.join("report.json"));
    report.write(&report_path)?;

    tracing::info!(
        flows = stats.flows_created,
        packets = stats.packets,
        undecodable = stats.undecodable,
        report = %report_path.display(),
        "Done"
    );

    anyhow::ensure!(
        unreadable.is_empty(),
        "Failed to read {}",
        unreadable.join(", ")
    );

    Ok(())
}

fn read_capture(
    path: &Path,
    demux: &mut Demultiplexer,
    processors: &mut [Box<dyn PostProcessor>],
    report: &mut Report,
    stop: &AtomicBool,
) -> Result<()> {
    let mut source = PcapSource::open(path)?;

    while let Some(captured) = source.next_datagram() {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let captured = match captured {
            Ok(captured) => captured,
            Err(e) => {
                tracing::warn!("Stopped reading capture: {e:#}");
                break;
            }
        };

        demux.process_datagram(captured.timestamp, &captured.datagram, captured.vlan);
        drain(demux, processors, report);
    }

    tracing::info!(
        frames = source.frames(),
        skipped = source.skipped(),
        "Finished reading capture"
    );

    Ok(())
}

fn drain(
    demux: &mut Demultiplexer,
    processors: &mut [Box<dyn PostProcessor>],
    report: &mut Report,
) {
    while let Some(flow) = demux.poll_finalized() {
        let outputs = tcp_demux::run_all(processors, &flow);

        report.add_flow(&flow, outputs);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("input").required(true).multiple(true).args(["read", "finish"])))]
struct Cli {
    /// Capture file to reconstruct streams from.
    #[arg(short = 'r', long)]
    read: Vec<PathBuf>,

    /// Capture file that may only continue streams seen in earlier captures.
    #[arg(short = 'R', long)]
    finish: Vec<PathBuf>,

    /// Directory the stream files are written to.
    #[arg(short = 'o', long, env = "TCPFLOW_OUTDIR", default_value = ".")]
    outdir: PathBuf,

    /// Maximum number of bytes stored per stream.
    #[arg(short = 'b', long)]
    max_bytes: Option<u64>,

    /// Largest sequence number jump that is still considered part of the same stream.
    #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_SEEK)]
    max_seek: u32,

    /// Number of file descriptors to use instead of the process limit.
    #[arg(short = 'f', long)]
    max_fds: Option<u64>,

    /// Keep streams open after their FIN.
    #[arg(short = 'P', long, default_value_t = false)]
    no_purge: bool,

    /// Template for the names of stream files.
    #[arg(short = 'T', long, default_value = DEFAULT_TEMPLATE)]
    template: String,

    #[arg(short = 'F', long = "format", value_enum)]
    format: Vec<FormatFlag>,

    /// Lock file held around every write.
    #[arg(short = 'L', long, env = "TCPFLOW_LOCK")]
    lock: Option<PathBuf>,

    /// Where to write the JSON report; defaults to `report.json` in the output directory.
    #[arg(short = 'X', long)]
    report: Option<PathBuf>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,

    /// Shorthand for `--log-filter debug`.
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,

    /// Log as JSON lines.
    #[arg(long, env = "TCPFLOW_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum FormatFlag {
    /// Always append the connection counter to file names.
    #[value(name = "c")]
    ConnectionCount,
    /// Prefix file names with the stream's start as unix time.
    #[value(name = "t")]
    UnixTime,
    /// Prefix file names with the stream's start as ISO-8601.
    #[value(name = "T")]
    IsoTime,
    /// Do not write stream files.
    #[value(name = "X")]
    NoOutput,
    /// Record a SHA-256 digest of every stream in the report.
    #[value(name = "M")]
    Digest,
}

impl Cli {
    fn log_directives(&self) -> &str {
        if self.verbose {
            return "debug";
        }

        &self.log_filter
    }

    fn has_format(&self, flag: FormatFlag) -> bool {
        self.format.contains(&flag)
    }

    fn config(&self) -> Result<Config> {
        let mut template = self
            .template
            .parse::<FilenameTemplate>()
            .context("Invalid filename template")?;

        if self.has_format(FormatFlag::ConnectionCount) {
            template = template.with_connection_count_always();
        }
        if self.has_format(FormatFlag::IsoTime) {
            template = template.with_prefix("%T")?;
        }
        if self.has_format(FormatFlag::UnixTime) {
            template = template.with_prefix("%tT")?;
        }

        Ok(Config {
            max_seek: self.max_seek,
            max_bytes_per_flow: self.max_bytes,
            purge_on_fin: !self.no_purge,
            output_enabled: !self.has_format(FormatFlag::NoOutput),
            template,
        })
    }
}
