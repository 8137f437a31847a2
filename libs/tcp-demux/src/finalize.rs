use crate::flow::{Direction, FlowRecord};
use crate::ring::ResourceRing;
use crate::stream::StreamState;
use ip_datagram::FlowKey;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// A stream that has been retired.
///
/// Its output file (if any) has been closed and may be read back for post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFlow {
    pub key: FlowKey,
    pub record: FlowRecord,
    pub isn: u32,
    pub next_expected: u32,
    pub bytes: u64,
    pub syn_count: u32,
    pub violations: u32,
    pub direction: Direction,
    pub reason: RetireReason,
    /// Set if an output file was created for this flow.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    Fin,
    Discontinuity,
    Purge,
    Shutdown,
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetireReason::Fin => f.write_str("fin"),
            RetireReason::Discontinuity => f.write_str("discontinuity"),
            RetireReason::Purge => f.write_str("purge"),
            RetireReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

impl FinalizedFlow {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens the finished output for streaming reads.
    ///
    /// Returns `None` if no output was written for this flow.
    pub fn open_reader(&self) -> io::Result<Option<BufReader<File>>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };

        let file = File::open(path)?;

        Ok(Some(BufReader::new(file)))
    }
}

/// Retires a stream: closes its output and captures its final state.
pub(crate) fn finalize(
    stream: StreamState,
    reason: RetireReason,
    ring: &mut ResourceRing,
) -> FinalizedFlow {
    let StreamState {
        key,
        record,
        isn,
        next_expected,
        pos,
        direction,
        syn_count,
        violations,
        fin_seen: _,
        path,
        file_created,
    } = stream;

    ring.release(record.id);

    tracing::debug!(
        stream = %record.id,
        %key,
        ?reason,
        packets = record.packets,
        bytes = pos,
        "Finalized stream"
    );

    FinalizedFlow {
        key,
        record,
        isn,
        next_expected,
        bytes: pos,
        syn_count,
        violations,
        direction,
        reason,
        path: path.filter(|_| file_created),
    }
}
