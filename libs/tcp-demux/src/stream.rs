use crate::flow::{Direction, FlowRecord, StreamId};
use ip_datagram::FlowKey;
use std::path::{Path, PathBuf};

/// Reconstruction state of a single flow.
///
/// `next_expected` always equals `isn + 1 + pos` modulo 2^32,
/// i.e. reconstructed byte `n` maps to absolute sequence number `isn + 1 + n`.
#[derive(Debug)]
pub struct StreamState {
    pub(crate) key: FlowKey,
    pub(crate) record: FlowRecord,
    pub(crate) isn: u32,
    pub(crate) next_expected: u32,
    /// Offset in the output that corresponds to `next_expected`; the high-water mark of everything placed so far.
    pub(crate) pos: u64,
    pub(crate) direction: Direction,
    pub(crate) syn_count: u32,
    pub(crate) violations: u32,
    pub(crate) fin_seen: bool,
    pub(crate) path: Option<PathBuf>,
    /// Whether the output file has been opened by this instance.
    ///
    /// Reopens after eviction resume the existing content.
    pub(crate) file_created: bool,
}

impl StreamState {
    pub(crate) fn new(key: FlowKey, record: FlowRecord, isn: u32, path: Option<PathBuf>) -> Self {
        Self {
            key,
            record,
            isn,
            next_expected: isn.wrapping_add(1),
            pos: 0,
            direction: Direction::Unknown,
            syn_count: 0,
            violations: 0,
            fin_seen: false,
            path,
            file_created: false,
        }
    }

    /// Signed distance of `seq` from the next expected sequence number.
    ///
    /// Uses modular arithmetic so that wrap-around at 2^32 is not mistaken for a discontinuity.
    pub(crate) fn delta(&self, seq: u32) -> i32 {
        seq.wrapping_sub(self.next_expected) as i32
    }

    /// Output offset of a segment at `delta` from the next expected sequence number.
    ///
    /// Negative for data from before the point at which we joined the stream.
    pub(crate) fn offset(&self, delta: i32) -> i64 {
        self.pos as i64 + i64::from(delta)
    }

    /// Records that everything up to `end` has been placed.
    ///
    /// Gap-filling placements below the current high-water mark leave the position untouched.
    pub(crate) fn advance_to(&mut self, end: u64) {
        if end <= self.pos {
            return;
        }

        self.pos = end;
        self.next_expected = self.sequence_at(end);
    }

    /// Resumes at the end of an existing output of `len` bytes.
    pub(crate) fn resume_at(&mut self, len: u64) {
        self.pos = len;
        self.next_expected = self.sequence_at(len);
    }

    fn sequence_at(&self, offset: u64) -> u32 {
        self.isn.wrapping_add(1).wrapping_add(offset as u32)
    }

    pub fn id(&self) -> StreamId {
        self.record.id
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    pub fn record(&self) -> &FlowRecord {
        &self.record
    }

    pub fn isn(&self) -> u32 {
        self.isn
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn bytes_placed(&self) -> u64 {
        self.pos
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn syn_count(&self) -> u32 {
        self.syn_count
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
