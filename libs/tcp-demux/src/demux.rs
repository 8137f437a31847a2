use crate::config::Config;
use crate::finalize::{FinalizedFlow, RetireReason, finalize};
use crate::flow::{Direction, FlowRecord, StreamId};
use crate::lock::WriteLock;
use crate::ring::ResourceRing;
use crate::stream::StreamState;
use chrono::{DateTime, Utc};
use ip_datagram::{FlowKey, TcpSegment};
use logging::err_with_src;
use std::collections::{HashMap, HashSet, VecDeque, hash_map};
use std::io::{self, Seek as _, SeekFrom, Write as _};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Splits captured TCP traffic into one output file per flow.
///
/// Datagrams are processed one at a time, in arrival order.
/// Retired flows are queued and must be drained via [`Demultiplexer::poll_finalized`].
pub struct Demultiplexer {
    outdir: PathBuf,
    config: Config,

    flows: HashMap<FlowKey, StreamState>,
    /// The connection count of the latest instance of every flow seen in this run.
    instances: HashMap<FlowKey, u64>,
    /// Output files created in this run; only files left over from earlier runs are truncated.
    created_paths: HashSet<PathBuf>,
    ring: ResourceRing,
    lock: Box<dyn WriteLock>,

    finalized: VecDeque<FinalizedFlow>,

    admit_new_flows: bool,
    shut_down: bool,

    flow_counter: u64,
    packet_counter: u64,
    unknown_flow_drops: u64,
    undecodable: u64,
}

/// Counters of a [`Demultiplexer`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Streams created, including new instances after a discontinuity.
    pub flows_created: u64,
    /// TCP segments processed.
    pub packets: u64,
    pub open_files: usize,
    pub live_streams: usize,
    /// Segments of unknown flows dropped while new flows were not admitted.
    pub unknown_flow_drops: u64,
    /// Datagrams that did not decode to a TCP segment.
    pub undecodable: u64,
}

impl Demultiplexer {
    pub fn new(
        outdir: impl Into<PathBuf>,
        config: Config,
        capacity: NonZeroUsize,
        lock: Box<dyn WriteLock>,
    ) -> Self {
        Self {
            outdir: outdir.into(),
            config,
            flows: HashMap::default(),
            instances: HashMap::default(),
            created_paths: HashSet::default(),
            ring: ResourceRing::new(capacity),
            lock,
            finalized: VecDeque::default(),
            admit_new_flows: true,
            shut_down: false,
            flow_counter: 0,
            packet_counter: 0,
            unknown_flow_drops: 0,
            undecodable: 0,
        }
    }

    /// Controls whether segments of unknown flows create new streams.
    ///
    /// Disabled while replaying a capture that should only complete flows established by an earlier one.
    pub fn set_admit_new_flows(&mut self, admit: bool) {
        self.admit_new_flows = admit;
    }

    /// Decodes and dispatches a captured IP datagram.
    pub fn process_datagram(&mut self, now: DateTime<Utc>, datagram: &[u8], vlan: Option<u16>) {
        let Some(segment) = ip_datagram::decode(datagram) else {
            self.undecodable += 1;
            return;
        };

        self.dispatch(now, &segment, vlan);
    }

    pub fn dispatch(&mut self, now: DateTime<Utc>, segment: &TcpSegment<'_>, vlan: Option<u16>) {
        if self.shut_down {
            tracing::trace!(key = %segment.key, "Ignoring segment after shutdown");
            return;
        }

        self.packet_counter += 1;

        let key = segment.key;
        let seq = segment.seq;
        let payload = segment.payload;

        let mut delta = 0;
        let mut replacing = false;

        if let Some(stream) = self.flows.get(&key) {
            let d = stream.delta(seq);

            if d.unsigned_abs() > self.config.max_seek {
                replacing = true;
            } else {
                delta = d;
            }
        }

        if replacing && let Some(stream) = self.flows.remove(&key) {
            tracing::debug!(
                stream = %stream.id(),
                %key,
                %seq,
                next_expected = stream.next_expected,
                "Sequence discontinuity; starting new connection instance"
            );

            self.retire(stream, RetireReason::Discontinuity);
        }

        let stream = match self.flows.entry(key) {
            hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
            hash_map::Entry::Vacant(vacant) => {
                if !self.admit_new_flows && !replacing {
                    tracing::trace!(%key, "Dropping segment of unknown flow");
                    self.unknown_flow_drops += 1;

                    return;
                }

                self.flow_counter += 1;

                // Every later instance of a 5-tuple gets its own counter and therefore its own file.
                let connection_count = match self.instances.entry(key) {
                    hash_map::Entry::Occupied(mut last) => {
                        *last.get_mut() += 1;
                        *last.get()
                    }
                    hash_map::Entry::Vacant(first) => *first.insert(0),
                };

                let record = FlowRecord::new(
                    StreamId::new(self.flow_counter),
                    vlan,
                    now,
                    connection_count,
                );
                // A stream joined mid-flight behaves as if its SYN was the segment right before.
                let isn = if segment.flags.syn {
                    seq
                } else {
                    seq.wrapping_sub(1)
                };
                let path = self
                    .config
                    .output_enabled
                    .then(|| self.outdir.join(self.config.template.render(&key, &record)));

                tracing::debug!(
                    stream = %record.id,
                    %key,
                    %isn,
                    connection_count,
                    path = ?path,
                    "Creating new stream"
                );

                vacant.insert(StreamState::new(key, record, isn, path))
            }
        };

        stream.record.on_packet(now);

        if segment.flags.syn {
            if stream.syn_count > 0 {
                tracing::debug!(stream = %stream.id(), syn_count = stream.syn_count + 1, "Multiple SYNs on a single connection");
            }

            stream.syn_count += 1;
            stream.direction = if segment.flags.ack {
                Direction::ClientToServer
            } else {
                Direction::ServerToClient
            };

            if !payload.is_empty() {
                stream.violations += 1;

                tracing::warn!(stream = %stream.id(), %key, len = payload.len(), "Protocol violation: SYN with data");
            }
        }

        if stream.fin_seen && !payload.is_empty() {
            stream.violations += 1;

            tracing::warn!(stream = %stream.id(), %key, len = payload.len(), "Protocol violation: data after FIN");
        }

        if !payload.is_empty() {
            place(
                stream,
                &mut self.ring,
                &mut self.created_paths,
                self.lock.as_mut(),
                &self.config,
                payload,
                delta,
            );
        }

        if !segment.flags.fin {
            return;
        }

        if !self.config.purge_on_fin {
            stream.fin_seen = true;
            return;
        }

        if let Some(stream) = self.flows.remove(&key) {
            self.retire(stream, RetireReason::Fin);
        }
    }

    /// Retires the stream of `key`, if any.
    pub fn purge(&mut self, key: &FlowKey) -> bool {
        let Some(stream) = self.flows.remove(key) else {
            return false;
        };

        self.retire(stream, RetireReason::Purge);

        true
    }

    /// Retires all streams and closes all files.
    ///
    /// Further datagrams are ignored.
    pub fn shutdown(&mut self) {
        self.shut_down = true;

        let mut streams = self.flows.drain().map(|(_, s)| s).collect::<Vec<_>>();
        streams.sort_by_key(|s| s.id());

        tracing::debug!(num_streams = streams.len(), "Shutting down");

        for stream in streams {
            self.retire(stream, RetireReason::Shutdown);
        }

        self.ring.release_all();
    }

    /// Closes all open files without affecting any stream.
    pub fn release_all_files(&mut self) {
        self.ring.release_all();
    }

    pub fn poll_finalized(&mut self) -> Option<FinalizedFlow> {
        self.finalized.pop_front()
    }

    pub fn stream(&self, key: &FlowKey) -> Option<&StreamState> {
        self.flows.get(key)
    }

    pub fn open_files(&self) -> usize {
        self.ring.len()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            flows_created: self.flow_counter,
            packets: self.packet_counter,
            open_files: self.ring.len(),
            live_streams: self.flows.len(),
            unknown_flow_drops: self.unknown_flow_drops,
            undecodable: self.undecodable,
        }
    }

    fn retire(&mut self, stream: StreamState, reason: RetireReason) {
        let flow = finalize(stream, reason, &mut self.ring);

        self.finalized.push_back(flow);
    }
}

/// Places `payload` at `delta` bytes from the stream's current position.
///
/// Sequence tracking advances even if the bytes are not written.
fn place(
    stream: &mut StreamState,
    ring: &mut ResourceRing,
    created_paths: &mut HashSet<PathBuf>,
    lock: &mut dyn WriteLock,
    config: &Config,
    payload: &[u8],
    delta: i32,
) {
    let Ok(offset) = u64::try_from(stream.offset(delta)) else {
        tracing::debug!(
            stream = %stream.id(),
            %delta,
            len = payload.len(),
            "Dropping data from before the start of the stream"
        );
        return;
    };
    let end = offset + payload.len() as u64;

    let writable = match config.max_bytes_per_flow {
        Some(max) if offset >= max => &[][..],
        Some(max) => {
            let len = usize::try_from(max - offset).unwrap_or(usize::MAX);

            &payload[..payload.len().min(len)]
        }
        None => payload,
    };

    tracing::trace!(
        stream = %stream.id(),
        %offset,
        %delta,
        len = payload.len(),
        writable = writable.len(),
        "Placing segment"
    );

    if config.output_enabled && !writable.is_empty() {
        let capped = config.max_bytes_per_flow.is_some_and(|max| stream.pos > max);

        if let Err(e) = write_at(stream, ring, created_paths, lock, offset, writable, capped) {
            tracing::warn!(
                stream = %stream.id(),
                path = ?stream.path,
                "Failed to write to output file: {}",
                err_with_src(&e)
            );
        }
    }

    stream.advance_to(end);
}

fn write_at(
    stream: &mut StreamState,
    ring: &mut ResourceRing,
    created_paths: &mut HashSet<PathBuf>,
    lock: &mut dyn WriteLock,
    offset: u64,
    data: &[u8],
    capped: bool,
) -> io::Result<()> {
    let Some(path) = stream.path.as_deref() else {
        return Ok(());
    };

    let reopening = stream.file_created;
    let truncate = !reopening && !created_paths.contains(path);

    if !reopening && !truncate {
        tracing::warn!(
            stream = %stream.record.id,
            path = %path.display(),
            "Output file is shared with an earlier stream; the filename template should include the connection count"
        );
    }

    let acquired = ring.acquire(stream.record.id, path, truncate)?;
    if !reopening {
        created_paths.insert(path.to_owned());
    }
    stream.file_created = true;

    if reopening
        && let Some(len) = acquired.reopened_len
        && len != stream.pos
        && !capped
    {
        tracing::debug!(
            stream = %stream.record.id,
            %len,
            pos = stream.pos,
            "Resuming at end of reopened output file"
        );

        stream.resume_at(len);
    }

    acquired.file.seek(SeekFrom::Start(offset))?;

    lock.lock()?;
    let result = acquired.file.write_all(data);
    lock.unlock()?;

    result
}
