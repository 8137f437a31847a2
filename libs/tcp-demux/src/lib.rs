//! Passive reassembly of TCP streams into files.
//!
//! Every direction of every TCP connection is a separate flow.
//! Payload is written to the flow's file at the offset derived from its sequence number,
//! so out-of-order segments land in the right place without being buffered.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod demux;
pub mod fd_budget;
mod finalize;
mod flow;
mod lock;
mod postprocess;
mod ring;
mod stream;
mod template;

pub use config::{Config, DEFAULT_MAX_SEEK};
pub use demux::{Demultiplexer, Stats};
pub use fd_budget::{FdBudgetError, RESERVED_FDS, ring_capacity};
pub use finalize::{FinalizedFlow, RetireReason};
pub use flow::{Direction, FlowRecord, StreamId};
pub use lock::{LockFile, NoLock, WriteLock};
pub use postprocess::{PostProcessor, ProcessorOutput, run_all};
pub use ring::ResourceRing;
pub use stream::StreamState;
pub use template::{DEFAULT_TEMPLATE, FilenameTemplate, TemplateError};
