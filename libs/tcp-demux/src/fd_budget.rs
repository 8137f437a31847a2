//! Sizing of the [`ResourceRing`](crate::ResourceRing) from the process' file descriptor limit.

use nix::errno::Errno;
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use std::num::NonZeroUsize;

/// File descriptors that are not available to the ring.
///
/// stdin, stdout, stderr, the capture file, one for opening a file before another is closed and one spare.
pub const RESERVED_FDS: u64 = 6;

/// Used in place of an infinite hard limit.
const UNLIMITED_FALLBACK: u64 = 4 * 64;

#[derive(Debug, thiserror::Error)]
pub enum FdBudgetError {
    #[error("Failed to query file descriptor limit")]
    Query(#[source] Errno),
    #[error("Failed to set file descriptor limit to {limit}")]
    Raise {
        limit: u64,
        #[source]
        source: Errno,
    },
    #[error("File descriptor limit of {limit} leaves no room for output files")]
    TooSmall { limit: u64 },
}

/// Raises the soft file descriptor limit and returns how many output files may be open at once.
///
/// `desired` lowers the limit below the hard limit; values too small to be useful are ignored.
pub fn ring_capacity(desired: Option<u64>) -> Result<NonZeroUsize, FdBudgetError> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(FdBudgetError::Query)?;
    let limit = fd_limit(hard, desired);

    if limit != soft {
        setrlimit(Resource::RLIMIT_NOFILE, limit, hard)
            .map_err(|source| FdBudgetError::Raise { limit, source })?;
    }

    let capacity = capacity_for(limit)?;

    tracing::debug!(%soft, %hard, %limit, %capacity, "Computed output file budget");

    Ok(capacity)
}

fn fd_limit(hard: u64, desired: Option<u64>) -> u64 {
    let max = if hard == libc::RLIM_INFINITY {
        UNLIMITED_FALLBACK
    } else {
        hard
    };

    match desired {
        Some(desired) if desired < RESERVED_FDS + 2 => {
            tracing::warn!(
                %desired,
                minimum = RESERVED_FDS + 2,
                "Ignoring file descriptor limit that is too small"
            );

            max
        }
        Some(desired) => desired.min(max),
        None => max,
    }
}

fn capacity_for(limit: u64) -> Result<NonZeroUsize, FdBudgetError> {
    limit
        .checked_sub(RESERVED_FDS)
        .and_then(|n| usize::try_from(n).ok())
        .and_then(NonZeroUsize::new)
        .ok_or(FdBudgetError::TooSmall { limit })
}
