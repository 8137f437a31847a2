use crate::flow::StreamId;
use lru::LruCache;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;

/// A bounded set of open output files.
///
/// When full, the file that was least recently written to is closed to make room.
/// Closing a file does not affect the stream it belongs to; the next write simply reopens it.
#[derive(Debug)]
pub struct ResourceRing {
    open: LruCache<StreamId, File>,
}

pub(crate) struct Acquired<'a> {
    pub(crate) file: &'a mut File,
    /// Length of the file if it was just opened without truncation.
    pub(crate) reopened_len: Option<u64>,
}

impl ResourceRing {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            open: LruCache::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.open.cap().get()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn is_open(&self, id: StreamId) -> bool {
        self.open.contains(&id)
    }

    /// Returns the open file of stream `id`, opening it if necessary.
    ///
    /// With `truncate` set, any existing content is discarded.
    /// Otherwise, an existing file is opened as is and positioned at its end.
    pub(crate) fn acquire(
        &mut self,
        id: StreamId,
        path: &Path,
        truncate: bool,
    ) -> io::Result<Acquired<'_>> {
        let mut reopened_len = None;

        if !self.open.contains(&id) {
            let mut file = self.open_with_eviction(path, truncate)?;

            if !truncate {
                reopened_len = Some(file.seek(SeekFrom::End(0))?);
            }

            tracing::debug!(stream = %id, path = %path.display(), %truncate, "Opened output file");

            self.open.push(id, file);
        }

        let file = self
            .open
            .get_mut(&id)
            .ok_or_else(|| io::Error::other("File vanished from ring"))?;

        Ok(Acquired { file, reopened_len })
    }

    fn open_with_eviction(&mut self, path: &Path, truncate: bool) -> io::Result<File> {
        while self.open.len() >= self.capacity() {
            if self.evict_one().is_none() {
                break;
            }
        }

        loop {
            let result = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(truncate)
                .open(path);

            match result {
                Ok(file) => return Ok(file),
                Err(e) if is_fd_exhaustion(&e) => {
                    tracing::debug!(path = %path.display(), "Out of file descriptors: {e}");

                    if self.evict_one().is_none() {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Closes the file that was least recently written to.
    pub fn evict_one(&mut self) -> Option<StreamId> {
        let (id, _file) = self.open.pop_lru()?;

        tracing::debug!(stream = %id, "Evicted output file");

        Some(id)
    }

    /// Closes the file of stream `id`, if open.
    pub fn release(&mut self, id: StreamId) -> bool {
        self.open.pop(&id).is_some()
    }

    /// Closes all open files.
    pub fn release_all(&mut self) {
        let num_open = self.open.len();
        self.open.clear();

        tracing::debug!(%num_open, "Closed all output files");
    }
}

fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
}
