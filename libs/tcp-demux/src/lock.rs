use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Serialises writes of cooperating processes sharing one output directory.
pub trait WriteLock {
    fn lock(&mut self) -> io::Result<()>;
    fn unlock(&mut self) -> io::Result<()>;
}

/// A [`WriteLock`] for when this process owns the output directory exclusively.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl WriteLock for NoLock {
    fn lock(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn unlock(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An advisory, exclusive `flock(2)` on a named file.
pub struct LockFile {
    path: PathBuf,
    state: State,
}

enum State {
    Unlocked(File),
    Locked(Flock<File>),
    /// Only observable if a previous lock operation panicked.
    Poisoned,
}

impl LockFile {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            path,
            state: State::Unlocked(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, State::Locked(_))
    }
}

impl std::fmt::Debug for LockFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockFile")
            .field("path", &self.path)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl WriteLock for LockFile {
    fn lock(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Unlocked(file) => match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(locked) => {
                    self.state = State::Locked(locked);

                    Ok(())
                }
                Err((file, errno)) => {
                    self.state = State::Unlocked(file);

                    Err(errno.into())
                }
            },
            State::Locked(locked) => {
                self.state = State::Locked(locked);

                Ok(())
            }
            State::Poisoned => Err(poisoned(&self.path)),
        }
    }

    fn unlock(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Locked(locked) => match locked.unlock() {
                Ok(file) => {
                    self.state = State::Unlocked(file);

                    Ok(())
                }
                Err((locked, errno)) => {
                    self.state = State::Locked(locked);

                    Err(errno.into())
                }
            },
            State::Unlocked(file) => {
                self.state = State::Unlocked(file);

                Ok(())
            }
            State::Poisoned => Err(poisoned(&self.path)),
        }
    }
}

fn poisoned(path: &Path) -> io::Error {
    io::Error::other(format!("Lock file {} is unusable", path.display()))
}
