//! Scoped access to project documents.
//!
//! Writing a document goes through a [`DocumentHandle`], which holds an
//! exclusive lock file next to the document for as long as it lives. The
//! lock is released when the handle is closed or dropped, on every exit
//! path. A document that is already locked fails to open with
//! [`Error::TransientLock`]; [`DocumentEngine::open_for_write`] retries that
//! with exponential backoff up to a fixed number of attempts. Locks left
//! behind by a process that has exited are removed on the next open.

use super::{ProjectDocument, read_document, write_document};
use crate::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Bounded retry with exponential backoff for opening locked documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Lock file guarding a document. Removed on drop.
///
/// The file holds the owner's pid. A lock whose owner is no longer running
/// is stale and gets reclaimed.
#[derive(Debug)]
struct DocumentLock {
    path: PathBuf,
}

impl DocumentLock {
    fn acquire(document: &Path) -> Result<Self> {
        let path = lock_path(document);
        match create_lock_file(&path) {
            Ok(()) => return Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let Some(pid) = read_owner(&path).filter(|pid| !process_alive(*pid)) else {
            return Err(Error::TransientLock(document.to_path_buf()));
        };
        tracing::warn!(lock = %path.display(), pid, "removing stale document lock");
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        match create_lock_file(&path) {
            Ok(()) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::TransientLock(document.to_path_buf()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn create_lock_file(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(e) = writeln!(file, "{}", std::process::id()) {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

/// Pid recorded in a lock file, if it holds one.
fn read_owner(lock: &Path) -> Option<u32> {
    fs::read_to_string(lock).ok()?.trim().parse().ok()
}

/// Whether a process with this pid is still running.
///
/// Anything short of a definite "no such process" counts as running.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let proc_root = Path::new("/proc");
    if proc_root.join("self").exists() {
        return proc_root.join(pid.to_string()).exists();
    }
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|out| {
            out.status.success()
                || !String::from_utf8_lossy(&out.stderr).contains("No such process")
        })
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(lock = %self.path.display(), error = %e, "failed to release document lock");
            }
        }
    }
}

/// Path of the lock file for a document.
pub fn lock_path(document: &Path) -> PathBuf {
    let mut name = document
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    document.with_file_name(name)
}

/// An open, locked, writable project document.
#[derive(Debug)]
pub struct DocumentHandle {
    path: PathBuf,
    document: ProjectDocument,
    _lock: DocumentLock,
}

impl DocumentHandle {
    /// Lock and decode a document in a single attempt.
    pub fn open(path: &Path) -> Result<Self> {
        let lock = DocumentLock::acquire(path)?;
        let document = read_document(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
            _lock: lock,
        })
    }

    /// Lock `destination`, replace it with a copy of `source`, then decode it.
    ///
    /// The destination is only touched once its lock is held.
    pub fn open_copy(source: &Path, destination: &Path) -> Result<Self> {
        let lock = DocumentLock::acquire(destination)?;
        fs::copy(source, destination)?;
        let document = read_document(destination)?;
        Ok(Self {
            path: destination.to_path_buf(),
            document,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &ProjectDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut ProjectDocument {
        &mut self.document
    }

    /// Write the current document back to its file.
    pub fn save(&self) -> Result<()> {
        write_document(&self.path, &self.document)
    }

    /// Save, then release the lock.
    pub fn save_and_close(self) -> Result<()> {
        self.save()
    }

    /// Release the lock without saving.
    pub fn close(self) {}
}

/// Opens documents and serializes report rendering within the process.
#[derive(Debug, Default)]
pub struct DocumentEngine {
    policy: RetryPolicy,
    render_lock: Mutex<()>,
}

impl DocumentEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            render_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decode a document without locking it.
    pub fn open_read(&self, path: &Path) -> Result<ProjectDocument> {
        read_document(path)
    }

    /// Lock and open a document for writing, retrying while it is locked.
    ///
    /// Returns [`Error::LockTimeout`] once `max_attempts` have failed. Any
    /// other error aborts immediately.
    pub fn open_for_write(&self, path: &Path) -> Result<DocumentHandle> {
        self.with_retry(path, || DocumentHandle::open(path))
    }

    /// Lock `destination` and fill it with a copy of `source`, retrying
    /// while the destination is locked.
    pub fn open_copy_for_write(&self, source: &Path, destination: &Path) -> Result<DocumentHandle> {
        self.with_retry(destination, || DocumentHandle::open_copy(source, destination))
    }

    fn with_retry(
        &self,
        path: &Path,
        open: impl Fn() -> Result<DocumentHandle>,
    ) -> Result<DocumentHandle> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match open() {
                Ok(handle) => return Ok(handle),
                Err(Error::TransientLock(_)) if attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::debug!(
                        path = %path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "document locked, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(Error::TransientLock(_)) => {
                    tracing::warn!(path = %path.display(), attempts = attempt, "giving up on locked document");
                    return Err(Error::LockTimeout {
                        path: path.to_path_buf(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Enter the rendering critical section.
    pub fn render_guard(&self) -> MutexGuard<'_, ()> {
        self.render_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
