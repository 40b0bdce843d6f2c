//! System-wide setup mutex: a named POSIX semaphore serializing
//! configuration (not DMA) across every process touching a given device
//! (§4.1, §6, §9 "cross-process mutual exclusion").
//!
//! `nix` does not wrap named semaphores, so this goes straight to `libc`'s
//! `sem_open`/`sem_wait`/`sem_post`/`sem_close`, the same layer the
//! teacher reaches for low-level primitives it has no safe wrapper for.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::{Error, Result};

/// A handle to a named, process-shared semaphore used as a non-reentrant
/// mutex. One process may hold it from several threads; only one process
/// may hold it at a time.
#[derive(Debug)]
pub struct SetupMutex {
    sem: *mut libc::sem_t,
}

// `sem_t*` obtained from `sem_open` is safe to share and to wait/post on
// from any thread; POSIX guarantees the operations themselves are
// thread-safe.
unsafe impl Send for SetupMutex {}
unsafe impl Sync for SetupMutex {}

impl SetupMutex {
    /// Opens (creating if necessary) the named semaphore at `name`, which
    /// must start with `/` per `sem_open(3)`. Initial value is 1.
    pub fn open(name: &str) -> Result<Self> {
        let cname = CString::new(name)
            .map_err(|e| Error::FatalConfig(format!("invalid semaphore name {name:?}: {e}")))?;

        // SAFETY: `cname` is a valid NUL-terminated string for the
        // duration of the call; `O_CREAT` with mode 0o666 and initial
        // value 1 matches a binary mutex that any process may reuse.
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::mode_t,
                1u32,
            )
        };

        if sem == libc::SEM_FAILED {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Ok(Self { sem })
    }

    /// Blocks until the semaphore is acquired, returning a guard that
    /// releases it on drop.
    ///
    /// Held only around configuration phases, never across DMA transfers
    /// or vertical-interrupt waits (§4.1).
    pub fn lock(&self) -> SetupMutexGuard<'_> {
        loop {
            // SAFETY: `self.sem` is a live semaphore for the lifetime of
            // `self`.
            let rc = unsafe { libc::sem_wait(self.sem) };
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                log::error!("sem_wait on setup mutex failed: {err}");
                break;
            }
        }
        SetupMutexGuard { mutex: self }
    }

    fn post(&self) {
        // SAFETY: `self.sem` is a live semaphore.
        if unsafe { libc::sem_post(self.sem) } != 0 {
            log::error!("sem_post on setup mutex failed: {}", io::Error::last_os_error());
        }
    }
}

impl Drop for SetupMutex {
    fn drop(&mut self) {
        if self.sem != ptr::null_mut() {
            // SAFETY: closes this process's reference; the semaphore
            // itself persists in the kernel for other processes/opens.
            unsafe {
                libc::sem_close(self.sem);
            }
        }
    }
}

/// RAII guard releasing the setup mutex on drop.
#[must_use]
pub struct SetupMutexGuard<'a> {
    mutex: &'a SetupMutex,
}

impl Drop for SetupMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.post();
    }
}
