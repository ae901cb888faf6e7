//! Cross-thread wake primitive for a blocked poll
//!
//! An eventfd on Linux, a non-blocking pipe elsewhere. The read end is
//! registered with the loop's poller as a permanent read-interest source.
//!
//! A `pending` flag coalesces wakeups: only the first `wake()` after the
//! loop drains the primitive performs a write, later calls return at once.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use seda_core::error::{Result, SedaError};

pub struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
    pending: AtomicBool,
    /// Writes actually issued (coalesced calls excluded)
    notifications: AtomicU64,
}

impl Waker {
    pub fn new() -> Result<Self> {
        let (read_fd, write_fd) = Self::create()?;
        Ok(Self {
            read_fd,
            write_fd,
            pending: AtomicBool::new(false),
            notifications: AtomicU64::new(0),
        })
    }

    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            fn create() -> Result<(RawFd, RawFd)> {
                let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
                if fd < 0 {
                    return Err(SedaError::last_os_error());
                }
                Ok((fd, fd))
            }
        } else {
            fn create() -> Result<(RawFd, RawFd)> {
                let mut fds = [0 as libc::c_int; 2];
                if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
                    return Err(SedaError::last_os_error());
                }
                for &fd in &fds {
                    unsafe {
                        let fl = libc::fcntl(fd, libc::F_GETFL);
                        libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK);
                        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                    }
                }
                Ok((fds[0], fds[1]))
            }
        }
    }

    /// Descriptor to register for read readiness.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.read_fd
    }

    /// Wake the poller. Returns `false` when a wake was already pending.
    pub fn wake(&self) -> Result<bool> {
        if self.pending.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.write_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = SedaError::last_os_error();
            // EAGAIN: counter saturated or pipe full, a wake is already queued
            if !matches!(err, SedaError::Os(e) if e == libc::EAGAIN) {
                self.pending.store(false, Ordering::Release);
                return Err(err);
            }
        }
        self.notifications.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Consume queued wakeups. Called by the loop thread when the read end
    /// turns readable.
    ///
    /// `pending` is cleared only after the descriptor reads empty, so a set
    /// flag always has a readable descriptor behind it. A wake coalesced
    /// between the last read and the clear is covered by the round in
    /// progress, which drains commands and injected events after dispatch.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
        self.pending.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wake writes issued so far.
    #[inline]
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            if self.write_fd != self.read_fd {
                libc::close(self.write_fd);
            }
        }
    }
}
